mod common;

use common::{fresh_disk, mount, mount_with, pattern};
use fat32::{FileType, MountOptions, PAGE_SIZE};
use vfs::{DirEntryType, Error, Resource};

#[test]
fn round_trip_across_clusters() {
    let disk = fresh_disk();
    let data = pattern(10_000, 1);
    {
        let fs = mount(&disk);
        {
            let file = fs.root().create("data.bin", FileType::Regular).unwrap();
            assert_eq!(10_000, file.write_at(300, &data).unwrap());

            let mut back = vec![0; 10_000];
            assert_eq!(10_000, file.read_at(300, &mut back).unwrap());
            assert_eq!(data, back);

            let mut head = [0xFF; 300];
            assert_eq!(300, file.read_at(0, &mut head).unwrap());
            assert!(head.iter().all(|&b| b == 0));

            // 越过末尾只读到末尾为止
            let mut tail = [0; 100];
            assert_eq!(50, file.read_at(10_250, &mut tail).unwrap());
            assert_eq!(0, file.read_at(20_000, &mut tail).unwrap());
        }
        fs.unmount().unwrap();
    }

    let fs = mount(&disk);
    {
        let file = fs.lookup_path("/data.bin").unwrap().unwrap();
        let stat = file.stat().unwrap();
        assert_eq!(10_300, stat.size);
        assert_eq!(DirEntryType::Regular, stat.mode);
        assert_eq!(10_300u64.div_ceil(512), stat.blocks);

        let mut back = vec![0; 10_000];
        file.read_at(300, &mut back).unwrap();
        assert_eq!(data, back);
    }
    fs.audit().unwrap();
    fs.unmount().unwrap();
}

#[test]
fn sparse_extension_reads_zero() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    {
        let file = fs.root().create("sparse", FileType::Regular).unwrap();
        file.write_at(0, b"head").unwrap();
        file.write_at(20_000, b"tail").unwrap();
        assert_eq!(20_004, file.stat().unwrap().size);

        let mut gap = vec![0xFF; 20_000 - 4];
        assert_eq!(gap.len(), file.read_at(4, &mut gap).unwrap());
        assert!(gap.iter().all(|&b| b == 0));

        let mut tail = [0; 4];
        file.read_at(20_000, &mut tail).unwrap();
        assert_eq!(b"tail", &tail);
    }
    fs.unmount().unwrap();
}

#[test]
fn offsets_near_usize_max() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    {
        let file = fs.root().create("edge", FileType::Regular).unwrap();
        file.write_at(0, b"data").unwrap();

        let mut buf = [0; 16];
        assert_eq!(0, file.read_at(usize::MAX - 4, &mut buf).unwrap());
        assert_eq!(
            Some(Error::OutOfResource(Resource::Cluster)),
            file.write_at(usize::MAX - 4, &buf).err()
        );
        assert_eq!(
            Some(Error::OutOfResource(Resource::Cluster)),
            file.write_at(u32::MAX as usize, b"x").err()
        );
        assert_eq!(4, file.stat().unwrap().size);
    }
    fs.unmount().unwrap();
}

#[test]
fn overwrite_in_the_middle() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    {
        let file = fs.root().create("log", FileType::Regular).unwrap();
        file.write_at(0, &pattern(3 * PAGE_SIZE, 2)).unwrap();
        file.sync().unwrap();
        file.write_at(PAGE_SIZE - 2, b"abcd").unwrap();
        assert_eq!(3 * PAGE_SIZE, file.stat().unwrap().size as usize);

        let mut back = [0; 4];
        file.read_at(PAGE_SIZE - 2, &mut back).unwrap();
        assert_eq!(b"abcd", &back);
    }
    fs.unmount().unwrap();
}

#[test]
fn nested_file_survives_remount() {
    let disk = fresh_disk();
    let data = pattern(5000, 3);
    {
        let fs = mount(&disk);
        fs.root().create("a", FileType::Directory).unwrap();
        fs.create_path("/a/b.txt", FileType::Regular)
            .unwrap()
            .write_at(0, &data)
            .unwrap();
        fs.unmount().unwrap();
    }

    let fs = mount(&disk);
    {
        let file = fs.lookup_path("/a/b.txt").unwrap().unwrap();
        assert_eq!(5000, file.stat().unwrap().size);
        let mut back = vec![0; 5000];
        assert_eq!(5000, file.read_at(0, &mut back).unwrap());
        assert_eq!(data, back);

        assert_eq!(None, fs.lookup_path("/a/c.txt").unwrap().map(|_| ()));
        assert_eq!(Some(Error::NotFound), fs.lookup_path("/b/c.txt").err());
    }
    fs.unmount().unwrap();
}

#[test]
fn truncate_releases_clusters() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    let free = fs.free_clusters();
    {
        let file = fs.root().create("big", FileType::Regular).unwrap();
        file.write_at(0, &pattern(64 * 512, 4)).unwrap();
        assert_eq!(free - 64, fs.free_clusters());

        file.truncate().unwrap();
        assert_eq!(free, fs.free_clusters());
        assert_eq!(0, file.stat().unwrap().size);

        let mut buf = [0; 16];
        assert_eq!(0, file.read_at(0, &mut buf).unwrap());
        file.write_at(0, b"again").unwrap();
        assert_eq!(free - 1, fs.free_clusters());
    }
    fs.audit().unwrap();
    fs.unmount().unwrap();
}

#[test]
fn directories_reject_file_io() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    {
        let dir = fs.root().create("dir", FileType::Directory).unwrap();
        let mut buf = [0; 8];
        assert_eq!(Some(Error::IsADirectory), dir.read_at(0, &mut buf).err());
        assert_eq!(Some(Error::IsADirectory), dir.write_at(0, b"x").err());
        assert_eq!(Some(Error::IsADirectory), dir.truncate().err());
    }
    fs.unmount().unwrap();
}

#[test]
fn second_sync_writes_nothing() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    {
        let dir = fs.mkdir_all("/x/y").unwrap();
        let file = dir.create("z", FileType::Regular).unwrap();
        file.write_at(0, &pattern(3 * PAGE_SIZE, 5)).unwrap();
    }
    fs.sync_all().unwrap();
    assert_eq!(0, fs.dirty_inodes());

    disk.reset_stats();
    fs.sync_all().unwrap();
    assert_eq!(0, disk.stats().writes);
    fs.unmount().unwrap();
}

#[test]
fn sync_one_file() {
    let disk = fresh_disk();
    let fs = mount(&disk);
    {
        let file = fs.root().create("f", FileType::Regular).unwrap();
        file.write_at(0, &pattern(2 * PAGE_SIZE, 6)).unwrap();
        file.sync().unwrap();

        disk.reset_stats();
        file.sync().unwrap();
        assert_eq!(0, disk.stats().writes);
    }
    fs.unmount().unwrap();
}

#[test]
fn sequential_reads_use_readahead() {
    const PAGES: usize = 64;

    let disk = fresh_disk();
    {
        let fs = mount(&disk);
        fs.root()
            .create("seq", FileType::Regular)
            .unwrap()
            .write_at(0, &pattern(PAGES * PAGE_SIZE, 7))
            .unwrap();
        fs.unmount().unwrap();
    }

    let mut page = vec![0; PAGE_SIZE];

    let sequential = {
        let fs = mount(&disk);
        let file = fs.lookup_path("/seq").unwrap().unwrap();
        disk.reset_stats();
        for index in 0..PAGES {
            file.read_at(index * PAGE_SIZE, &mut page).unwrap();
        }
        let reads = disk.stats().reads;
        drop(file);
        fs.unmount().unwrap();
        reads
    };

    let scattered = {
        let fs = mount(&disk);
        let file = fs.lookup_path("/seq").unwrap().unwrap();
        disk.reset_stats();
        for i in 0..PAGES {
            file.read_at((i * 37 % PAGES) * PAGE_SIZE, &mut page).unwrap();
        }
        let reads = disk.stats().reads;
        drop(file);
        fs.unmount().unwrap();
        reads
    };

    assert!(
        sequential < scattered,
        "sequential {sequential} reads, scattered {scattered} reads"
    );
}

#[test]
fn tick_writes_back_after_period() {
    let disk = fresh_disk();
    let fs = mount_with(&disk, MountOptions::default().with_writeback_period(30));
    {
        let file = fs.root().create("f", FileType::Regular).unwrap();
        file.write_at(0, b"hello").unwrap();
    }
    assert!(fs.dirty_inodes() > 0);

    fs.tick(10).unwrap();
    assert!(fs.dirty_inodes() > 0);

    // 文件先写回，目录项随后使根目录变脏
    fs.tick(30).unwrap();
    fs.tick(60).unwrap();
    assert_eq!(0, fs.dirty_inodes());
    fs.unmount().unwrap();
}

#[test]
fn balance_drops_clean_pages() {
    let disk = fresh_disk();
    let fs = mount_with(&disk, MountOptions::default().with_dirty_pages_high(16));
    let data = pattern(64 * PAGE_SIZE, 8);
    fs.root()
        .create("f", FileType::Regular)
        .unwrap()
        .write_at(0, &data)
        .unwrap();
    assert!(fs.cached_pages() >= 64);

    fs.balance().unwrap();
    assert!(fs.cached_pages() < 16);

    {
        let file = fs.lookup_path("/f").unwrap().unwrap();
        let mut back = vec![0; data.len()];
        file.read_at(0, &mut back).unwrap();
        assert_eq!(data, back);
    }
    fs.unmount().unwrap();
}
