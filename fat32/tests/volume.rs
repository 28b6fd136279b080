mod common;

use std::sync::Arc;

use block_dev::RamDisk;
use common::{DISK_SIZE, MIB, fresh_disk, fresh_disk_with, mount};
use fat32::volume::Geometry;
use fat32::volume::reserved::Bpb;
use fat32::{ClusterSectors, FatFileSystem, FileType, FormatOptions, MountOptions};
use vfs::{Corruption, Error, ErrorKind, Resource};

fn u32_at(image: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(image[pos..pos + 4].try_into().unwrap())
}

fn geometry(image: &[u8]) -> Geometry {
    Geometry::new(&Bpb::parse(&image[..512]).unwrap())
}

#[test]
fn fresh_volume_layout() {
    let disk = fresh_disk();
    let image = disk.snapshot();
    let geo = geometry(&image);

    assert_eq!([0x55, 0xAA], image[510..512]);
    assert_eq!(image[..512], image[6 * 512..7 * 512]);
    assert_eq!(512, geo.cluster_bytes());
    assert_eq!(2, geo.fat_count);

    // FSINFO及其备份
    for sector in [1, 7] {
        let info = &image[sector * 512..(sector + 1) * 512];
        assert_eq!(0x4161_5252, u32_at(info, 0));
        assert_eq!(geo.total_clusters as u32 - 1, u32_at(info, 488));
        assert_eq!(3, u32_at(info, 492));
    }

    for nth in 0..geo.fat_count {
        let fat = usize::from(geo.fat_mirror(nth)) * 512;
        assert_eq!(0x0FFF_FFF8, u32_at(&image, fat));
        assert_eq!(0x0FFF_FFFF, u32_at(&image, fat + 4));
        assert_eq!(0x0FFF_FFFF, u32_at(&image, fat + 8));
        assert_eq!(0, u32_at(&image, fat + 12));
    }

    let fs = mount(&disk);
    assert_eq!(geo.total_clusters as u32 - 1, fs.free_clusters());
    assert_eq!(b"NO NAME    ", fs.label());
    fs.audit().unwrap();
    fs.unmount().unwrap();
}

#[test]
fn label_and_cluster_size_follow_options() {
    let opts = FormatOptions::default()
        .with_cluster_sectors(ClusterSectors::S8)
        .with_label("scratch");
    let disk = fresh_disk_with(&opts);
    let fs = mount(&disk);
    assert_eq!(4096, fs.cluster_bytes());
    assert_eq!(b"SCRATCH    ", fs.label());
    fs.unmount().unwrap();
}

#[test]
fn too_small_disk_is_rejected() {
    let disk = Arc::new(RamDisk::new(16 * MIB));
    assert_eq!(
        Err(Error::Corrupt(Corruption::BadGeometry)),
        fat32::format(disk, 16 * MIB, &FormatOptions::default())
    );
}

#[test]
fn unformatted_disk_does_not_mount() {
    common::init_log();
    let disk = Arc::new(RamDisk::new(DISK_SIZE));
    let err = FatFileSystem::mount(disk, MountOptions::default()).unwrap_err();
    assert_eq!(ErrorKind::Corrupt, err.kind());
}

#[test]
fn broken_fsinfo_does_not_mount() {
    let disk = fresh_disk();
    let mut image = disk.snapshot();
    image[512] = 0;
    let disk = Arc::new(RamDisk::from_image(image));
    assert_eq!(
        Some(Error::Corrupt(Corruption::BadSignature)),
        FatFileSystem::mount(disk, MountOptions::default()).err()
    );
}

#[test]
fn freed_cluster_is_reused_when_full() {
    let opts = FormatOptions::default().with_cluster_sectors(ClusterSectors::S128);
    let disk = fresh_disk_with(&opts);
    let fs = mount(&disk);
    let root = fs.root();

    let small = root.create("small", FileType::Regular).unwrap();
    small.write_at(0, b"s").unwrap();
    let small_cluster = small.id().unwrap() & 0xFFFF_FFFF;
    drop(small);

    let big = root.create("big", FileType::Regular).unwrap();
    let chunk = vec![0xA5; MIB];
    let mut offset = 0;
    loop {
        match big.write_at(offset, &chunk) {
            Ok(n) => offset += n,
            Err(e) => {
                assert_eq!(Error::OutOfResource(Resource::Cluster), e);
                break;
            }
        }
    }
    assert_eq!(0, fs.free_clusters());
    fs.audit().unwrap();

    root.unlink("small").unwrap();
    assert_eq!(1, fs.free_clusters());

    let again = root.create("again", FileType::Regular).unwrap();
    again.write_at(0, b"a").unwrap();
    assert_eq!(small_cluster, again.id().unwrap() & 0xFFFF_FFFF);
    assert_eq!(0, fs.free_clusters());
    fs.audit().unwrap();

    drop((again, big, root));
    fs.unmount().unwrap();
}

#[test]
fn free_count_survives_remount() {
    let disk = fresh_disk();
    let before;
    {
        let fs = mount(&disk);
        {
            let root = fs.root();
            let file = root.create("data", FileType::Regular).unwrap();
            file.write_at(0, &vec![1; 40 * 512]).unwrap();
            root.create("dir", FileType::Directory).unwrap();
        }
        before = fs.free_clusters();
        fs.unmount().unwrap();
    }

    let image = disk.snapshot();
    assert_eq!(before, u32_at(&image, 512 + 488));

    let fs = mount(&disk);
    assert_eq!(before, fs.free_clusters());
    fs.audit().unwrap();
    fs.unmount().unwrap();
}

