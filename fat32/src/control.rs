use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use block_dev::{BLOCK_SIZE, BlockDevice};
use spin::Mutex;
use vfs::Error;

use crate::Result;
use crate::bio::BufferCache;
use crate::config::MountOptions;
use crate::inode::Inode;
use crate::inode::table::{InodeTable, Location};
use crate::time::{Clock, EpochClock};
use crate::volume::Geometry;
use crate::volume::data::{FileType, ShortDirEntry};
use crate::volume::fat::FatManager;
use crate::volume::reserved::{Bpb, FsInfo};

/// 一次挂载，卸载时连同所有缓存一起销毁
pub struct FatFileSystem {
    pub(crate) geo: Geometry,
    pub(crate) bcache: BufferCache,
    pub(crate) fat: FatManager,
    pub(crate) itable: InodeTable,
    /// 待回写的inode槽位
    pub(crate) dirty: Mutex<Vec<usize>>,
    pub(crate) opts: MountOptions,
    pub(crate) clock: Box<dyn Clock>,
    /// 所有inode缓存的页数
    pub(crate) cached_pages: AtomicUsize,
    pub(crate) last_tick: AtomicU64,
    root: usize,
    label: [u8; 11],
}

impl fmt::Debug for FatFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatFileSystem")
            .field("geo", &self.geo)
            .field("opts", &self.opts)
            .field("cached_pages", &self.cached_pages)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FatFileSystem {
    pub fn mount(dev: Arc<dyn BlockDevice>, opts: MountOptions) -> Result<Self> {
        Self::mount_with_clock(dev, opts, Box::new(EpochClock))
    }

    /// 解析BPB与FSINFO，扫描FAT，载入根目录
    pub fn mount_with_clock(
        dev: Arc<dyn BlockDevice>,
        opts: MountOptions,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let mut boot = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut boot)?;
        let bpb = Bpb::parse(&boot)?;
        let geo = Geometry::new(&bpb);

        let bcache = BufferCache::new(dev, geo.sector_bytes, opts.buffers);
        let info = FsInfo::parse(&bcache.read(geo.fs_info)?)?;
        let fat = FatManager::load(&bcache, &geo, Some(info))?;
        let itable = InodeTable::new(opts.inodes.max(2));

        let mut fs = Self {
            geo,
            bcache,
            fat,
            itable,
            dirty: Mutex::new(Vec::new()),
            opts,
            clock,
            cached_pages: AtomicUsize::new(0),
            last_tick: AtomicU64::new(0),
            root: 0,
            label: *bpb.label(),
        };

        // 根目录的这个引用直到卸载才释放
        let root = fs.itable.get(Location::ROOT)?;
        fs.itable.slots[root.slot]
            .inner
            .lock()
            .load(&fs, root.generation, fs.root_dirent())?;
        fs.root = root.slot;

        log::info!(
            "fat32: mounted {:?}, {} clusters of {} bytes, {} free",
            core::str::from_utf8(&fs.label).unwrap_or("?"),
            fs.geo.total_clusters,
            fs.geo.cluster_bytes(),
            fs.fat.free_count()
        );
        Ok(fs)
    }

    /// 写回一切后卸载
    pub fn unmount(self) -> Result<()> {
        self.sync_all()?;
        self.put_slot(self.root)?;

        let busy = self.itable.in_use();
        if busy > 0 {
            log::warn!("fat32: unmount with {busy} inodes still referenced");
        }
        log::info!("fat32: unmounted, {} clusters free", self.fat.free_count());
        Ok(())
    }

    pub fn root(&self) -> Inode<'_> {
        Inode::dup_slot(self, self.root)
    }

    #[inline]
    pub(crate) fn root_slot(&self) -> usize {
        self.root
    }

    /// 根目录没有目录项，以指向根簇的"."代替
    pub(crate) fn root_dirent(&self) -> ShortDirEntry {
        ShortDirEntry::new_dot(self.geo.root)
    }

    /// 按绝对路径查找；中间的目录不存在时报[`Error::NotFound`]
    pub fn lookup_path(&self, path: &str) -> Result<Option<Inode<'_>>> {
        let mut cur = self.root();
        let mut cmps = path.split('/').filter(|cmp| !cmp.is_empty()).peekable();
        while let Some(cmp) = cmps.next() {
            match cur.find(cmp)? {
                Some(next) => cur = next,
                None if cmps.peek().is_none() => return Ok(None),
                None => return Err(Error::NotFound),
            }
        }
        Ok(Some(cur))
    }

    /// 在已存在的目录下创建路径的最后一段
    pub fn create_path(&self, path: &str, ty: FileType) -> Result<Inode<'_>> {
        let path = path.trim_end_matches('/');
        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
        let dir = self.lookup_path(dir)?.ok_or(Error::NotFound)?;
        dir.create(name, ty)
    }

    /// 逐级创建目录，已存在的跳过
    pub fn mkdir_all(&self, path: &str) -> Result<Inode<'_>> {
        let mut cur = self.root();
        for cmp in path.split('/').filter(|cmp| !cmp.is_empty()) {
            cur = match cur.find(cmp)? {
                Some(next) if next.kind()? == FileType::Directory => next,
                Some(_) => return Err(Error::NotADirectory),
                None => cur.create(cmp, FileType::Directory)?,
            };
        }
        Ok(cur)
    }

    #[inline]
    pub fn free_clusters(&self) -> u32 {
        self.fat.free_count()
    }

    #[inline]
    pub fn cluster_bytes(&self) -> usize {
        self.geo.cluster_bytes()
    }

    #[inline]
    pub fn label(&self) -> &[u8; 11] {
        &self.label
    }

    #[inline]
    pub fn options(&self) -> &MountOptions {
        &self.opts
    }

    /// 页缓存里的页数
    #[inline]
    pub fn cached_pages(&self) -> usize {
        self.cached_pages.load(Ordering::Relaxed)
    }

    /// 等待回写的inode数
    pub fn dirty_inodes(&self) -> usize {
        self.dirty.lock().len()
    }

    /// 核对位图、FAT缓存与空闲计数
    pub fn audit(&self) -> Result<()> {
        self.fat.audit()
    }
}
