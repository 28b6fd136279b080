//! # inode
//!
//! 目录项会指向一个簇链表，这就是FAT文件系统中的inode。
//!
//! [`Inode`]是带引用计数的句柄，克隆即增加引用，析构即释放引用；
//! 内容须经[`Inode::lock`]取得[`InodeGuard`]后访问。
//! 槽位分配之后内容是无效的，第一次加锁时才从父目录读入目录项。
//!
//! 加锁顺序：父目录先于子项，inode先于脏链表，脏链表先于inode表；
//! inode表与FAT的锁都只在最内层短暂持有。

mod dir;
mod index;
pub(crate) mod table;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};

use spin::MutexGuard;
use vfs::{DirEntry, Error, Stat};

pub use self::index::{CAPACITY as INDEX_CAPACITY, IndexTable};
use self::table::{Acquired, Location, Put};
use crate::Result;
use crate::cluster::ClusterId;
use crate::control::FatFileSystem;
use crate::mapping::AddressSpace;
use crate::volume::data::{DIRENT_SIZE, FileType, ShortDirEntry};

/// 目录名字缓存里的一项：短目录项的下标与其前的长目录项数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CachedEntry {
    pub off: u32,
    pub longs: u8,
}

/// inode的内容，由槽位锁保护
pub struct InodeInner {
    pub(crate) slot: usize,
    /// 内容所属的槽位代数，与句柄的代数不符即为无效
    pub(crate) generation: u32,
    pub(crate) valid: bool,
    pub(crate) ty: FileType,
    pub(crate) rdev: (u8, u8),
    /// 盘上短目录项的内存镜像
    pub(crate) dirent: ShortDirEntry,
    pub(crate) size: usize,
    pub(crate) index: IndexTable,
    pub(crate) mapping: Option<AddressSpace>,
    pub(crate) dcache: BTreeMap<String, CachedEntry>,
    /// 目录下一次查找的起点
    pub(crate) off_hint: u32,
    /// 目录项需要写回父目录
    pub(crate) dirty_in_parent: bool,
}

impl fmt::Debug for InodeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InodeInner")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("valid", &self.valid)
            .field("ty", &self.ty)
            .field("size", &self.size)
            .field("clusters", &self.index.len())
            .field("pages", &self.page_count())
            .finish()
    }
}

impl InodeInner {
    pub(crate) fn new(slot: usize) -> Self {
        Self {
            slot,
            generation: 0,
            valid: false,
            ty: FileType::Regular,
            rdev: (0, 0),
            dirent: ShortDirEntry::default(),
            size: 0,
            index: IndexTable::default(),
            mapping: None,
            dcache: BTreeMap::new(),
            off_hint: 0,
            dirty_in_parent: false,
        }
    }

    /// 清空内容，缓存页一并丢弃
    pub(crate) fn reset(&mut self, fs: &FatFileSystem) {
        self.drop_pages(fs, false);
        *self = Self::new(self.slot);
    }

    /// 由目录项建立内存中的inode，顺着FAT链填好索引表
    pub(crate) fn load(&mut self, fs: &FatFileSystem, generation: u32, dirent: ShortDirEntry) -> Result<()> {
        self.reset(fs);

        let (ty, major, minor) = dirent.file_type();
        let start = dirent.cluster();
        if !start.is_free() {
            let mut cur = Some(start.validate(fs.geo.max_cluster()).map_err(|e| {
                log::error!("inode: bad start cluster {:#x}: {e:?}", u32::from(start));
                vfs::Corruption::FatValue
            })?);
            while let Some(id) = cur {
                self.index.push(id)?;
                cur = fs.fat.next(id)?;
            }
        }

        self.generation = generation;
        self.valid = true;
        self.ty = ty;
        self.rdev = (major, minor);
        self.size = match ty {
            // 目录项里目录的大小总是0
            FileType::Directory => self.index.len() * fs.geo.cluster_bytes(),
            _ => dirent.size(),
        };
        self.dirent = dirent;
        log::trace!(
            "inode: slot {} loaded, {ty:?} of {} bytes in {} clusters",
            self.slot,
            self.size,
            self.index.len()
        );

        Ok(())
    }

    #[inline]
    pub(crate) fn is_loaded(&self, generation: u32) -> bool {
        self.valid && self.generation == generation
    }

    /// 首簇，空文件与设备文件没有
    #[inline]
    pub(crate) fn start(&self) -> Option<ClusterId> {
        self.index.get(0)
    }

    /// 释放全部簇，丢弃缓存页
    pub(crate) fn truncate(&mut self, fs: &FatFileSystem) -> Result<()> {
        self.drop_pages(fs, false);
        let freed = match self.start() {
            Some(start) => fs.fat.free_chain(start)?,
            None => 0,
        };
        log::debug!("inode: slot {} truncated, {freed} clusters freed", self.slot);

        self.index.clear();
        self.size = 0;
        self.off_hint = 0;
        self.dcache.clear();
        self.dirent.set_cluster(ClusterId::FREE);
        self.dirent.resize(0);
        self.dirent.touch(fs.clock.now());
        self.dirty_in_parent = true;
        fs.mark_dirty(self.slot);
        Ok(())
    }
}

/// inode号：短目录项在父目录中的字节偏移与首簇号
#[inline]
pub(crate) fn inode_number(off: u32, start: ClusterId) -> u64 {
    ((off as u64 * DIRENT_SIZE as u64) << 32) | u64::from(u32::from(start))
}

/// inode句柄
pub struct Inode<'fs> {
    fs: &'fs FatFileSystem,
    slot: usize,
    generation: u32,
}

impl fmt::Debug for Inode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Clone for Inode<'_> {
    fn clone(&self) -> Self {
        self.fs.itable.dup(self.slot);
        Self {
            fs: self.fs,
            slot: self.slot,
            generation: self.generation,
        }
    }
}

impl Drop for Inode<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.fs.put_slot(self.slot) {
            log::error!("inode: put slot {} failed: {e}", self.slot);
        }
    }
}

impl<'fs> Inode<'fs> {
    /// 接管槽位上已计入的一个引用
    pub(crate) fn from_raw(fs: &'fs FatFileSystem, slot: usize, generation: u32) -> Self {
        Self { fs, slot, generation }
    }

    /// 接管新取得的槽位，并释放被回收槽位所持有的父目录引用
    pub(crate) fn from_acquired(fs: &'fs FatFileSystem, acq: Acquired) -> Result<Self> {
        let inode = Self::from_raw(fs, acq.slot, acq.generation);
        if let Some(parent) = acq.evicted_parent {
            fs.put_slot(parent)?;
        }
        Ok(inode)
    }

    /// 为已被引用的槽位再造一个句柄
    pub(crate) fn dup_slot(fs: &'fs FatFileSystem, slot: usize) -> Self {
        fs.itable.dup(slot);
        Self::from_raw(fs, slot, fs.itable.generation(slot))
    }

    #[inline]
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn fs(&self) -> &'fs FatFileSystem {
        self.fs
    }

    /// 父目录的句柄，根目录没有父目录
    pub fn parent(&self) -> Option<Self> {
        let parent = self.fs.itable.location(self.slot)?.parent?;
        Some(Self::dup_slot(self.fs, parent))
    }

    /// 加锁，必要时从父目录读入目录项
    pub fn lock(&self) -> Result<InodeGuard<'fs>> {
        let fs = self.fs;
        let slot = &fs.itable.slots[self.slot];
        {
            let inner = slot.inner.lock();
            if inner.is_loaded(self.generation) {
                return Ok(InodeGuard { fs, inner });
            }
        }

        let dirent = self.read_dirent()?;
        let mut inner = slot.inner.lock();
        if !inner.is_loaded(self.generation) {
            inner.load(fs, self.generation, dirent)?;
        }
        Ok(InodeGuard { fs, inner })
    }

    /// 从父目录读出自己的短目录项；不能在持有自己的锁时调用
    fn read_dirent(&self) -> Result<ShortDirEntry> {
        let Some(loc) = self.fs.itable.location(self.slot) else {
            return Err(Error::NotFound);
        };
        let Some(parent) = loc.parent else {
            return Ok(self.fs.root_dirent());
        };

        let parent = Self::dup_slot(self.fs, parent);
        let mut guard = parent.lock()?;
        let mut raw = [0u8; DIRENT_SIZE];
        let n = guard.read_bytes(self.fs, loc.off as usize * DIRENT_SIZE, &mut raw)?;
        if n != DIRENT_SIZE {
            return Err(Error::Corrupt(vfs::Corruption::MissingParent));
        }
        Ok(ShortDirEntry::from_bytes(&raw))
    }

    /// 把内存中的目录项写回父目录
    pub fn update(&self) -> Result<()> {
        self.fs.flush_dirent(self.slot, true)
    }

    pub fn id(&self) -> Result<u64> {
        Ok(self.lock()?.id())
    }

    pub fn kind(&self) -> Result<FileType> {
        Ok(self.lock()?.ty)
    }

    pub fn stat(&self) -> Result<Stat> {
        Ok(self.lock()?.stat())
    }

    /// 文件
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.lock()?.read_at(offset, buf)
    }

    /// 文件
    ///
    /// 随机写入，越过末尾时分配新簇。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        self.lock()?.write_at(offset, buf)
    }

    pub fn truncate(&self) -> Result<()> {
        self.lock()?.truncate()
    }

    /// 目录
    pub fn find(&self, name: &str) -> Result<Option<Inode<'fs>>> {
        self.lock()?.find(self, name)
    }

    /// 目录
    pub fn create(&self, name: &str, ty: FileType) -> Result<Inode<'fs>> {
        self.lock()?.create(name, ty, 0, 0)
    }

    /// 目录
    ///
    /// 创建设备文件，主次设备号各只保留低2位。
    pub fn mknod(&self, name: &str, ty: FileType, major: u8, minor: u8) -> Result<Inode<'fs>> {
        self.lock()?.create(name, ty, major, minor)
    }

    pub fn unlink(&self, name: &str) -> Result<()> {
        self.lock()?.unlink(name)
    }

    pub fn rmdir(&self, name: &str) -> Result<()> {
        self.lock()?.rmdir(name)
    }

    /// 从字节偏移`cursor`起列出至多`limit`个目录项，返回下一次的偏移
    pub fn read_dir(&self, cursor: usize, limit: usize) -> Result<(Vec<DirEntry>, usize)> {
        self.lock()?.read_dir(cursor, limit)
    }

    /// 把本目录下的`name`移到`dst`目录下，改名为`new_name`
    pub fn rename(&self, name: &str, dst: &Inode<'fs>, new_name: &str) -> Result<()> {
        dir::rename(self, name, dst, new_name)
    }

    /// 写回脏页与目录项
    pub fn sync(&self) -> Result<()> {
        self.fs.sync_one(self, usize::MAX).map(|_| ())
    }
}

/// 加锁后的inode
///
/// 持有者同时须持有对应的[`Inode`]句柄。
pub struct InodeGuard<'a> {
    fs: &'a FatFileSystem,
    inner: MutexGuard<'a, InodeInner>,
}

impl fmt::Debug for InodeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl Deref for InodeGuard<'_> {
    type Target = InodeInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<'a> InodeGuard<'a> {
    pub fn id(&self) -> u64 {
        let off = self
            .fs
            .itable
            .location(self.inner.slot)
            .map_or(0, |loc| loc.off);
        inode_number(off, self.start().unwrap_or(ClusterId::FREE))
    }

    #[inline]
    pub fn kind(&self) -> FileType {
        self.inner.ty
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn stat(&self) -> Stat {
        let cluster_bytes = self.fs.geo.cluster_bytes();
        Stat {
            ino: self.id(),
            mode: self.inner.ty.into(),
            block_size: cluster_bytes as u64,
            blocks: (self.inner.index.len() * cluster_bytes / 512) as u64,
            size: self.inner.size as u64,
            nlink: 1,
            rdev: self.inner.rdev,
        }
    }

    pub fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        if self.inner.ty == FileType::Directory {
            return Err(Error::IsADirectory);
        }
        let fs = self.fs;
        self.inner.read_bytes(fs, offset, buf)
    }

    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<usize> {
        if self.inner.ty == FileType::Directory {
            return Err(Error::IsADirectory);
        }
        let fs = self.fs;
        self.inner.write_bytes(fs, offset, buf)
    }

    pub fn truncate(&mut self) -> Result<()> {
        if self.inner.ty == FileType::Directory {
            return Err(Error::IsADirectory);
        }
        let fs = self.fs;
        self.inner.truncate(fs)
    }

    /// 取得`loc`处的子项，并用已读出的目录项加载它；调用方持有本目录的锁
    fn child(&self, loc: Location, dirent: &ShortDirEntry) -> Result<Inode<'a>> {
        let acq = self.fs.itable.get(loc)?;
        let child = Inode::from_acquired(self.fs, acq)?;
        {
            let mut inner = self.fs.itable.slots[child.slot].inner.lock();
            if !inner.is_loaded(child.generation) {
                inner.load(self.fs, child.generation, *dirent)?;
            }
        }
        Ok(child)
    }
}

impl FatFileSystem {
    /// 释放槽位上的一个引用，最后一个引用释放时回收已删除的inode
    pub(crate) fn put_slot(&self, slot: usize) -> Result<()> {
        if self.itable.put(slot) == Put::Kept {
            return Ok(());
        }

        let result = {
            let mut inner = self.itable.slots[slot].inner.lock();
            // 槽位里可能还是上一代的内容
            let result = if inner.is_loaded(self.itable.generation(slot)) {
                inner.truncate(self)
            } else {
                Ok(())
            };
            inner.reset(self);
            self.dequeue(slot);
            result
        };
        log::debug!("inode: slot {slot} reclaimed");

        match self.itable.release(slot) {
            Some(parent) => result.and(self.put_slot(parent)),
            None => result,
        }
    }
}
