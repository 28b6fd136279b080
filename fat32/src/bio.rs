//! # 块缓存层
//!
//! 定长的扇区缓冲池。扇区按 LRU 复用：
//! 命中时只加引用计数；未命中时从最久未用的一端找引用计数为 0 的缓冲块改派给新扇区，
//! 找不到则报告缓冲块耗尽。
//!
//! 释放缓冲块时若其为脏块则同步写回，并将其提到 LRU 队首。
//!
//! [`Bio`] 则绕过缓冲池，把若干段物理连续的扇区一次交给设备；
//! 写过的扇区在缓冲池里的旧副本随之作废。FAT与FSINFO走缓冲池，文件页走 [`Bio`]。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use block_dev::BlockDevice;
use spin::{Mutex, MutexGuard};
use vfs::{Error, Resource};

use crate::Result;
use crate::collections::LruList;
use crate::sector::SectorId;

/// 内存中的扇区
#[derive(Debug)]
pub struct Buffer {
    /// 缓存的数据
    data: Box<[u8]>,
    /// 对应的扇区
    sector: Option<SectorId>,
    /// 数据是否已从磁盘读入
    valid: bool,
    /// 是否为脏块
    dirty: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Entry {
    sector: Option<SectorId>,
    refcnt: usize,
}

#[derive(Debug)]
struct Pool {
    entries: Vec<Entry>,
    lru: LruList,
    index: BTreeMap<SectorId, usize>,
}

pub struct BufferCache {
    /// 底层块设备的引用
    dev: Arc<dyn BlockDevice>,
    sector_bytes: usize,
    pool: Mutex<Pool>,
    slots: Box<[Mutex<Buffer>]>,
}

/// 持有中的缓冲块，离开作用域时释放
pub struct BufGuard<'a> {
    cache: &'a BufferCache,
    idx: usize,
    buf: MutexGuard<'a, Buffer>,
}

impl BufferCache {
    pub fn new(dev: Arc<dyn BlockDevice>, sector_bytes: usize, capacity: usize) -> Self {
        let mut lru = LruList::new(capacity);
        for idx in 0..capacity {
            lru.push_front(idx);
        }

        Self {
            dev,
            sector_bytes,
            pool: Mutex::new(Pool {
                entries: vec![Entry::default(); capacity],
                lru,
                index: BTreeMap::new(),
            }),
            slots: (0..capacity)
                .map(|_| {
                    Mutex::new(Buffer {
                        data: vec![0; sector_bytes].into_boxed_slice(),
                        sector: None,
                        valid: false,
                        dirty: false,
                    })
                })
                .collect(),
        }
    }

    /// 获取扇区的缓冲块，必要时从磁盘读入。
    ///
    /// 若缓冲块被其它线程持有则等待。
    pub fn read(&self, sector: SectorId) -> Result<BufGuard<'_>> {
        let mut guard = self.acquire(sector)?;
        if !guard.buf.valid {
            self.dev
                .read_blocks(sector.block(self.sector_bytes), &mut guard.buf.data)?;
            guard.buf.valid = true;
        }
        Ok(guard)
    }

    /// 获取扇区的缓冲块，调用方将覆盖其全部内容，不必读盘
    pub fn overwrite(&self, sector: SectorId) -> Result<BufGuard<'_>> {
        let mut guard = self.acquire(sector)?;
        guard.buf.data.fill(0);
        guard.buf.valid = true;
        guard.buf.dirty = true;
        Ok(guard)
    }

    fn acquire(&self, sector: SectorId) -> Result<BufGuard<'_>> {
        let idx = {
            let mut pool = self.pool.lock();
            let Pool {
                entries,
                lru,
                index,
            } = &mut *pool;

            if let Some(&idx) = index.get(&sector) {
                entries[idx].refcnt += 1;
                idx
            } else {
                let idx = lru
                    .iter_lru()
                    .find(|&idx| entries[idx].refcnt == 0)
                    .ok_or(Error::OutOfResource(Resource::Buffer))?;
                if let Some(old) = entries[idx].sector.replace(sector) {
                    index.remove(&old);
                    log::debug!("bio: recycle buffer #{idx} from sector {old:?} to {sector:?}");
                }
                index.insert(sector, idx);
                entries[idx].refcnt = 1;
                idx
            }
        };

        let mut guard = BufGuard {
            cache: self,
            idx,
            buf: self.slots[idx].lock(),
        };

        if guard.buf.sector != Some(sector) {
            // 上一任主人释放时写回失败，留下了脏数据
            if let (Some(old), true) = (guard.buf.sector, guard.buf.dirty) {
                self.dev
                    .write_blocks(old.block(self.sector_bytes), &guard.buf.data)?;
                guard.buf.dirty = false;
            }
            guard.buf.sector = Some(sector);
            guard.buf.valid = false;
        }

        Ok(guard)
    }

    fn unpin(&self, idx: usize) {
        let mut pool = self.pool.lock();
        let entry = &mut pool.entries[idx];
        assert!(entry.refcnt > 0, "release an unreferenced buffer");
        entry.refcnt -= 1;
        if entry.refcnt == 0 {
            pool.lru.push_front(idx);
        }
    }

    /// 把每个 [`BioVec`] 交给设备，每段发起一次传输。
    ///
    /// 写请求完成后，缓冲池里落在写入范围内且无人持有的缓冲块一律作废。
    pub fn submit(&self, bio: Bio<'_>) -> Result<()> {
        log::debug!("bio: submit {:?} with {} vecs", bio.dir, bio.vecs.len());
        for vec in bio.vecs {
            let block = vec.start.block(self.sector_bytes);
            match bio.dir {
                Direction::Read => self.dev.read_blocks(block, vec.data)?,
                Direction::Write => {
                    self.dev.write_blocks(block, vec.data)?;
                    let end = vec.start + vec.data.len() / self.sector_bytes;
                    self.invalidate(vec.start, end);
                }
            }
        }
        Ok(())
    }

    /// 作废`[start, end)`内引用计数为0的缓冲块
    fn invalidate(&self, start: SectorId, end: SectorId) {
        let mut pool = self.pool.lock();
        let Pool { entries, index, .. } = &mut *pool;

        let stale: Vec<(SectorId, usize)> = index
            .range(start..end)
            .map(|(&sector, &idx)| (sector, idx))
            .collect();
        for (sector, idx) in stale {
            if entries[idx].refcnt > 0 {
                log::warn!("bio: sector {sector:?} is held while being overwritten");
                continue;
            }
            index.remove(&sector);
            entries[idx].sector = None;
            // 引用计数为0，只有刚释放的持有者可能还没放开这把锁
            let mut buf = self.slots[idx].lock();
            buf.sector = None;
            buf.valid = false;
            buf.dirty = false;
        }
    }
}

impl BufGuard<'_> {
    #[inline]
    pub fn sector(&self) -> SectorId {
        // 持有期间所属扇区不会改变
        self.buf.sector.unwrap_or(SectorId::new(0))
    }

    /// 显式释放，返回写回的结果
    pub fn release(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        if self.buf.dirty {
            let sector = self.sector();
            self.cache
                .dev
                .write_blocks(sector.block(self.cache.sector_bytes), &self.buf.data)?;
            self.buf.dirty = false;
        }
        Ok(())
    }
}

impl Deref for BufGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf.data
    }
}

/// 可变借用即视为修改
impl DerefMut for BufGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.dirty = true;
        &mut self.buf.data
    }
}

impl Drop for BufGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("bio: failed to write back {:?}: {e}", self.buf.sector);
        }
        self.cache.unpin(self.idx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// 一段物理连续的扇区及其内存
#[derive(Debug)]
pub struct BioVec<'a> {
    pub start: SectorId,
    pub data: &'a mut [u8],
}

/// 一次块设备请求，由若干 [`BioVec`] 组成
#[derive(Debug)]
pub struct Bio<'a> {
    dir: Direction,
    vecs: Vec<BioVec<'a>>,
}

impl<'a> Bio<'a> {
    pub fn new(dir: Direction) -> Self {
        Self {
            dir,
            vecs: Vec::new(),
        }
    }

    pub fn push(&mut self, start: SectorId, data: &'a mut [u8]) {
        self.vecs.push(BioVec { start, data });
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use block_dev::{BlockDevice, RamDisk};
    use vfs::{Error, Resource};

    use super::{Bio, BufferCache, Direction};
    use crate::sector::SectorId;

    fn cache(capacity: usize) -> (Arc<RamDisk>, BufferCache) {
        let disk = Arc::new(RamDisk::new(64 * 512));
        let dev: Arc<dyn BlockDevice> = disk.clone();
        (disk, BufferCache::new(dev, 512, capacity))
    }

    #[test]
    fn hit_does_not_touch_disk() {
        let (disk, cache) = cache(2);
        drop(cache.read(SectorId::new(3)).unwrap());
        drop(cache.read(SectorId::new(3)).unwrap());
        assert_eq!(1, disk.stats().reads);
    }

    #[test]
    fn release_writes_dirty_buffer() {
        let (disk, cache) = cache(2);
        let mut buf = cache.read(SectorId::new(5)).unwrap();
        buf[8..12].copy_from_slice(&0xdead_beef_u32.to_le_bytes());
        buf.release().unwrap();
        assert_eq!(1, disk.stats().writes);

        let image = disk.snapshot();
        assert_eq!(0xdead_beef_u32.to_le_bytes(), image[5 * 512 + 8..5 * 512 + 12]);
    }

    #[test]
    fn evicts_least_recently_used() {
        let (disk, cache) = cache(2);
        drop(cache.read(SectorId::new(1)).unwrap());
        drop(cache.read(SectorId::new(2)).unwrap());
        // 1号最近被用过，3号应顶替2号
        drop(cache.read(SectorId::new(1)).unwrap());
        drop(cache.read(SectorId::new(3)).unwrap());
        disk.reset_stats();

        drop(cache.read(SectorId::new(1)).unwrap());
        assert_eq!(0, disk.stats().reads);
        drop(cache.read(SectorId::new(2)).unwrap());
        assert_eq!(1, disk.stats().reads);
    }

    #[test]
    fn exhausted_pool_is_an_error() {
        let (_disk, cache) = cache(2);
        let _a = cache.read(SectorId::new(1)).unwrap();
        let _b = cache.read(SectorId::new(2)).unwrap();
        assert_eq!(
            Some(Error::OutOfResource(Resource::Buffer)),
            cache.read(SectorId::new(3)).err()
        );
    }

    #[test]
    fn bio_issues_one_call_per_vec() {
        let (disk, cache) = cache(2);
        let mut data = [1u8; 4 * 512];
        let (head, tail) = data.split_at_mut(3 * 512);

        let mut bio = Bio::new(Direction::Write);
        bio.push(SectorId::new(10), head);
        bio.push(SectorId::new(20), tail);
        cache.submit(bio).unwrap();
        assert_eq!(2, disk.stats().writes);
    }

    #[test]
    fn bio_write_replaces_cached_copy() {
        let (disk, cache) = cache(4);
        assert_eq!(0, cache.read(SectorId::new(5)).unwrap()[0]);
        drop(cache.read(SectorId::new(9)).unwrap());

        let mut data = [7u8; 2 * 512];
        let mut bio = Bio::new(Direction::Write);
        bio.push(SectorId::new(4), &mut data);
        cache.submit(bio).unwrap();

        disk.reset_stats();
        assert_eq!(7, cache.read(SectorId::new(5)).unwrap()[511]);
        assert_eq!(1, disk.stats().reads);
        // 范围外的缓存不受影响
        drop(cache.read(SectorId::new(9)).unwrap());
        assert_eq!(1, disk.stats().reads);
    }
}
