//! # 簇管理
//!
//! 挂载时把第一张FAT整张读入内存，同时建立占用位图；
//! 此后分配、释放、查链都只访问内存，脏的FAT扇区在回写时写到每一张FAT。
//!
//! 不变式：位图第`c`位置位 ⇔ 缓存的FAT[c]不为空闲。

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;

use spin::{Mutex, MutexGuard};
use vfs::{Corruption, Error, Resource};

use super::Geometry;
use super::bitmap::Bitmap;
use super::reserved::{FsInfo, UNKNOWN};
use crate::Result;
use crate::bio::BufferCache;
use crate::cluster::{ClusterError, ClusterId};
use crate::util::{get_u32, put_u32};

/// 簇分配器，整卷一把锁
#[derive(Debug)]
pub struct FatManager {
    geo: Geometry,
    table: Mutex<FatTable>,
}

/// FAT在内存中的镜像，只能在持有[`FatManager`]锁时访问
#[derive(Debug)]
pub struct FatTable {
    bitmap: Bitmap,
    entries: Vec<u32>,
    free_count: u32,
    /// 下一次分配从这里开始找，只是启发式的
    next_free: u32,
    /// FSINFO需要更新
    dirty: bool,
    /// 相对FAT起点的脏扇区下标
    dirty_sectors: BTreeSet<usize>,
    entries_per_sector: usize,
}

impl FatTable {
    fn new(entries: Vec<u32>, entries_per_sector: usize) -> Self {
        let mut bitmap = Bitmap::new(entries.len());
        for (c, &value) in entries.iter().enumerate() {
            if value & 0x0FFF_FFFF != 0 {
                bitmap.set(c);
            }
        }
        // 0号与1号表项是保留的
        bitmap.set(0);
        bitmap.set(1);

        Self {
            free_count: bitmap.count_clear() as u32,
            bitmap,
            entries,
            next_free: ClusterId::MIN.into(),
            dirty: false,
            dirty_sectors: BTreeSet::new(),
            entries_per_sector,
        }
    }

    /// 卷上最大的簇号（含）
    #[inline]
    pub fn max(&self) -> ClusterId {
        ClusterId::new(self.entries.len() as u32 - 1)
    }

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    #[inline]
    pub fn next_free(&self) -> u32 {
        self.next_free
    }

    /// 缓存的表项，越界属于调用方的错误
    pub fn get(&self, id: ClusterId) -> ClusterId {
        ClusterId::new(self.entries[usize::from(id)])
    }

    #[inline]
    pub fn is_allocated(&self, id: ClusterId) -> bool {
        self.bitmap.get(id.into())
    }

    /// 改写表项，位图与空闲计数随之变化
    pub fn set(&mut self, id: ClusterId, value: ClusterId) {
        let c = usize::from(id);
        assert!(c >= usize::from(ClusterId::MIN) && c < self.entries.len());

        let was_used = self.bitmap.get(c);
        let now_used = !value.is_free();
        match (was_used, now_used) {
            (false, true) => {
                self.bitmap.set(c);
                self.free_count -= 1;
            }
            (true, false) => {
                self.bitmap.clear(c);
                self.free_count += 1;
            }
            _ => {}
        }

        self.entries[c] = value.into();
        self.dirty_sectors.insert(c / self.entries_per_sector);
        self.dirty = true;
    }

    /// 从`hint`（缺省为`next_free`）开始找空闲簇并标为链尾
    pub fn alloc(&mut self, hint: Option<ClusterId>) -> Result<ClusterId> {
        let from = hint.map_or(self.next_free as usize, usize::from);
        let c = self
            .bitmap
            .find_clear(from)
            .ok_or(Error::OutOfResource(Resource::Cluster))?;
        let id = ClusterId::new(c as u32);
        self.set(id, ClusterId::EOC);

        self.next_free = if id >= self.max() {
            ClusterId::MIN.into()
        } else {
            c as u32 + 1
        };
        log::debug!("fat: alloc cluster {c:#x}, {} left", self.free_count);

        Ok(id)
    }

    pub fn free(&mut self, id: ClusterId) {
        assert!(self.is_allocated(id), "free an unallocated cluster {id:?}");
        self.set(id, ClusterId::FREE);
        log::debug!("fat: free cluster {:#x}", u32::from(id));
    }

    /// 簇链上的下一个簇，`None`表示`id`是链尾
    pub fn next(&self, id: ClusterId) -> Result<Option<ClusterId>> {
        match self.get(id).validate(self.max()) {
            Ok(next) => Ok(Some(next)),
            Err(ClusterError::Eof) => Ok(None),
            Err(e) => {
                log::error!("fat: bad entry after cluster {:#x}: {e:?}", u32::from(id));
                Err(Error::Corrupt(Corruption::FatValue))
            }
        }
    }
}

impl FatManager {
    /// 扫描第一张FAT，建立位图与表项缓存
    pub fn load(bcache: &BufferCache, geo: &Geometry, info: Option<FsInfo>) -> Result<Self> {
        let max = usize::from(geo.max_cluster());
        let per_sector = geo.fat_entries_per_sector();
        let used_sectors = (max + 1).div_ceil(per_sector);

        let mut entries = Vec::with_capacity(max + 1);
        for sector in 0..used_sectors {
            let buf = bcache.read(geo.fat_start + sector)?;
            let want = per_sector.min(max + 1 - entries.len());
            entries.extend((0..want).map(|i| get_u32(&buf, i * 4) & 0x0FFF_FFFF));
        }
        log::trace!("fat: scanned {used_sectors} sectors");

        let mut table = FatTable::new(entries, per_sector);
        if let Some(info) = info {
            if info.free_count != UNKNOWN && info.free_count != table.free_count {
                log::warn!(
                    "fat: FSINFO claims {} free clusters, bitmap has {}",
                    info.free_count,
                    table.free_count
                );
                // 以位图为准，下次回写时纠正
                table.dirty = true;
            }
            let hint = info.next_free;
            if hint >= u32::from(ClusterId::MIN) && hint as usize <= max {
                table.next_free = hint;
            }
        }

        Ok(Self {
            geo: geo.clone(),
            table: Mutex::new(table),
        })
    }

    /// 持有分配器的锁，期间可直接读写表项
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, FatTable> {
        self.table.lock()
    }

    pub fn alloc(&self, hint: Option<ClusterId>) -> Result<ClusterId> {
        self.table.lock().alloc(hint)
    }

    /// 分配一个簇并接在`tail`之后
    pub fn append(&self, tail: Option<ClusterId>) -> Result<ClusterId> {
        let mut table = self.table.lock();
        // 尽量让文件的簇连续
        let hint = tail.map(|t| ClusterId::new(u32::from(t) + 1)).filter(|&h| h <= table.max());
        let id = table.alloc(hint)?;
        if let Some(tail) = tail {
            table.set(tail, id);
        }
        Ok(id)
    }

    pub fn next(&self, id: ClusterId) -> Result<Option<ClusterId>> {
        self.table.lock().next(id)
    }

    /// 释放以`start`为首的整条簇链，返回释放的簇数
    pub fn free_chain(&self, start: ClusterId) -> Result<usize> {
        let mut table = self.table.lock();
        let mut cur = Some(start);
        let mut count = 0;
        while let Some(id) = cur {
            cur = table.next(id)?;
            table.free(id);
            count += 1;
        }
        Ok(count)
    }

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.table.lock().free_count
    }

    /// 把脏的FAT扇区经缓冲块写到每一张FAT
    pub fn writeback(&self, bcache: &BufferCache) -> Result<()> {
        let sector_bytes = self.geo.sector_bytes;
        let (dirty, image) = {
            let mut table = self.table.lock();
            if table.dirty_sectors.is_empty() {
                return Ok(());
            }
            let dirty: Vec<usize> = core::mem::take(&mut table.dirty_sectors).into_iter().collect();
            let per_sector = table.entries_per_sector;
            let mut image = vec![0u8; dirty.len() * sector_bytes];
            for (raw, &idx) in image.chunks_exact_mut(sector_bytes).zip(&dirty) {
                let first = idx * per_sector;
                for (i, &value) in table.entries.iter().skip(first).take(per_sector).enumerate() {
                    put_u32(raw, i * 4, value);
                }
            }
            (dirty, image)
        };

        let result = self.write_mirrors(bcache, &dirty, &image);
        if result.is_err() {
            self.table.lock().dirty_sectors.extend(dirty);
        }
        result
    }

    fn write_mirrors(&self, bcache: &BufferCache, dirty: &[usize], image: &[u8]) -> Result<()> {
        let sector_bytes = self.geo.sector_bytes;
        for nth in 0..self.geo.fat_count {
            let base = self.geo.fat_mirror(nth);
            for (raw, &idx) in image.chunks_exact(sector_bytes).zip(dirty) {
                let mut buf = bcache.overwrite(base + idx)?;
                buf.copy_from_slice(raw);
                buf.release()?;
            }
        }
        log::debug!("fat: wrote back {} sectors x {} FATs", dirty.len(), self.geo.fat_count);
        Ok(())
    }

    /// 仅当计数变化过时改写FSINFO及其备份
    pub fn update_fsinfo(&self, bcache: &BufferCache) -> Result<()> {
        let info = {
            let mut table = self.table.lock();
            if !table.dirty {
                return Ok(());
            }
            table.dirty = false;
            FsInfo {
                free_count: table.free_count,
                next_free: table.next_free,
            }
        };

        let result = self.write_fsinfo(bcache, &info);
        if result.is_err() {
            self.table.lock().dirty = true;
        }
        result
    }

    fn write_fsinfo(&self, bcache: &BufferCache, info: &FsInfo) -> Result<()> {
        let sectors = core::iter::once(self.geo.fs_info).chain(self.geo.fs_info_backup());
        for sector in sectors {
            let mut buf = bcache.read(sector)?;
            info.patch(&mut buf[..]);
            buf.release()?;
        }
        log::trace!("fat: FSINFO updated, {} free", info.free_count);
        Ok(())
    }

    /// 核对位图、表项与空闲计数三者一致
    pub fn audit(&self) -> Result<()> {
        let table = self.table.lock();
        let max = usize::from(table.max());
        let mut clear = 0;
        for c in usize::from(ClusterId::MIN)..=max {
            let used = table.bitmap.get(c);
            if used == (table.entries[c] == 0) {
                log::error!("fat: bitmap disagrees with entry of cluster {c:#x}");
                return Err(Error::Corrupt(Corruption::FatValue));
            }
            if !used {
                clear += 1;
            }
        }
        if clear != table.free_count {
            return Err(Error::Corrupt(Corruption::FatValue));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;

    use block_dev::{BlockDevice, RamDisk};
    use vfs::{Error, Resource};

    use super::{FatManager, FatTable};
    use crate::bio::BufferCache;
    use crate::cluster::ClusterId;
    use crate::config::FormatOptions;
    use crate::util::get_u32;
    use crate::volume::Geometry;
    use crate::volume::reserved::Bpb;

    fn table(clusters: usize) -> FatTable {
        let mut entries = vec![0u32; clusters + 2];
        entries[0] = 0x0FFF_FFF8;
        entries[1] = ClusterId::EOC.into();
        entries[2] = ClusterId::EOC.into();
        FatTable::new(entries, 128)
    }

    #[test]
    fn alloc_until_full_then_reuse() {
        let mut table = table(8);
        assert_eq!(7, table.free_count());

        let got: Vec<u32> = (0..7).map(|_| table.alloc(None).unwrap().into()).collect();
        assert_eq!(vec![3, 4, 5, 6, 7, 8, 9], got);
        assert_eq!(0, table.free_count());
        assert_eq!(
            Some(Error::OutOfResource(Resource::Cluster)),
            table.alloc(None).err()
        );

        table.free(ClusterId::new(5));
        assert_eq!(1, table.free_count());
        assert_eq!(ClusterId::new(5), table.alloc(None).unwrap());
        assert_eq!(0, table.free_count());
    }

    #[test]
    fn next_free_wraps_to_first_data_cluster() {
        let mut table = table(4);
        for _ in 0..3 {
            table.alloc(None).unwrap();
        }
        assert_eq!(u32::from(ClusterId::MIN), table.next_free());
        table.free(ClusterId::new(3));
        assert_eq!(ClusterId::new(3), table.alloc(Some(ClusterId::new(5))).unwrap());
    }

    #[test]
    fn chain_walk_stops_at_end() {
        let mut table = table(8);
        let a = table.alloc(None).unwrap();
        let b = table.alloc(Some(a)).unwrap();
        table.set(a, b);
        assert_eq!(Some(b), table.next(a).unwrap());
        assert_eq!(None, table.next(b).unwrap());

        table.set(b, ClusterId::new(1));
        assert!(table.next(b).is_err());
    }

    #[test]
    fn fat_sectors_go_through_buffer_cache() {
        const SIZE: usize = 64 * 1024 * 1024;
        let disk = Arc::new(RamDisk::new(SIZE));
        let dev: Arc<dyn BlockDevice> = disk.clone();
        let opts = FormatOptions::default();
        crate::format(dev.clone(), SIZE, &opts).unwrap();
        let geo = Geometry::new(&Bpb::new(SIZE, &opts).unwrap());

        let bcache = BufferCache::new(dev, geo.sector_bytes, 4);
        let fat = FatManager::load(&bcache, &geo, None).unwrap();
        let id = usize::from(fat.alloc(None).unwrap());
        fat.writeback(&bcache).unwrap();

        let image = disk.snapshot();
        for nth in 0..geo.fat_count {
            let at = usize::from(geo.fat_mirror(nth)) * 512 + id * 4;
            assert_eq!(u32::from(ClusterId::EOC), get_u32(&image, at));
        }

        // 刚写回的扇区还在缓冲池里
        disk.reset_stats();
        let buf = bcache.read(geo.fat_start).unwrap();
        assert_eq!(u32::from(ClusterId::EOC), get_u32(&buf, id * 4));
        assert_eq!(0, disk.stats().reads);
    }
}
