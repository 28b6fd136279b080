//! 多页的批量读写
//!
//! 页号经索引表换算成一串物理扇区，物理连续的扇区合并为一段，
//! 每段只向设备发起一次传输。

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use super::{AddressSpace, PAGE_SIZE};
use crate::Result;
use crate::bio::{Bio, Direction};
use crate::collections::Tag;
use crate::control::FatFileSystem;
use crate::inode::InodeInner;
use crate::sector::SectorId;
use crate::volume::Geometry;

/// 物理连续的一段扇区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub start: SectorId,
    /// 在缓冲区中的扇区下标
    pub first: usize,
    pub len: usize,
}

/// 合并相邻扇区；`None`是没有分配簇的空洞
pub(crate) fn merge_runs(sectors: impl IntoIterator<Item = Option<SectorId>>) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for (i, sector) in sectors.into_iter().enumerate() {
        let Some(sector) = sector else {
            continue;
        };
        match runs.last_mut() {
            Some(run) if run.first + run.len == i && run.start + run.len == sector => run.len += 1,
            _ => runs.push(Run {
                start: sector,
                first: i,
                len: 1,
            }),
        }
    }
    runs
}

/// 按段切分缓冲区，组成一个请求
fn make_bio<'a>(dir: Direction, runs: &[Run], buf: &'a mut [u8], sector_bytes: usize) -> Bio<'a> {
    let mut bio = Bio::new(dir);
    let mut rest = buf;
    let mut rest_off = 0;
    for run in runs {
        let skip = run.first * sector_bytes - rest_off;
        let (_, tail) = core::mem::take(&mut rest).split_at_mut(skip);
        let (data, tail) = tail.split_at_mut(run.len * sector_bytes);
        bio.push(run.start, data);
        rest = tail;
        rest_off = (run.first + run.len) * sector_bytes;
    }
    bio
}

impl InodeInner {
    /// 第`index`页里每个扇区的物理位置
    pub(crate) fn get_block(
        &self,
        geo: &Geometry,
        index: usize,
    ) -> impl Iterator<Item = Option<SectorId>> {
        let sector_bytes = geo.sector_bytes;
        let cluster_bytes = geo.cluster_bytes();
        (0..PAGE_SIZE / sector_bytes).map(move |s| {
            let pos = index * PAGE_SIZE + s * sector_bytes;
            self.index
                .get(pos / cluster_bytes)
                .map(|cluster| geo.cluster_sector(cluster) + (pos % cluster_bytes) / sector_bytes)
        })
    }

    /// 从盘上读入`[start, start + cnt)`页，超出文件末尾的部分清零
    pub(crate) fn read_pages(&mut self, fs: &FatFileSystem, start: usize, cnt: usize) -> Result<()> {
        if cnt == 0 {
            return Ok(());
        }
        let geo = &fs.geo;
        let this = &*self;
        let runs = merge_runs((start..start + cnt).flat_map(|index| this.get_block(geo, index)));

        let mut scratch = vec![0u8; cnt * PAGE_SIZE];
        if !runs.is_empty() {
            let bio = make_bio(Direction::Read, &runs, &mut scratch, geo.sector_bytes);
            fs.bcache.submit(bio)?;
        }
        log::debug!(
            "mpage: slot {} read pages {start}..{} in {} runs",
            self.slot,
            start + cnt,
            runs.len()
        );

        let size = self.size;
        let mapping = self.mapping.get_or_insert_with(AddressSpace::new);
        for (i, chunk) in scratch.chunks_exact(PAGE_SIZE).enumerate() {
            let index = start + i;
            let mut page: Box<[u8]> = chunk.into();
            let valid = size.saturating_sub(index * PAGE_SIZE).min(PAGE_SIZE);
            page[valid..].fill(0);
            if mapping.pages.insert(index, page).is_none() {
                fs.cached_pages.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    /// 写出至多`limit`个脏页，逻辑上相邻的页合并成一批；返回写出的页数
    pub(crate) fn write_pages(&mut self, fs: &FatFileSystem, limit: usize) -> Result<usize> {
        let Some(mapping) = self.mapping.as_mut() else {
            return Ok(0);
        };
        let dirty = mapping.pages.tagged(Tag::Dirty, 0, limit);
        if dirty.is_empty() {
            return Ok(0);
        }

        let mut k = 0;
        while k < dirty.len() {
            let mut n = 1;
            while k + n < dirty.len() && dirty[k + n] == dirty[k] + n {
                n += 1;
            }
            self.write_batch(fs, &dirty[k..k + n])?;
            k += n;
        }

        Ok(dirty.len())
    }

    /// `batch`是连续的页号
    fn write_batch(&mut self, fs: &FatFileSystem, batch: &[usize]) -> Result<()> {
        let geo = &fs.geo;
        let start = batch[0];
        let this = &*self;
        let runs = merge_runs(batch.iter().flat_map(|&index| this.get_block(geo, index)));

        let Some(mapping) = self.mapping.as_mut() else {
            return Ok(());
        };
        let mut scratch = vec![0u8; batch.len() * PAGE_SIZE];
        for (i, chunk) in scratch.chunks_exact_mut(PAGE_SIZE).enumerate() {
            if let Some(page) = mapping.pages.get(start + i) {
                chunk.copy_from_slice(page);
            }
            mapping.pages.tag_set(start + i, Tag::Writeback);
        }

        let result = if runs.is_empty() {
            Ok(())
        } else {
            let bio = make_bio(Direction::Write, &runs, &mut scratch, geo.sector_bytes);
            fs.bcache.submit(bio)
        };

        for &index in batch {
            mapping.pages.tag_clear(index, Tag::Writeback);
            if result.is_ok() {
                mapping.pages.tag_clear(index, Tag::Dirty);
            }
        }
        log::debug!(
            "mpage: slot {} wrote pages {start}..{} in {} runs",
            self.slot,
            start + batch.len(),
            runs.len()
        );

        result
    }
}
