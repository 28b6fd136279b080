//! # 页缓存
//!
//! 每个inode有一个按页号索引的基数树，首次读写时创建。
//! 读缺页时按预读窗口一次读入多页；写只改缓存并打上脏标记，
//! 由回写把脏页合并后写盘。

mod mpage;

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use core::sync::atomic::Ordering;

use vfs::{Error, Resource};

use crate::Result;
use crate::collections::{RadixTree, Tag};
use crate::control::FatFileSystem;
use crate::inode::InodeInner;
use crate::volume::data::FileType;

pub(crate) use self::mpage::{Run, merge_runs};

pub const PAGE_SIZE: usize = 4096;

/// 顺序读的预读状态
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Readahead {
    /// 上一次缺页的页号
    last_index: Option<usize>,
    /// 下次缺页额外读入的页数
    window: usize,
}

#[derive(Debug, Default)]
pub(crate) struct AddressSpace {
    pub pages: RadixTree<Box<[u8]>>,
    pub ra: Readahead,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn has_dirty(&self) -> bool {
        self.pages.any_tagged(Tag::Dirty)
    }
}

impl Readahead {
    /// 缺页读入`[index, ra_end]`之后调整窗口：
    /// 向前推进且窗口仍落在文件内时翻倍，否则清零
    fn on_miss(&mut self, index: usize, ra_end: usize, end_index: usize, window_max: usize) {
        let forward = self.last_index.is_some_and(|last| index > last);
        if forward && ra_end + self.window <= end_index {
            self.window = if self.window == 0 {
                1
            } else {
                (self.window * 2).min(window_max)
            };
        } else {
            self.window = 0;
        }
        log::trace!("readahead: miss at {index}, window -> {}", self.window);

        self.last_index = Some(index);
    }
}

impl InodeInner {
    /// 读取`offset`处的数据，返回读到的字节数；越过文件末尾的部分不读
    pub(crate) fn read_bytes(&mut self, fs: &FatFileSystem, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let end = offset.saturating_add(buf.len()).min(self.size);
        if offset >= end {
            return Ok(0);
        }

        let last = (end - 1) / PAGE_SIZE;
        let mut pos = offset;
        while pos < end {
            let index = pos / PAGE_SIZE;
            if !self.mapping.as_ref().is_some_and(|m| m.pages.contains(index)) {
                self.fault_in(fs, index, last)?;
            }

            let in_page = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(end - pos);
            let page = self
                .mapping
                .as_ref()
                .and_then(|m| m.pages.get(index))
                .ok_or(Error::OutOfResource(Resource::Buffer))?;
            buf[pos - offset..pos - offset + n].copy_from_slice(&page[in_page..in_page + n]);
            pos += n;
        }

        Ok(end - offset)
    }

    /// 缺页：从`index`起读入一批页，数量由需要的页数与预读窗口决定
    fn fault_in(&mut self, fs: &FatFileSystem, index: usize, last_needed: usize) -> Result<()> {
        let end_index = (self.size - 1) / PAGE_SIZE;
        let mapping = self.mapping.get_or_insert_with(AddressSpace::new);

        let wanted = (last_needed - index + 1 + mapping.ra.window)
            .min(fs.opts.readahead_batch_max)
            .min(end_index - index + 1);
        // 已缓存的页可能是脏的，不能被盘上的旧内容覆盖
        let cnt = (index..index + wanted)
            .take_while(|&i| !mapping.pages.contains(i))
            .count();

        self.read_pages(fs, index, cnt)?;

        if let Some(mapping) = self.mapping.as_mut() {
            mapping
                .ra
                .on_miss(index, index + cnt - 1, end_index, fs.opts.readahead_window_max);
        }
        Ok(())
    }

    /// 写入`offset`处，必要时分配新簇；越过末尾的空隙补零
    pub(crate) fn write_bytes(&mut self, fs: &FatFileSystem, offset: usize, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // 文件大小是32位的
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= u32::MAX as usize)
            .ok_or(Error::OutOfResource(Resource::Cluster))?;

        let cluster_bytes = fs.geo.cluster_bytes();
        self.ensure_clusters(fs, end.div_ceil(cluster_bytes))?;

        let old_size = self.size;
        let new_size = if self.ty == FileType::Directory {
            // 目录的大小总是整簇，新簇必须清零
            let new_size = old_size.max(self.index.len() * cluster_bytes);
            self.fill(fs, old_size, new_size - old_size, None)?;
            new_size
        } else {
            if offset > old_size {
                self.fill(fs, old_size, offset - old_size, None)?;
            }
            old_size.max(end)
        };
        self.fill(fs, offset, buf.len(), Some(buf))?;

        self.size = new_size;
        if self.ty != FileType::Directory {
            self.dirent.resize(new_size);
            self.dirent.touch(fs.clock.now());
            self.dirty_in_parent = true;
        }
        fs.mark_dirty(self.slot);

        Ok(buf.len())
    }

    /// 把`src`（缺省为0）拷进`[offset, offset + len)`覆盖的页并标脏
    fn fill(&mut self, fs: &FatFileSystem, offset: usize, len: usize, src: Option<&[u8]>) -> Result<()> {
        let end = offset + len;
        let mut pos = offset;
        while pos < end {
            let index = pos / PAGE_SIZE;
            let in_page = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(end - pos);

            let page = self.page_for_write(fs, index, n == PAGE_SIZE)?;
            let dst = &mut page[in_page..in_page + n];
            match src {
                Some(src) => dst.copy_from_slice(&src[pos - offset..pos - offset + n]),
                None => dst.fill(0),
            }
            if let Some(mapping) = self.mapping.as_mut() {
                mapping.pages.tag_set(index, Tag::Dirty);
            }
            pos += n;
        }
        Ok(())
    }

    /// 写之前准备好页：只有页里有文件内容且不会被整页覆盖时才读盘
    fn page_for_write(&mut self, fs: &FatFileSystem, index: usize, whole: bool) -> Result<&mut [u8]> {
        let cached = self
            .mapping
            .as_ref()
            .is_some_and(|m| m.pages.contains(index));
        if !cached {
            if !whole && index * PAGE_SIZE < self.size {
                self.read_pages(fs, index, 1)?;
            } else {
                let mapping = self.mapping.get_or_insert_with(AddressSpace::new);
                mapping.pages.insert(index, Box::from([0u8; PAGE_SIZE].as_slice()));
                fs.cached_pages.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.mapping
            .as_mut()
            .and_then(|m| m.pages.get_mut(index))
            .map(|page| &mut page[..])
            .ok_or(Error::OutOfResource(Resource::Buffer))
    }

    /// 让簇链至少有`n`个簇
    pub(crate) fn ensure_clusters(&mut self, fs: &FatFileSystem, n: usize) -> Result<()> {
        while self.index.len() < n {
            if self.index.is_full() {
                return Err(Error::OutOfResource(Resource::IndexTable));
            }
            let id = fs.fat.append(self.index.last())?;
            self.index.push(id)?;
            if self.index.len() == 1 {
                self.dirent.set_cluster(id);
                self.dirty_in_parent = true;
            }
        }
        Ok(())
    }

    /// 丢弃缓存页；`keep_dirty`为真时保留脏页
    pub(crate) fn drop_pages(&mut self, fs: &FatFileSystem, keep_dirty: bool) {
        let Some(mapping) = self.mapping.as_mut() else {
            return;
        };
        let before = mapping.page_count();
        if keep_dirty {
            let dirty: BTreeSet<usize> = mapping
                .pages
                .tagged(Tag::Dirty, 0, usize::MAX)
                .into_iter()
                .collect();
            mapping.pages.retain(|index, _| dirty.contains(&index));
        } else {
            mapping.pages.clear();
        }
        let dropped = before - mapping.page_count();
        fs.cached_pages.fetch_sub(dropped, Ordering::Relaxed);

        if mapping.page_count() == 0 {
            self.mapping = None;
        }
    }

    /// 缓存的页数
    #[inline]
    pub(crate) fn page_count(&self) -> usize {
        self.mapping.as_ref().map_or(0, AddressSpace::page_count)
    }

    pub(crate) fn has_dirty_pages(&self) -> bool {
        self.mapping.as_ref().is_some_and(AddressSpace::has_dirty)
    }
}
