//! 挂载与格式化参数

use crate::volume::reserved::{ClusterSectors, SectorBytes};

/// 挂载参数，各缓存的容量与回写策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// 缓冲块数量
    pub buffers: usize,
    /// inode表的槽位数
    pub inodes: usize,
    /// 预读窗口的上限（页）
    pub readahead_window_max: usize,
    /// 一次缺页最多读入的页数
    pub readahead_batch_max: usize,
    /// 定时回写的周期（tick）
    pub writeback_period: u64,
    /// 缓存页超过此数时触发回写
    pub dirty_pages_high: usize,
    /// 一轮回写最多写出的页数
    pub writeback_batch: usize,
}

/// 单次文件系统操作最多涉及的块数
const MAXOPBLOCKS: usize = 10;

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            buffers: 3 * MAXOPBLOCKS,
            inodes: 200,
            readahead_window_max: 8,
            readahead_batch_max: 32,
            writeback_period: 30,
            dirty_pages_high: 1024,
            writeback_batch: 1024,
        }
    }
}

impl MountOptions {
    pub fn with_buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn with_inodes(mut self, inodes: usize) -> Self {
        self.inodes = inodes;
        self
    }

    pub fn with_readahead(mut self, window_max: usize, batch_max: usize) -> Self {
        self.readahead_window_max = window_max;
        self.readahead_batch_max = batch_max.max(1);
        self
    }

    pub fn with_writeback_period(mut self, period: u64) -> Self {
        self.writeback_period = period;
        self
    }

    pub fn with_dirty_pages_high(mut self, high: usize) -> Self {
        self.dirty_pages_high = high;
        self
    }

    pub fn with_writeback_batch(mut self, batch: usize) -> Self {
        self.writeback_batch = batch.max(1);
        self
    }
}

/// 格式化参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub sector_bytes: SectorBytes,
    /// 不指定时按磁盘大小查表
    pub cluster_sectors: Option<ClusterSectors>,
    pub fat_count: u8,
    pub reserved_sectors: u16,
    pub label: [u8; 11],
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            sector_bytes: SectorBytes::B512,
            cluster_sectors: None,
            fat_count: 2,
            reserved_sectors: 32,
            label: *b"NO NAME    ",
        }
    }
}

impl FormatOptions {
    pub fn with_cluster_sectors(mut self, spc: ClusterSectors) -> Self {
        self.cluster_sectors = Some(spc);
        self
    }

    pub fn with_fat_count(mut self, count: u8) -> Self {
        self.fat_count = count;
        self
    }

    /// 卷标不足11字节时以空格补齐，超出部分截断
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = [b' '; 11];
        for (dst, src) in self.label.iter_mut().zip(label.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        self
    }
}
