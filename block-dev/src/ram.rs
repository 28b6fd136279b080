use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{BLOCK_SIZE, BlockDevice, IoError, check_len};

/// 内存盘，同时统计驱动被调用的次数。
///
/// 一次`read_blocks`/`write_blocks`无论传输多少块都只记一次，
/// 以此观察上层是否合并了相邻的请求。
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStats {
    pub reads: usize,
    pub writes: usize,
}

impl RamDisk {
    /// 创建`size`字节的全零内存盘，`size`向下对齐到块大小
    pub fn new(size: usize) -> Self {
        Self::from_image(vec![0; size / BLOCK_SIZE * BLOCK_SIZE])
    }

    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(image),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn blocks(&self) -> usize {
        self.data.lock().len() / BLOCK_SIZE
    }

    pub fn stats(&self) -> IoStats {
        IoStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    /// 取出整个镜像的拷贝
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn span(&self, start: usize, len: usize, disk_len: usize) -> Result<core::ops::Range<usize>, IoError> {
        check_len(len)?;
        let begin = start * BLOCK_SIZE;
        let end = begin + len;
        if end > disk_len {
            return Err(IoError::OutOfRange {
                block_id: start + len / BLOCK_SIZE - 1,
            });
        }
        Ok(begin..end)
    }
}

impl fmt::Debug for RamDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamDisk")
            .field("blocks", &self.blocks())
            .field("stats", &self.stats())
            .finish()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), IoError> {
        self.read_blocks(block_id, &mut buf[..BLOCK_SIZE])
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), IoError> {
        self.write_blocks(block_id, &buf[..BLOCK_SIZE])
    }

    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> Result<(), IoError> {
        let data = self.data.lock();
        let span = self.span(start, buf.len(), data.len())?;
        buf.copy_from_slice(&data[span]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_blocks(&self, start: usize, buf: &[u8]) -> Result<(), IoError> {
        let mut data = self.data.lock();
        let span = self.span(start, buf.len(), data.len())?;
        data[span].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_one_call_per_transfer() {
        let disk = RamDisk::new(8 * BLOCK_SIZE);
        let buf = [7u8; 3 * BLOCK_SIZE];
        disk.write_blocks(2, &buf).unwrap();

        let mut back = [0u8; 3 * BLOCK_SIZE];
        disk.read_blocks(2, &mut back).unwrap();
        assert_eq!(buf, back);
        assert_eq!(IoStats { reads: 1, writes: 1 }, disk.stats());
    }

    #[test]
    fn rejects_out_of_range() {
        let disk = RamDisk::new(4 * BLOCK_SIZE);
        let mut buf = [0u8; 2 * BLOCK_SIZE];
        assert_eq!(
            Err(IoError::OutOfRange { block_id: 4 }),
            disk.read_blocks(3, &mut buf)
        );
        assert_eq!(Err(IoError::Misaligned { len: 100 }), disk.write_blocks(0, &[0; 100]));
    }
}
