//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 与内核驱动不同，这里的读写都可能失败，失败以 [`IoError`] 上报，
//! 由文件系统决定是重试还是向上传递。

#![no_std]

extern crate alloc;

mod ram;

use core::any::Any;
use core::fmt;

pub use self::ram::{IoStats, RamDisk};

/// 块的字节数，扇区大小必须是它的整数倍
pub const BLOCK_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// 访问越过了设备末尾
    OutOfRange { block_id: usize },
    /// 缓冲区长度不是块大小的整数倍
    Misaligned { len: usize },
    /// 驱动报告的错误
    Device,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { block_id } => write!(f, "block {block_id} is out of range"),
            Self::Misaligned { len } => write!(f, "buffer of {len} bytes is not block aligned"),
            Self::Device => f.write_str("device error"),
        }
    }
}

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), IoError>;

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), IoError>;

    /// 从`start`起连续读取`buf.len() / BLOCK_SIZE`个块。
    ///
    /// 默认逐块读取；能一次完成整段传输的驱动应当覆盖它。
    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> Result<(), IoError> {
        check_len(buf.len())?;
        for (i, block) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            self.read_block(start + i, block)?;
        }
        Ok(())
    }

    /// 从`start`起连续写入`buf.len() / BLOCK_SIZE`个块。
    fn write_blocks(&self, start: usize, buf: &[u8]) -> Result<(), IoError> {
        check_len(buf.len())?;
        for (i, block) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
            self.write_block(start + i, block)?;
        }
        Ok(())
    }
}

#[inline]
fn check_len(len: usize) -> Result<(), IoError> {
    if len % BLOCK_SIZE == 0 {
        Ok(())
    } else {
        Err(IoError::Misaligned { len })
    }
}
