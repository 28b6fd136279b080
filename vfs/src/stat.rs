use crate::DirEntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub ino: u64,
    pub mode: DirEntryType,
    /// Optimal I/O block size
    pub block_size: u64,
    /// Occupying 512-byte blocks
    pub blocks: u64,
    /// File size
    pub size: u64,
    pub nlink: u32,
    /// 设备文件的主/次设备号
    pub rdev: (u8, u8),
}
