use alloc::string::String;

/// 目录枚举得到的一项，不含"."与".."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub inode: u64,
    pub ty: DirEntryType,
    /// 长名称，保留大小写
    pub name: String,
}

/// FAT能表示的文件类型；设备文件借用短目录项的保留字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    Block,
    Char,
    Directory,
    #[default]
    Regular,
}

impl DirEntryType {
    #[inline]
    pub const fn is_device(self) -> bool {
        matches!(self, Self::Block | Self::Char)
    }
}
