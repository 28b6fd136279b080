use block_dev::IoError;
use derive_more::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Error {
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    InvalidName,
    /// 缓冲块、inode槽位或簇耗尽，释放资源后可重试
    #[display(fmt = "out of resource: {:?}", _0)]
    OutOfResource(Resource),
    /// 盘上数据违反了格式约束
    #[display(fmt = "filesystem corrupted: {:?}", _0)]
    Corrupt(Corruption),
    #[display(fmt = "I/O error: {}", _0)]
    Io(IoError),
}

/// 错误的大类，供调用方决定重试、上报还是卸载
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfResource,
    Corrupt,
    Io,
    NotFound,
    /// 调用方的请求本身不合法
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Buffer,
    Inode,
    Cluster,
    IndexTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// 启动扇区或FSINFO签名不符
    BadSignature,
    /// BPB给出的几何参数不可用
    BadGeometry,
    /// 空闲标记出现在未结束的长名链中间
    FreeMarkerOrder,
    /// 长目录项的校验和与短目录项不符
    ChecksumMismatch,
    /// 长目录项序号不连续
    LongNameOrder,
    /// 名称无法解码
    BadName,
    /// FAT表项越界
    FatValue,
    /// 目录项指向的父目录不存在
    MissingParent,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfResource(_) => ErrorKind::OutOfResource,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::Io(_) => ErrorKind::Io,
            Self::NotFound => ErrorKind::NotFound,
            Self::AlreadyExists
            | Self::IsADirectory
            | Self::NotADirectory
            | Self::DirectoryNotEmpty
            | Self::InvalidName => ErrorKind::Invalid,
        }
    }
}

impl From<Resource> for Error {
    fn from(res: Resource) -> Self {
        Self::OutOfResource(res)
    }
}

impl From<Corruption> for Error {
    fn from(c: Corruption) -> Self {
        Self::Corrupt(c)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}
