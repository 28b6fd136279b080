/// FAT表项的有效位只有低28位
const VALID_MASK: u32 = 0x0FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClusterId(u32);

#[derive(Debug, PartialEq, Eq)]
pub enum ClusterError {
    Free,
    Defective,
    Reserved,
    Eof,
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::FREE
    }
}

impl From<u32> for ClusterId {
    fn from(raw: u32) -> Self {
        Self(raw & VALID_MASK)
    }
}

impl From<ClusterId> for u32 {
    fn from(id: ClusterId) -> Self {
        id.0
    }
}

impl From<ClusterId> for usize {
    fn from(id: ClusterId) -> Self {
        id.0 as usize
    }
}

/// (低16位, 高16位)，即短目录项里的`fst_clus_lo`与`fst_clus_hi`
impl From<(u16, u16)> for ClusterId {
    fn from((lo, hi): (u16, u16)) -> Self {
        Self::new(((hi as u32) << 16) | lo as u32)
    }
}

impl ClusterId {
    pub const FREE: Self = Self(0);

    /// 最小的可用簇号
    pub const MIN: Self = Self(2);

    /// 写入时使用的链尾标记
    pub const EOC: Self = Self(VALID_MASK);

    pub const BAD: Self = Self(0x0FFF_FFF7);

    /// FAT[0]的约定值，低字节为介质类型
    pub const MEDIA: Self = Self(0x0FFF_FFF8);

    pub const fn new(raw: u32) -> Self {
        Self(raw & VALID_MASK)
    }

    /// 0x0FFFFFF8 ~ 0x0FFFFFFF 都表示链尾
    #[inline]
    pub const fn is_eoc(self) -> bool {
        self.0 >= 0x0FFF_FFF8
    }

    #[inline]
    pub const fn is_free(self) -> bool {
        self.0 == 0
    }

    /// 校验此值能否作为簇链上的一环。
    ///
    /// `max`是卷上最大的簇号（含）。
    pub fn validate(self, max: ClusterId) -> Result<Self, ClusterError> {
        match self {
            ClusterId::FREE => Err(ClusterError::Free),
            ClusterId::BAD => Err(ClusterError::Defective),
            id if id.is_eoc() => Err(ClusterError::Eof),
            id if id < Self::MIN || id > max => Err(ClusterError::Reserved),
            id => Ok(id),
        }
    }

    /// (低16位, 高16位)
    pub const fn split(self) -> (u16, u16) {
        (self.0 as u16, (self.0 >> 16) as u16)
    }
}
