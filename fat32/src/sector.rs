//! 扇区号

use block_dev::BLOCK_SIZE;
use derive_more::{Add, From, Into};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, From, Into)]
#[repr(transparent)]
pub struct SectorId(usize);

impl core::ops::Add<usize> for SectorId {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        self + Self(rhs)
    }
}

impl SectorId {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// 拉伸扇区号至块ID
    #[inline]
    pub const fn block(self, sector_bytes: usize) -> usize {
        self.0 * (sector_bytes / BLOCK_SIZE)
    }
}
