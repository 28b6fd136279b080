use vfs::{Corruption, Error};

use crate::Result;
use crate::util::{get_u32, put_u32};

const LEAD_SIG: usize = 0;
const STRUC_SIG: usize = 484;
const FREE_COUNT: usize = 488;
const NXT_FREE: usize = 492;
const TRAIL_SIG: usize = 508;

/// 头签名
const LEAD: u32 = 0x4161_5252;
/// 额外签名
const STRUC: u32 = 0x6141_7272;
/// 尾签名
const TRAIL: u32 = 0xAA55_0000;

/// 表示“不知道”
pub const UNKNOWN: u32 = 0xFFFF_FFFF;

/// # 文件系统信息
///
/// 仅FAT32格式在用，
/// 位于#1扇区，备份于#7扇区，
/// 保存着空闲簇的信息，需要持续维护。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    /// 剩余空闲簇数量
    pub free_count: u32,

    /// 下一个空闲簇，只是提示
    pub next_free: u32,
}

impl FsInfo {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if get_u32(raw, LEAD_SIG) != LEAD
            || get_u32(raw, STRUC_SIG) != STRUC
            || get_u32(raw, TRAIL_SIG) != TRAIL
        {
            return Err(Error::Corrupt(Corruption::BadSignature));
        }

        Ok(Self {
            free_count: get_u32(raw, FREE_COUNT),
            next_free: get_u32(raw, NXT_FREE),
        })
    }

    /// 写出整个扇区
    pub fn write_to(&self, raw: &mut [u8]) {
        raw.fill(0);
        put_u32(raw, LEAD_SIG, LEAD);
        put_u32(raw, STRUC_SIG, STRUC);
        put_u32(raw, TRAIL_SIG, TRAIL);
        self.patch(raw);
    }

    /// 只改写两个计数字段
    pub fn patch(&self, raw: &mut [u8]) {
        put_u32(raw, FREE_COUNT, self.free_count);
        put_u32(raw, NXT_FREE, self.next_free);
    }
}

#[cfg(test)]
mod tests {
    use vfs::{Corruption, Error};

    use super::FsInfo;

    #[test]
    fn signatures() {
        let info = FsInfo {
            free_count: 1234,
            next_free: 3,
        };
        let mut raw = [0xAB; 512];
        info.write_to(&mut raw);
        assert_eq!(info, FsInfo::parse(&raw).unwrap());
        assert_eq!([0x00, 0x00, 0x55, 0xAA], raw[508..]);

        raw[0] = 0;
        assert_eq!(Some(Error::Corrupt(Corruption::BadSignature)), FsInfo::parse(&raw).err());
    }
}
