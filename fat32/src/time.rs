//! FAT时间戳

/// 目录项里的日期与时间。
///
/// - 日期：位0-4为日，位5-8为月，位9-15为自1980年起的年数
/// - 时间：位0-4为秒/2，位5-10为分，位11-15为时
/// - `tenth`：创建时间的10毫秒部分，0-199
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
    pub tenth: u8,
}

impl FatTimestamp {
    /// 1980-01-01 00:00:00
    pub const EPOCH: Self = Self {
        date: (1 << 5) | 1,
        time: 0,
        tenth: 0,
    };

    /// 由日历时间构造，年份不早于1980
    pub fn new(year: u16, month: u8, day: u8, hour: u8, min: u8, sec: u8) -> Self {
        let year = year.saturating_sub(1980).min(127);
        Self {
            date: (year << 9) | ((month as u16 & 0xF) << 5) | (day as u16 & 0x1F),
            time: ((hour as u16 & 0x1F) << 11) | ((min as u16 & 0x3F) << 5) | (sec as u16 / 2),
            tenth: (sec % 2) * 100,
        }
    }

    pub const fn year(&self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub const fn month(&self) -> u8 {
        ((self.date >> 5) & 0xF) as u8
    }

    pub const fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }
}

impl Default for FatTimestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

/// 时钟，为新建与修改的文件打时间戳
pub trait Clock: Send + Sync {
    fn now(&self) -> FatTimestamp;
}

/// 永远停在FAT纪元的时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochClock;

impl Clock for EpochClock {
    fn now(&self) -> FatTimestamp {
        FatTimestamp::EPOCH
    }
}

#[cfg(test)]
mod tests {
    use super::FatTimestamp;

    #[test]
    fn calendar_fields() {
        let ts = FatTimestamp::new(2023, 4, 13, 21, 30, 15);
        assert_eq!(2023, ts.year());
        assert_eq!(4, ts.month());
        assert_eq!(13, ts.day());
        assert_eq!(7, ts.time & 0x1F);
        assert_eq!(100, ts.tenth);

        assert_eq!(1980, FatTimestamp::EPOCH.year());
        assert_eq!(1, FatTimestamp::EPOCH.day());
    }
}
