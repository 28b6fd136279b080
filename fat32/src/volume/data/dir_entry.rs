//! 32字节的短目录项与长目录项

use alloc::string::String;

use enumflags2::{BitFlags, bitflags};
use vfs::DirEntryType;

use crate::cluster::ClusterId;
use crate::time::FatTimestamp;
use crate::util::{get_u16, get_u32, put_u16, put_u32};

/// 目录项的字节数
pub const DIRENT_SIZE: usize = 32;

/// 空闲目录项的首字节
pub const FREE_MARK: u8 = 0xE5;

/// 首字节为0表示此项及之后的目录项都没用过
pub const TAIL_MARK: u8 = 0x00;

pub const DOT_NAME: [u8; 11] = *b".          ";
pub const DOTDOT_NAME: [u8; 11] = *b"..         ";

const NAME: usize = 0;
const ATTR: usize = 11;
const NTRES: usize = 12;
const CRT_TIME_TENTH: usize = 13;
const CRT_TIME: usize = 14;
const CRT_DATE: usize = 16;
const LST_ACC_DATE: usize = 18;
const FST_CLUS_HI: usize = 20;
const WRT_TIME: usize = 22;
const WRT_DATE: usize = 24;
const FST_CLUS_LO: usize = 26;
const FILE_SIZE: usize = 28;

const LDIR_ORD: usize = 0;
const LDIR_CHKSUM: usize = 13;
/// 一个长目录项容纳的UTF-16单元数
const LDIR_UNITS: usize = 13;
/// 长目录项里三段名字各自的(偏移, UTF-16单元数)
const LDIR_NAME_PARTS: [(usize, usize); 3] = [(1, 5), (14, 6), (28, 2)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[bitflags]
#[repr(u8)]
pub enum AttrFlag {
    ReadOnly = 0b0000_0001,
    Hidden = 0b0000_0010,
    /// The corresponding file is tagged as a component of the operating system
    System = 0b0000_0100,
    /// The corresponding entry contains the volume label
    VolumeID = 0b0000_1000,
    Directory = 0b0001_0000,
    /// Indicates that properties of the associated file have been modified
    Archive = 0b0010_0000,
}

/// 长目录项的属性组合
#[inline]
pub fn attr_long_name() -> BitFlags<AttrFlag> {
    AttrFlag::ReadOnly | AttrFlag::Hidden | AttrFlag::System | AttrFlag::VolumeID
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DirEntryStatus {
    /// name[0] == 0xE5
    Free,
    /// name[0] == 0，此条目后的条目皆为[`DirEntryStatus::TailFree`]
    TailFree,
    /// 长目录项
    Long,
    /// 已被使用的短目录项
    Occupied,
}

impl DirEntryStatus {
    pub fn of(raw: &[u8]) -> Self {
        match raw[NAME] {
            FREE_MARK => Self::Free,
            TAIL_MARK => Self::TailFree,
            _ if raw[ATTR] & 0x3F == attr_long_name().bits() => Self::Long,
            _ => Self::Occupied,
        }
    }

    #[inline]
    pub fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::TailFree)
    }
}

/// 文件类型，设备文件的类型借用短目录项的保留字节存放
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
}

impl FileType {
    const fn nibble(self) -> u8 {
        match self {
            Self::CharDevice => 2,
            Self::Directory => 4,
            Self::BlockDevice => 6,
            Self::Regular => 8,
        }
    }

    fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            2 => Self::CharDevice,
            4 => Self::Directory,
            6 => Self::BlockDevice,
            8 => Self::Regular,
            _ => return None,
        })
    }

    #[inline]
    pub const fn is_device(self) -> bool {
        matches!(self, Self::CharDevice | Self::BlockDevice)
    }
}

impl From<FileType> for DirEntryType {
    fn from(ty: FileType) -> Self {
        match ty {
            FileType::Regular => Self::Regular,
            FileType::Directory => Self::Directory,
            FileType::CharDevice => Self::Char,
            FileType::BlockDevice => Self::Block,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShortDirEntry {
    pub name: [u8; 11],

    pub attr: BitFlags<AttrFlag>,

    /// 类型(高4位) | 主设备号(2位) | 次设备号(2位)
    pub dev: u8,

    /// Count of tenths of a second.
    /// Range: [0, 199]
    pub crt_time_tenth: u8,

    /// Creation time, granularity is 2 seconds
    pub crt_time: u16,

    /// Creation date
    pub crt_date: u16,

    /// Last access date
    pub lst_acc_date: u16,

    /// 首簇编号，由高低两个字拼成
    cluster: ClusterId,

    /// Last modification time
    pub wrt_time: u16,

    /// Last modification date
    pub wrt_date: u16,

    /// Quantity containing size in bytes
    /// of file/directory described by this entry
    file_size: u32,
}

impl ShortDirEntry {
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut name = [0; 11];
        name.copy_from_slice(&raw[NAME..NAME + 11]);

        Self {
            name,
            attr: BitFlags::from_bits_truncate(raw[ATTR]),
            dev: raw[NTRES],
            crt_time_tenth: raw[CRT_TIME_TENTH],
            crt_time: get_u16(raw, CRT_TIME),
            crt_date: get_u16(raw, CRT_DATE),
            lst_acc_date: get_u16(raw, LST_ACC_DATE),
            cluster: (get_u16(raw, FST_CLUS_LO), get_u16(raw, FST_CLUS_HI)).into(),
            wrt_time: get_u16(raw, WRT_TIME),
            wrt_date: get_u16(raw, WRT_DATE),
            file_size: get_u32(raw, FILE_SIZE),
        }
    }

    pub fn write_to(&self, raw: &mut [u8]) {
        let (lo, hi) = self.cluster.split();

        raw[NAME..NAME + 11].copy_from_slice(&self.name);
        raw[ATTR] = self.attr.bits();
        raw[NTRES] = self.dev;
        raw[CRT_TIME_TENTH] = self.crt_time_tenth;
        put_u16(raw, CRT_TIME, self.crt_time);
        put_u16(raw, CRT_DATE, self.crt_date);
        put_u16(raw, LST_ACC_DATE, self.lst_acc_date);
        put_u16(raw, FST_CLUS_HI, hi);
        put_u16(raw, WRT_TIME, self.wrt_time);
        put_u16(raw, WRT_DATE, self.wrt_date);
        put_u16(raw, FST_CLUS_LO, lo);
        put_u32(raw, FILE_SIZE, self.file_size);
    }

    pub fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut raw = [0; DIRENT_SIZE];
        self.write_to(&mut raw);
        raw
    }

    /// "."目录项，指向目录自身
    pub fn new_dot(id: ClusterId) -> Self {
        Self {
            name: DOT_NAME,
            attr: AttrFlag::Directory.into(),
            dev: FileType::Directory.nibble() << 4,
            cluster: id,
            ..Default::default()
        }
    }

    /// ".."目录项；父目录为根时簇编号记为0
    pub fn new_dotdot(parent: ClusterId, parent_is_root: bool) -> Self {
        Self {
            name: DOTDOT_NAME,
            cluster: if parent_is_root { ClusterId::FREE } else { parent },
            ..Self::new_dot(parent)
        }
    }

    pub fn new(name: [u8; 11], ty: FileType, major: u8, minor: u8, now: FatTimestamp) -> Self {
        let attr = match ty {
            FileType::Directory => AttrFlag::Directory.into(),
            _ => AttrFlag::Archive.into(),
        };

        Self {
            name,
            attr,
            dev: encode_dev(ty, major, minor),
            crt_time_tenth: now.tenth,
            crt_time: now.time,
            crt_date: now.date,
            lst_acc_date: now.date,
            wrt_time: now.time,
            wrt_date: now.date,
            ..Default::default()
        }
    }

    #[inline]
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    #[inline]
    pub fn set_cluster(&mut self, id: ClusterId) {
        self.cluster = id;
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.file_size as usize
    }

    #[inline]
    pub fn resize(&mut self, size: usize) {
        self.file_size = size as u32;
    }

    pub fn is_dot(&self) -> bool {
        self.name == DOT_NAME || self.name == DOTDOT_NAME
    }

    pub fn is_dotdot(&self) -> bool {
        self.name == DOTDOT_NAME
    }

    /// 类型与设备号；保留字节不是我们写的就按属性判断
    pub fn file_type(&self) -> (FileType, u8, u8) {
        match FileType::from_nibble(self.dev >> 4) {
            Some(ty) if ty.is_device() => (ty, (self.dev >> 2) & 0b11, self.dev & 0b11),
            _ if self.attr.contains(AttrFlag::Directory) => (FileType::Directory, 0, 0),
            _ => (FileType::Regular, 0, 0),
        }
    }

    pub fn touch(&mut self, now: FatTimestamp) {
        self.wrt_time = now.time;
        self.wrt_date = now.date;
        self.lst_acc_date = now.date;
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.name)
    }

    /// 8.3名称还原成"NAME.EXT"的形式
    pub fn display_name(&self) -> String {
        let base = trim_spaces(&self.name[..8]);
        let ext = trim_spaces(&self.name[8..]);
        let mut name: String = base.iter().map(|&b| b as char).collect();
        if !ext.is_empty() {
            name.push('.');
            name.extend(ext.iter().map(|&b| b as char));
        }
        name
    }
}

fn trim_spaces(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &bytes[..end]
}

/// 两位主设备号与两位次设备号
pub fn encode_dev(ty: FileType, major: u8, minor: u8) -> u8 {
    (ty.nibble() << 4) | ((major & 0b11) << 2) | (minor & 0b11)
}

/// 短名称的校验和，长目录项以此确认跟随的是哪个短目录项
pub fn checksum(name: &[u8; 11]) -> u8 {
    let checksum = name.iter().fold(0u8, |sum, &b| {
        // NOTE: The operation is an unsigned char rotate right
        (if sum & 1 != 0 { 0x80 } else { 0u8 })
            .wrapping_add(sum >> 1)
            .wrapping_add(b)
    });
    log::trace!("checksum of {name:?} = {checksum:#04x}");
    checksum
}

/// 可容纳13个UTF-16单元的长目录项。
///
/// 目录项名称最长为255个单元，所以最多用到20个长目录项。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongDirEntry {
    /// 序号（1起），最后一项带[`LongDirEntry::LAST_MASK`]
    pub ord: u8,
    /// 此项跟随的短名称目录项的校验和。
    /// 若不一致则说明发生了错误
    pub chksum: u8,
    pub name: [u16; LDIR_UNITS],
}

impl LongDirEntry {
    pub const LAST_MASK: u8 = 0b0100_0000;

    /// 可为名称容纳的单元数
    pub const CAP: usize = LDIR_UNITS;

    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut name = [0; Self::CAP];
        let mut units = name.iter_mut();
        for (offset, len) in LDIR_NAME_PARTS {
            for (i, unit) in units.by_ref().take(len).enumerate() {
                *unit = get_u16(raw, offset + i * 2);
            }
        }

        Self {
            ord: raw[LDIR_ORD],
            chksum: raw[LDIR_CHKSUM],
            name,
        }
    }

    pub fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut raw = [0; DIRENT_SIZE];
        raw[LDIR_ORD] = self.ord;
        raw[ATTR] = attr_long_name().bits();
        raw[LDIR_CHKSUM] = self.chksum;

        let mut units = self.name.iter();
        for (offset, len) in LDIR_NAME_PARTS {
            for (i, &unit) in units.by_ref().take(len).enumerate() {
                put_u16(&mut raw, offset + i * 2, unit);
            }
        }
        raw
    }

    /// 去掉末项标记的序号
    #[inline]
    pub const fn order(&self) -> u8 {
        self.ord & !Self::LAST_MASK
    }

    #[inline]
    pub const fn is_last(&self) -> bool {
        self.ord & Self::LAST_MASK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_entry_layout() {
        let mut entry = ShortDirEntry::new(
            *b"HELLO   TXT",
            FileType::Regular,
            0,
            0,
            FatTimestamp::EPOCH,
        );
        entry.set_cluster(ClusterId::new(0x0012_3456));
        entry.resize(5000);

        let raw = entry.to_bytes();
        assert_eq!(b"HELLO   TXT", &raw[..11]);
        assert_eq!(0x20, raw[11]);
        assert_eq!(0x80, raw[12]);
        assert_eq!([0x12, 0x00], raw[20..22]);
        assert_eq!([0x56, 0x34], raw[26..28]);
        assert_eq!(5000u32.to_le_bytes(), raw[28..32]);
        assert_eq!(entry, ShortDirEntry::from_bytes(&raw));
        assert_eq!(DirEntryStatus::Occupied, DirEntryStatus::of(&raw));
        assert_eq!("HELLO.TXT", entry.display_name());
    }

    #[test]
    fn device_byte() {
        let entry = ShortDirEntry::new(*b"TTY        ", FileType::CharDevice, 1, 3, FatTimestamp::EPOCH);
        assert_eq!(0x27, entry.dev);
        assert_eq!((FileType::CharDevice, 1, 3), entry.file_type());

        // 其它系统写入的保留字节（小写标志）不影响类型判断
        let mut foreign = ShortDirEntry::new(*b"DIR        ", FileType::Directory, 0, 0, FatTimestamp::EPOCH);
        foreign.dev = 0x18;
        assert_eq!((FileType::Directory, 0, 0), foreign.file_type());
    }

    #[test]
    fn long_entry_layout() {
        let mut name = [0xFFFF; LongDirEntry::CAP];
        for (i, unit) in name.iter_mut().take(12).enumerate() {
            *unit = b'a' as u16 + i as u16;
        }
        name[12] = 0;
        let long = LongDirEntry {
            ord: 1 | LongDirEntry::LAST_MASK,
            chksum: 0x5A,
            name,
        };

        let raw = long.to_bytes();
        assert_eq!(0x41, raw[0]);
        assert_eq!(0x0F, raw[11]);
        assert_eq!(0, raw[12]);
        assert_eq!(0x5A, raw[13]);
        assert_eq!([b'a', 0], raw[1..3]);
        assert_eq!([b'f', 0], raw[14..16]);
        assert_eq!([b'l', 0], raw[28..30]);
        assert_eq!([0, 0], raw[26..28]);
        assert_eq!(DirEntryStatus::Long, DirEntryStatus::of(&raw));
        assert_eq!(long, LongDirEntry::from_bytes(&raw));
        assert_eq!(1, long.order());
    }

    #[test]
    fn dot_entries() {
        let dotdot = ShortDirEntry::new_dotdot(ClusterId::MIN, true);
        assert!(dotdot.is_dot() && dotdot.is_dotdot());
        assert_eq!(ClusterId::FREE, dotdot.cluster());
        assert_eq!(b"..         ", &dotdot.to_bytes()[..11]);
    }

    #[test]
    fn checksum_of_short_name() {
        // 逐字节右旋相加
        let mut sum = 0u8;
        for &b in b"AVERYL~1TXT" {
            sum = sum.rotate_right(1).wrapping_add(b);
        }
        assert_eq!(sum, checksum(b"AVERYL~1TXT"));
    }
}
