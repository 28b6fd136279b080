use vfs::{Corruption, Error};

use crate::Result;
use crate::cluster::ClusterId;
use crate::config::FormatOptions;
use crate::sector::SectorId;
use crate::util::{get_u16, get_u32, put_u16, put_u32};

/// 启动扇区末尾的签名 [0x55, 0xAA]
const SIGNATURE: u16 = 0xAA55;

const BS_JMP_BOOT: usize = 0;
const BS_OEM_NAME: usize = 3;
const BYTS_PER_SEC: usize = 11;
const SEC_PER_CLUS: usize = 13;
const RSVD_SEC_CNT: usize = 14;
const NUM_FATS: usize = 16;
const ROOT_ENT_CNT: usize = 17;
const TOT_SEC16: usize = 19;
const MEDIA: usize = 21;
const FAT_SZ16: usize = 22;
const TOT_SEC32: usize = 32;
const FAT_SZ32: usize = 36;
const EXT_FLAGS: usize = 40;
const ROOT_CLUS: usize = 44;
const FS_INFO: usize = 48;
const BK_BOOT_SEC: usize = 50;
const BOOT_SIG: usize = 66;
const VOL_ID: usize = 67;
const VOL_LAB: usize = 71;
const FIL_SYS_TYPE: usize = 82;
const SIGNATURE_WORD: usize = 510;

/// BIOS Parameter Block BIOS参数块
/// 位于保留区的第一扇区，该扇区又名启动扇区。
///
/// 这里只保留FAT32会用到的字段，其余字段格式化时按约定值写入。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bpb {
    /// 一个扇区的字节量
    byts_per_sec: SectorBytes,

    /// 一个簇的扇区数
    sec_per_clus: ClusterSectors,

    /// 保留区的扇区数
    rsvd_sec_cnt: u16,

    /// 此卷的文件分配表(FAT)数量，建议为2
    num_fats: u8,

    /// 物理媒介的类型
    pub media: Media,

    /// 此卷的扇区总数
    tot_sec: u32,

    /// 一张FAT占用扇区数
    fat_sz32: u32,

    /// 根目录首个簇的编号，
    /// 应该为2，或首个可用的簇编号
    root_clus: u32,

    /// FSINFO所在扇区号（此扇区位于保留区），通常为1
    fs_info: u16,

    /// 非0时，表示boot备份所在扇区号（此扇区位于保留区，恒为6号）
    bk_boot_sec: u16,

    /// 卷标签，与根目录记录的卷标签一致
    /// NOTE: 若不设卷标签，则值为"NO NAME    "
    vol_lab: [u8; 11],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SectorBytes {
    B512 = 512,
    B1024 = 1024,
    B2048 = 2048,
    B4096 = 4096,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClusterSectors {
    S1 = 1,
    S2 = 2,
    S4 = 4,
    S8 = 8,
    S16 = 16,
    S32 = 32,
    S64 = 64,
    S128 = 128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Media {
    Fixed = 0xF8,
    Removable = 0xF0,
}

impl TryFrom<u16> for SectorBytes {
    type Error = Error;

    fn try_from(raw: u16) -> Result<Self> {
        Ok(match raw {
            512 => Self::B512,
            1024 => Self::B1024,
            2048 => Self::B2048,
            4096 => Self::B4096,
            _ => return Err(Error::Corrupt(Corruption::BadGeometry)),
        })
    }
}

impl TryFrom<u8> for ClusterSectors {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            1 => Self::S1,
            2 => Self::S2,
            4 => Self::S4,
            8 => Self::S8,
            16 => Self::S16,
            32 => Self::S32,
            64 => Self::S64,
            128 => Self::S128,
            _ => return Err(Error::Corrupt(Corruption::BadGeometry)),
        })
    }
}

impl From<u8> for Media {
    fn from(raw: u8) -> Self {
        if raw == Self::Removable as u8 {
            Self::Removable
        } else {
            Self::Fixed
        }
    }
}

/// 磁盘扇区数到每簇扇区数的对照表，`None`表示磁盘太小，放不下FAT32
#[derive(Debug)]
struct DiskSz2SecPerClus {
    base: [(usize, Option<ClusterSectors>); 6],
}

impl DiskSz2SecPerClus {
    fn get(&self, disk_sectors: usize) -> Option<ClusterSectors> {
        self.base
            .iter()
            .find(|(dsz, _)| disk_sectors <= *dsz)
            .and_then(|(_, spc)| *spc)
    }
}

#[rustfmt::skip]
static DS2SPC: DiskSz2SecPerClus = DiskSz2SecPerClus {
    base: [
        (66600,      None),                       // <= 32.5 MiB
        (532480,     Some(ClusterSectors::S1)),   // <= 260  MiB => 0.5k cluster
        (16777216,   Some(ClusterSectors::S8)),   // <= 8    GiB => 4k   cluster
        (33554432,   Some(ClusterSectors::S16)),  // <= 16   GB  => 8k   cluster
        (67108864,   Some(ClusterSectors::S32)),  // <= 32   GB  => 16k  cluster
        (usize::MAX, Some(ClusterSectors::S64)),  // >  32   GB  => 32k  cluster
    ],
};

impl Bpb {
    /// 为`disk_size`字节的磁盘生成BPB
    pub fn new(disk_size: usize, opts: &FormatOptions) -> Result<Self> {
        let byts_per_sec = opts.sector_bytes;
        let tot_sec = disk_size / byts_per_sec as usize;
        let sec_per_clus = opts
            .cluster_sectors
            .or_else(|| DS2SPC.get(tot_sec))
            .ok_or(Error::Corrupt(Corruption::BadGeometry))?;
        let tot_sec = u32::try_from(tot_sec).map_err(|_| Error::Corrupt(Corruption::BadGeometry))?;

        let mut bpb = Self {
            byts_per_sec,
            sec_per_clus,
            rsvd_sec_cnt: opts.reserved_sectors,
            num_fats: opts.fat_count,
            media: Media::Fixed,
            tot_sec,
            fat_sz32: 0,
            root_clus: u32::from(ClusterId::MIN),
            fs_info: 1,
            bk_boot_sec: 6,
            vol_lab: opts.label,
        };
        bpb.fat_sz32 = bpb.calc_fat_size();
        bpb.grow_fat();
        bpb.check()?;

        Ok(bpb)
    }

    /// 解析启动扇区，签名或几何参数不对都会拒绝挂载
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if get_u16(raw, SIGNATURE_WORD) != SIGNATURE {
            return Err(Error::Corrupt(Corruption::BadSignature));
        }

        // FAT32的16位字段必须为0
        if get_u16(raw, ROOT_ENT_CNT) != 0 || get_u16(raw, FAT_SZ16) != 0 {
            return Err(Error::Corrupt(Corruption::BadGeometry));
        }

        let tot_sec = match get_u16(raw, TOT_SEC16) {
            0 => get_u32(raw, TOT_SEC32),
            n => n as u32,
        };

        let mut vol_lab = [0; 11];
        vol_lab.copy_from_slice(&raw[VOL_LAB..VOL_LAB + 11]);

        let bpb = Self {
            byts_per_sec: get_u16(raw, BYTS_PER_SEC).try_into()?,
            sec_per_clus: raw[SEC_PER_CLUS].try_into()?,
            rsvd_sec_cnt: get_u16(raw, RSVD_SEC_CNT),
            num_fats: raw[NUM_FATS],
            media: raw[MEDIA].into(),
            tot_sec,
            fat_sz32: get_u32(raw, FAT_SZ32),
            root_clus: get_u32(raw, ROOT_CLUS),
            fs_info: get_u16(raw, FS_INFO),
            bk_boot_sec: get_u16(raw, BK_BOOT_SEC),
            vol_lab,
        };
        bpb.check()?;

        Ok(bpb)
    }

    /// 写出整个启动扇区，`raw`至少512字节
    pub fn write_to(&self, raw: &mut [u8]) {
        raw.fill(0);

        raw[BS_JMP_BOOT..BS_JMP_BOOT + 3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        raw[BS_OEM_NAME..BS_OEM_NAME + 8].copy_from_slice(b"rCore   ");
        put_u16(raw, BYTS_PER_SEC, self.byts_per_sec as u16);
        raw[SEC_PER_CLUS] = self.sec_per_clus as u8;
        put_u16(raw, RSVD_SEC_CNT, self.rsvd_sec_cnt);
        raw[NUM_FATS] = self.num_fats;
        raw[MEDIA] = self.media as u8;
        put_u32(raw, TOT_SEC32, self.tot_sec);
        put_u32(raw, FAT_SZ32, self.fat_sz32);
        // 运行时镜像到所有FAT
        put_u16(raw, EXT_FLAGS, 0);
        put_u32(raw, ROOT_CLUS, self.root_clus);
        put_u16(raw, FS_INFO, self.fs_info);
        put_u16(raw, BK_BOOT_SEC, self.bk_boot_sec);
        raw[BOOT_SIG] = 0x29;
        put_u32(raw, VOL_ID, 0x2023_0413);
        raw[VOL_LAB..VOL_LAB + 11].copy_from_slice(&self.vol_lab);
        raw[FIL_SYS_TYPE..FIL_SYS_TYPE + 8].copy_from_slice(b"FAT32   ");
        put_u16(raw, SIGNATURE_WORD, SIGNATURE);
    }

    pub const fn fs_info(&self) -> SectorId {
        SectorId::new(self.fs_info as usize)
    }

    pub const fn backup_boot(&self) -> SectorId {
        SectorId::new(self.bk_boot_sec as usize)
    }

    pub const fn fat_area(&self) -> SectorId {
        SectorId::new(self.rsvd_sec_cnt as usize)
    }

    pub const fn fat_count(&self) -> usize {
        self.num_fats as usize
    }

    pub fn data_area(&self) -> SectorId {
        self.fat_area() + self.fat_count() * self.fat_sectors()
    }

    pub const fn sector_bytes(&self) -> usize {
        self.byts_per_sec as usize
    }

    pub const fn cluster_sectors(&self) -> usize {
        self.sec_per_clus as usize
    }

    /// 一张FAT占用的扇区数
    pub const fn fat_sectors(&self) -> usize {
        self.fat_sz32 as usize
    }

    pub const fn total_sectors(&self) -> usize {
        self.tot_sec as usize
    }

    pub fn total_clusters(&self) -> usize {
        (self.total_sectors() - usize::from(self.data_area())) / self.cluster_sectors()
    }

    pub const fn root_cluster(&self) -> ClusterId {
        ClusterId::new(self.root_clus)
    }

    pub const fn label(&self) -> &[u8; 11] {
        &self.vol_lab
    }
}

impl Bpb {
    /// FAT32的FAT大小公式，结果可能比实际所需略大
    fn calc_fat_size(&self) -> u32 {
        let tmp1 = self.tot_sec as usize - self.rsvd_sec_cnt as usize;
        let tmp2 = (256 * self.cluster_sectors() + self.fat_count()) / 2;
        tmp1.div_ceil(tmp2) as u32
    }

    /// 簇很大时公式会少算，逐扇区加大FAT直到装得下所有表项；
    /// FAT变大后簇数只会减少，所以一定会停下
    fn grow_fat(&mut self) {
        while usize::from(self.data_area()) < self.total_sectors()
            && self.fat_sectors() * self.sector_bytes() / 4 < self.total_clusters() + 2
        {
            self.fat_sz32 += 1;
        }
    }

    fn check(&self) -> Result<()> {
        let bad = Err(Error::Corrupt(Corruption::BadGeometry));

        if self.rsvd_sec_cnt == 0 || self.num_fats == 0 || self.fat_sz32 == 0 {
            return bad;
        }
        if usize::from(self.data_area()) >= self.total_sectors() {
            return bad;
        }
        // 一张FAT必须能容纳所有簇的表项
        let fat_entries = self.fat_sectors() * self.sector_bytes() / 4;
        if fat_entries < self.total_clusters() + 2 {
            return bad;
        }
        let root = self.root_clus;
        if root < u32::from(ClusterId::MIN) || root as usize > self.total_clusters() + 1 {
            return bad;
        }
        if self.fs_info == 0 || self.fs_info >= self.rsvd_sec_cnt {
            return bad;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vfs::{Corruption, Error};

    use super::{Bpb, ClusterSectors};
    use crate::config::FormatOptions;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn cluster_size_follows_disk_size() {
        let opts = FormatOptions::default();
        assert_eq!(1, Bpb::new(64 * MIB, &opts).unwrap().cluster_sectors());
        assert_eq!(8, Bpb::new(1024 * MIB, &opts).unwrap().cluster_sectors());
        assert_eq!(
            Some(Error::Corrupt(Corruption::BadGeometry)),
            Bpb::new(16 * MIB, &opts).err()
        );

        let opts = FormatOptions::default().with_cluster_sectors(ClusterSectors::S4);
        assert_eq!(4, Bpb::new(64 * MIB, &opts).unwrap().cluster_sectors());
    }

    #[test]
    fn fat_holds_every_cluster_with_large_clusters() {
        // 64 KiB的簇：公式给出8个扇区，只够1024项，而需要1023 + 2项
        let opts = FormatOptions::default().with_cluster_sectors(ClusterSectors::S128);
        let bpb = Bpb::new(64 * MIB, &opts).unwrap();
        assert_eq!(1023, bpb.total_clusters());
        assert_eq!(9, bpb.fat_sectors());
        assert!(bpb.fat_sectors() * 512 / 4 >= bpb.total_clusters() + 2);
    }

    #[test]
    fn parse_what_was_written() {
        let bpb = Bpb::new(64 * MIB, &FormatOptions::default()).unwrap();
        let mut raw = [0u8; 512];
        bpb.write_to(&mut raw);
        assert_eq!([0x55, 0xAA], raw[510..]);
        assert_eq!(bpb, Bpb::parse(&raw).unwrap());

        assert_eq!(32, usize::from(bpb.fat_area()));
        assert_eq!(
            bpb.fat_area() + 2 * bpb.fat_sectors(),
            bpb.data_area()
        );
        assert!(bpb.fat_sectors() * 512 / 4 >= bpb.total_clusters() + 2);
    }

    #[test]
    fn reject_bad_boot_sector() {
        let bpb = Bpb::new(64 * MIB, &FormatOptions::default()).unwrap();
        let mut raw = [0u8; 512];
        bpb.write_to(&mut raw);

        let mut broken = raw;
        broken[511] = 0;
        assert_eq!(Some(Error::Corrupt(Corruption::BadSignature)), Bpb::parse(&broken).err());

        let mut broken = raw;
        broken[13] = 3;
        assert_eq!(Some(Error::Corrupt(Corruption::BadGeometry)), Bpb::parse(&broken).err());
    }
}
