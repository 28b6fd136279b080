//! 卷的布局
//!
//! 保留区 | FAT区 | 数据区

pub mod bitmap;
pub mod data;
pub mod fat;
pub mod reserved;

use crate::cluster::ClusterId;
use crate::sector::SectorId;

use self::reserved::Bpb;

/// 挂载后不再改变的几何参数，由BPB算出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub sector_bytes: usize,
    pub cluster_sectors: usize,
    /// 第一张FAT的起始扇区
    pub fat_start: SectorId,
    /// 一张FAT占用的扇区数
    pub fat_sectors: usize,
    pub fat_count: usize,
    /// 数据区的起始扇区，即2号簇
    pub data_start: SectorId,
    pub total_clusters: usize,
    pub root: ClusterId,
    pub fs_info: SectorId,
    /// 为0时表示没有备份
    pub backup_boot: SectorId,
}

impl Geometry {
    pub fn new(bpb: &Bpb) -> Self {
        Self {
            sector_bytes: bpb.sector_bytes(),
            cluster_sectors: bpb.cluster_sectors(),
            fat_start: bpb.fat_area(),
            fat_sectors: bpb.fat_sectors(),
            fat_count: bpb.fat_count(),
            data_start: bpb.data_area(),
            total_clusters: bpb.total_clusters(),
            root: bpb.root_cluster(),
            fs_info: bpb.fs_info(),
            backup_boot: bpb.backup_boot(),
        }
    }

    #[inline]
    pub const fn cluster_bytes(&self) -> usize {
        self.sector_bytes * self.cluster_sectors
    }

    /// 卷上最大的簇号（含）
    #[inline]
    pub fn max_cluster(&self) -> ClusterId {
        ClusterId::new(self.total_clusters as u32 + 1)
    }

    /// 簇的首个扇区
    ///
    /// 数据区不占有`ClusterId::MIN`前面的簇，所以需要转换计算得到索引指向的扇区。
    #[inline]
    pub fn cluster_sector(&self, id: ClusterId) -> SectorId {
        self.data_start + (usize::from(id) - usize::from(ClusterId::MIN)) * self.cluster_sectors
    }

    /// 一个扇区能容纳多少条FAT表项
    #[inline]
    pub const fn fat_entries_per_sector(&self) -> usize {
        self.sector_bytes / 4
    }

    /// 第`nth`张FAT的起始扇区
    #[inline]
    pub fn fat_mirror(&self, nth: usize) -> SectorId {
        self.fat_start + nth * self.fat_sectors
    }

    /// FSINFO的备份位于启动扇区备份的下一扇区
    pub fn fs_info_backup(&self) -> Option<SectorId> {
        (usize::from(self.backup_boot) != 0).then(|| self.backup_boot + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::Geometry;
    use super::reserved::Bpb;
    use crate::cluster::ClusterId;
    use crate::config::FormatOptions;
    use crate::sector::SectorId;

    #[test]
    fn cluster_to_sector() {
        let bpb = Bpb::new(64 * 1024 * 1024, &FormatOptions::default()).unwrap();
        let geo = Geometry::new(&bpb);

        assert_eq!(512, geo.cluster_bytes());
        assert_eq!(geo.data_start, geo.cluster_sector(ClusterId::MIN));
        assert_eq!(geo.data_start + 3, geo.cluster_sector(ClusterId::new(5)));
        assert_eq!(geo.fat_start + geo.fat_sectors, geo.fat_mirror(1));
        assert_eq!(Some(SectorId::new(7)), geo.fs_info_backup());
        assert_eq!(geo.total_clusters + 1, usize::from(geo.max_cluster()));
    }
}
