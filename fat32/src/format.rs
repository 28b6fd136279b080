//! 格式化
//!
//! 0号与6号扇区写BPB，1号与7号写FSINFO，每张FAT清零后保留前三项，
//! 根目录占用2号簇并清零。

use alloc::sync::Arc;
use alloc::vec;

use block_dev::BlockDevice;

use crate::Result;
use crate::bio::{Bio, BufferCache, Direction};
use crate::cluster::ClusterId;
use crate::config::FormatOptions;
use crate::sector::SectorId;
use crate::util::put_u32;
use crate::volume::Geometry;
use crate::volume::reserved::{Bpb, FsInfo};

/// 一次清零的扇区数
const ZERO_BATCH: usize = 128;

/// 在`disk_size`字节的设备上建立空的FAT32卷
pub fn format(dev: Arc<dyn BlockDevice>, disk_size: usize, opts: &FormatOptions) -> Result<()> {
    let bpb = Bpb::new(disk_size, opts)?;
    let geo = Geometry::new(&bpb);
    let bcache = BufferCache::new(dev, geo.sector_bytes, 4);

    for sector in [SectorId::new(0), geo.backup_boot] {
        let mut buf = bcache.overwrite(sector)?;
        bpb.write_to(&mut buf);
        buf.release()?;
    }

    let info = FsInfo {
        free_count: geo.total_clusters as u32 - 1,
        next_free: u32::from(geo.root) + 1,
    };
    for sector in core::iter::once(geo.fs_info).chain(geo.fs_info_backup()) {
        let mut buf = bcache.overwrite(sector)?;
        info.write_to(&mut buf);
        buf.release()?;
    }

    let mut zeros = vec![0u8; ZERO_BATCH * geo.sector_bytes];
    for nth in 0..geo.fat_count {
        let base = geo.fat_mirror(nth);
        let mut done = 0;
        while done < geo.fat_sectors {
            let n = ZERO_BATCH.min(geo.fat_sectors - done);
            let mut bio = Bio::new(Direction::Write);
            bio.push(base + done, &mut zeros[..n * geo.sector_bytes]);
            bcache.submit(bio)?;
            done += n;
        }

        let mut buf = bcache.overwrite(base)?;
        put_u32(&mut buf, 0, 0x0FFF_FF00 | bpb.media as u32);
        put_u32(&mut buf, 4, u32::from(ClusterId::EOC));
        put_u32(&mut buf, usize::from(geo.root) * 4, u32::from(ClusterId::EOC));
        buf.release()?;
    }

    // 每簇至多128个扇区
    let mut bio = Bio::new(Direction::Write);
    bio.push(geo.cluster_sector(geo.root), &mut zeros[..geo.cluster_bytes()]);
    bcache.submit(bio)?;

    log::info!(
        "fat32: formatted {disk_size} bytes, {} clusters of {} bytes, {} FATs of {} sectors",
        geo.total_clusters,
        geo.cluster_bytes(),
        geo.fat_count,
        geo.fat_sectors
    );
    Ok(())
}
