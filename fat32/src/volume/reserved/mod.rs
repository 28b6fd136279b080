//! 保留区：启动扇区与FSINFO扇区，二者在#6与#7扇区各有一份备份

mod bpb;
mod fs_info;

pub use self::bpb::{Bpb, ClusterSectors, Media, SectorBytes};
pub use self::fs_info::{FsInfo, UNKNOWN};
