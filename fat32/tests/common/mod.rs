#![allow(dead_code)]

use std::sync::Arc;

use block_dev::RamDisk;
use fat32::{FatFileSystem, FormatOptions, MountOptions};

pub const MIB: usize = 1024 * 1024;
pub const DISK_SIZE: usize = 64 * MIB;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 格式化好的64MiB内存盘
pub fn fresh_disk() -> Arc<RamDisk> {
    fresh_disk_with(&FormatOptions::default())
}

pub fn fresh_disk_with(opts: &FormatOptions) -> Arc<RamDisk> {
    init_log();
    let disk = Arc::new(RamDisk::new(DISK_SIZE));
    fat32::format(disk.clone(), DISK_SIZE, opts).unwrap();
    disk
}

pub fn mount(disk: &Arc<RamDisk>) -> FatFileSystem {
    mount_with(disk, MountOptions::default())
}

pub fn mount_with(disk: &Arc<RamDisk>, opts: MountOptions) -> FatFileSystem {
    FatFileSystem::mount(disk.clone(), opts).unwrap()
}

/// 可复现的测试数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i % 251) as u8 ^ seed.wrapping_mul(31))
        .collect()
}
