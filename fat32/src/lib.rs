//! # FAT32存储引擎
//!
//! 自下而上：块缓存与[`bio`]、簇分配、inode与目录、页缓存、回写。
//! 所有状态都挂在一次挂载的[`FatFileSystem`]上，卸载即销毁。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod bio;
mod cluster;
mod collections;
mod config;
mod control;
mod format;
mod inode;
mod mapping;
mod sector;
mod time;
mod util;
pub mod volume;
mod writeback;

pub use self::{
    cluster::{ClusterError, ClusterId},
    config::{FormatOptions, MountOptions},
    control::FatFileSystem,
    format::format,
    inode::{INDEX_CAPACITY, Inode, InodeGuard},
    mapping::PAGE_SIZE,
    sector::SectorId,
    time::{Clock, EpochClock, FatTimestamp},
    volume::data::FileType,
    volume::reserved::{ClusterSectors, SectorBytes},
};

pub type Result<T> = core::result::Result<T, vfs::Error>;
