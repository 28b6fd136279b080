//! 数据区，存放文件内容与目录项的区域，使用**簇编号**索引。
//!
//! 因为FAT条目存放着下一个簇的编号，
//! 其中`0`表示簇未分配，`1`保留，
//! 所以数据区第一个可用的簇编号（Bpb.root_clus）一般为2。

mod dir_entry;
pub mod name;

pub use self::dir_entry::*;
