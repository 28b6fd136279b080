//! # 目录
//!
//! 查找、列举、找插入位置、判空都是同一次线性扫描，
//! 只是遇到目录项后做的事不同，由[`Intent`]区分。
//!
//! 长目录项按盘上顺序（序号从大到小）压栈，遇到短目录项时一并弹出，
//! 校验和不符或序号不连贯都视为损坏。

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use vfs::{Corruption, DirEntry, Error};

use super::table::Location;
use super::{CachedEntry, Inode, InodeGuard, InodeInner, inode_number};
use crate::Result;
use crate::control::FatFileSystem;
use crate::mapping::PAGE_SIZE;
use crate::volume::data::{
    AttrFlag, DIRENT_SIZE, DirEntryStatus, FREE_MARK, FileType, LongDirEntry, ShortDirEntry, name,
};

/// 一次扫描要做的事
#[derive(Debug, Clone, Copy)]
pub(crate) enum Intent<'n> {
    Lookup(&'n str),
    Enumerate { limit: usize },
    /// 找能容纳`n`个目录项的连续空位
    FindInsertOffset(usize),
    IsEmpty,
    /// 统计与给定短名称争用`~N`的目录项
    CountTilde(&'n [u8; 11]),
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Found(Found),
    Missing,
    Entries { found: Vec<Found>, next: u32 },
    InsertAt(u32),
    Empty(bool),
    Tilde(usize),
}

/// 扫描到的一个文件
#[derive(Debug, Clone)]
pub(crate) struct Found {
    pub name: String,
    pub dirent: ShortDirEntry,
    /// 短目录项的下标
    pub off: u32,
    pub longs: u8,
}

impl Found {
    fn location(&self, parent: usize) -> Location {
        Location {
            parent: Some(parent),
            off: self.off,
            longs: self.longs,
        }
    }
}

/// 由短目录项和它之前的长目录项（盘上顺序）还原文件名
fn entry_name(dirent: &ShortDirEntry, chain: &[LongDirEntry]) -> Result<String> {
    if chain.is_empty() {
        return Ok(dirent.display_name());
    }

    let chksum = dirent.checksum();
    if chain.iter().any(|long| long.chksum != chksum) {
        log::error!("dir: long entries of {:?} have a bad checksum", dirent.display_name());
        return Err(Error::Corrupt(Corruption::ChecksumMismatch));
    }

    let in_order = chain[0].is_last()
        && chain
            .iter()
            .rev()
            .enumerate()
            .all(|(i, long)| long.order() as usize == i + 1);
    if !in_order {
        log::error!("dir: broken long name chain before {:?}", dirent.display_name());
        return Err(Error::Corrupt(Corruption::LongNameOrder));
    }

    name::decode_long(chain.iter().rev())
}

impl InodeInner {
    /// 从第`start`个目录项开始扫描
    pub(crate) fn walk(&mut self, fs: &FatFileSystem, intent: Intent<'_>, start: u32) -> Result<Outcome> {
        let end = (self.size / DIRENT_SIZE) as u32;
        let mut page = vec![0u8; PAGE_SIZE];
        let mut loaded = None;

        let mut chain: Vec<LongDirEntry> = Vec::new();
        let mut entries = Vec::new();
        let mut tilde = 0;
        // 连续空位：起点与长度
        let mut run: Option<(u32, usize)> = None;

        for off in start..end {
            let pos = off as usize * DIRENT_SIZE;
            let index = pos / PAGE_SIZE;
            if loaded != Some(index) {
                self.read_bytes(fs, index * PAGE_SIZE, &mut page)?;
                loaded = Some(index);
            }
            let raw = &page[pos % PAGE_SIZE..pos % PAGE_SIZE + DIRENT_SIZE];

            match DirEntryStatus::of(raw) {
                DirEntryStatus::TailFree => {
                    if !chain.is_empty() {
                        return Err(Error::Corrupt(Corruption::FreeMarkerOrder));
                    }
                    if let Intent::FindInsertOffset(_) = intent {
                        // 其后全是空位
                        return Ok(Outcome::InsertAt(run.map_or(off, |(at, _)| at)));
                    }
                    break;
                }
                DirEntryStatus::Free => {
                    if !chain.is_empty() {
                        log::error!("dir: slot {off} frees a long name in the middle");
                        return Err(Error::Corrupt(Corruption::FreeMarkerOrder));
                    }
                    if let Intent::FindInsertOffset(need) = intent {
                        let (at, len) = run.get_or_insert((off, 0));
                        *len += 1;
                        if *len >= need {
                            return Ok(Outcome::InsertAt(*at));
                        }
                    }
                }
                DirEntryStatus::Long => {
                    run = None;
                    chain.push(LongDirEntry::from_bytes(raw));
                }
                DirEntryStatus::Occupied => {
                    run = None;
                    let dirent = ShortDirEntry::from_bytes(raw);
                    let longs = core::mem::take(&mut chain);
                    if dirent.attr.contains(AttrFlag::VolumeID) {
                        continue;
                    }

                    let found = Found {
                        name: entry_name(&dirent, &longs)?,
                        dirent,
                        off,
                        longs: longs.len() as u8,
                    };
                    log::trace!("dir: slot {off} is {:?}", found.name);
                    if !dirent.is_dot() {
                        self.dcache.insert(
                            found.name.clone(),
                            CachedEntry {
                                off,
                                longs: found.longs,
                            },
                        );
                    }

                    match intent {
                        Intent::Lookup(name) if found.name == name => {
                            self.off_hint = off + 1;
                            return Ok(Outcome::Found(found));
                        }
                        Intent::Enumerate { limit } if !dirent.is_dot() => {
                            entries.push(found);
                            if entries.len() >= limit {
                                return Ok(Outcome::Entries {
                                    found: entries,
                                    next: off + 1,
                                });
                            }
                        }
                        Intent::IsEmpty if !dirent.is_dot() => return Ok(Outcome::Empty(false)),
                        Intent::CountTilde(short) if name::shares_tilde(short, &dirent.name) => {
                            tilde += 1;
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(match intent {
            Intent::Lookup(_) => Outcome::Missing,
            Intent::Enumerate { .. } => Outcome::Entries {
                found: entries,
                next: end,
            },
            Intent::FindInsertOffset(_) => Outcome::InsertAt(run.map_or(end, |(at, _)| at)),
            Intent::IsEmpty => Outcome::Empty(true),
            Intent::CountTilde(_) => Outcome::Tilde(tilde),
        })
    }

    /// 名字缓存优先，其次从上次命中处往后找，找不到再从头找一遍
    pub(crate) fn lookup(&mut self, fs: &FatFileSystem, name: &str) -> Result<Option<Found>> {
        if let Some(cached) = self.dcache.get(name).copied() {
            let mut raw = [0u8; DIRENT_SIZE];
            self.read_bytes(fs, cached.off as usize * DIRENT_SIZE, &mut raw)?;
            if DirEntryStatus::of(&raw) == DirEntryStatus::Occupied {
                return Ok(Some(Found {
                    name: name.into(),
                    dirent: ShortDirEntry::from_bytes(&raw),
                    off: cached.off,
                    longs: cached.longs,
                }));
            }
            self.dcache.remove(name);
        }

        let hint = self.off_hint;
        if let Outcome::Found(found) = self.walk(fs, Intent::Lookup(name), hint)? {
            return Ok(Some(found));
        }
        if hint != 0 {
            log::trace!("dir: {name:?} missed from hint {hint}, rescan");
            if let Outcome::Found(found) = self.walk(fs, Intent::Lookup(name), 0)? {
                return Ok(Some(found));
            }
        }
        self.off_hint = 0;
        Ok(None)
    }

    pub(crate) fn is_empty(&mut self, fs: &FatFileSystem) -> Result<bool> {
        Ok(matches!(self.walk(fs, Intent::IsEmpty, 0)?, Outcome::Empty(true)))
    }

    fn insert_offset(&mut self, fs: &FatFileSystem, need: usize) -> Result<u32> {
        Ok(match self.walk(fs, Intent::FindInsertOffset(need), 0)? {
            Outcome::InsertAt(at) => at,
            _ => (self.size / DIRENT_SIZE) as u32,
        })
    }

    /// 为`name`生成短名称，必要时加上`~N`
    fn short_name_for(&mut self, fs: &FatFileSystem, name: &str, is_dir: bool) -> Result<[u8; 11]> {
        let (short, tilde) = name::short_name(name, is_dir);
        if !tilde {
            return Ok(short);
        }
        let count = match self.walk(fs, Intent::CountTilde(&short), 0)? {
            Outcome::Tilde(count) => count,
            _ => 0,
        };
        Ok(name::with_tilde(short, count))
    }

    /// 写入一串目录项，返回短目录项所在位置
    fn insert_entry(&mut self, fs: &FatFileSystem, longs: &[LongDirEntry], dirent: &ShortDirEntry) -> Result<Location> {
        let at = self.insert_offset(fs, longs.len() + 1)?;

        let mut bytes = Vec::with_capacity((longs.len() + 1) * DIRENT_SIZE);
        for long in longs {
            bytes.extend_from_slice(&long.to_bytes());
        }
        bytes.extend_from_slice(&dirent.to_bytes());
        self.write_bytes(fs, at as usize * DIRENT_SIZE, &bytes)?;

        Ok(Location {
            parent: Some(self.slot),
            off: at + longs.len() as u32,
            longs: longs.len() as u8,
        })
    }

    /// 把整串目录项的首字节改成空闲标记
    fn remove_entry(&mut self, fs: &FatFileSystem, name: &str, off: u32, longs: u8) -> Result<()> {
        for slot in off - longs as u32..=off {
            self.write_bytes(fs, slot as usize * DIRENT_SIZE, &[FREE_MARK])?;
        }
        self.dcache.remove(name);
        Ok(())
    }
}

impl<'fs> InodeGuard<'fs> {
    fn expect_dir(&self) -> Result<()> {
        if self.ty == FileType::Directory {
            Ok(())
        } else {
            Err(Error::NotADirectory)
        }
    }

    /// `this`是本目录的句柄
    pub(crate) fn find(&mut self, this: &Inode<'fs>, name: &str) -> Result<Option<Inode<'fs>>> {
        self.expect_dir()?;
        match name {
            "." => return Ok(Some(this.clone())),
            ".." => return Ok(Some(this.parent().unwrap_or_else(|| this.clone()))),
            _ => {}
        }

        let fs = self.fs;
        match self.inner.lookup(fs, name)? {
            Some(found) => {
                let loc = found.location(self.inner.slot);
                self.child(loc, &found.dirent).map(Some)
            }
            None => Ok(None),
        }
    }

    /// 在本目录下创建文件，目录会带上"."与".."
    pub(crate) fn create(&mut self, name: &str, ty: FileType, major: u8, minor: u8) -> Result<Inode<'fs>> {
        self.expect_dir()?;
        name::validate(name)?;
        let fs = self.fs;
        if self.inner.lookup(fs, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let short = self.inner.short_name_for(fs, name, ty == FileType::Directory)?;
        let longs = name::long_entries(name, &short);
        let mut dirent = ShortDirEntry::new(short, ty, major, minor, fs.clock.now());
        let cluster = if ty.is_device() {
            None
        } else {
            Some(fs.fat.alloc(None)?)
        };
        if let Some(id) = cluster {
            dirent.set_cluster(id);
        }

        let loc = match self.inner.insert_entry(fs, &longs, &dirent) {
            Ok(loc) => loc,
            Err(e) => {
                if let Some(id) = cluster {
                    fs.fat.lock().free(id);
                }
                return Err(e);
            }
        };
        self.inner.dcache.insert(
            name.into(),
            CachedEntry {
                off: loc.off,
                longs: loc.longs,
            },
        );

        let child = self.child(loc, &dirent)?;
        if let (FileType::Directory, Some(id)) = (ty, cluster) {
            // 新簇里可能留着旧数据
            let mut data = vec![0u8; fs.geo.cluster_bytes()];
            ShortDirEntry::new_dot(id).write_to(&mut data[..DIRENT_SIZE]);
            self.dotdot().write_to(&mut data[DIRENT_SIZE..2 * DIRENT_SIZE]);
            child.lock()?.write_bytes(fs, 0, &data)?;
        }
        log::debug!(
            "dir: created {ty:?} {name:?} as {:?} at slot {} of dir {}",
            dirent.display_name(),
            loc.off,
            self.inner.slot
        );

        Ok(child)
    }

    /// 指向本目录的".."目录项，供子目录使用
    fn dotdot(&self) -> ShortDirEntry {
        let is_root = self.inner.slot == self.fs.root_slot();
        ShortDirEntry::new_dotdot(self.start().unwrap_or(self.fs.geo.root), is_root)
    }

    pub(crate) fn unlink(&mut self, name: &str) -> Result<()> {
        self.expect_dir()?;
        name::validate(name)?;
        let fs = self.fs;
        let found = self.inner.lookup(fs, name)?.ok_or(Error::NotFound)?;
        if found.dirent.file_type().0 == FileType::Directory {
            return Err(Error::IsADirectory);
        }

        let child = self.child(found.location(self.inner.slot), &found.dirent)?;
        self.inner.remove_entry(fs, name, found.off, found.longs)?;
        fs.itable.unlink(child.slot());
        log::debug!("dir: unlinked {name:?} from dir {}", self.inner.slot);
        // 没有别的引用时就地回收
        drop(child);
        Ok(())
    }

    pub(crate) fn rmdir(&mut self, name: &str) -> Result<()> {
        self.expect_dir()?;
        name::validate(name)?;
        let fs = self.fs;
        let found = self.inner.lookup(fs, name)?.ok_or(Error::NotFound)?;
        if found.dirent.file_type().0 != FileType::Directory {
            return Err(Error::NotADirectory);
        }

        let child = self.child(found.location(self.inner.slot), &found.dirent)?;
        if !child.lock()?.is_empty(fs)? {
            return Err(Error::DirectoryNotEmpty);
        }
        self.inner.remove_entry(fs, name, found.off, found.longs)?;
        fs.itable.unlink(child.slot());
        log::debug!("dir: removed dir {name:?} from dir {}", self.inner.slot);
        drop(child);
        Ok(())
    }

    /// 从字节偏移`cursor`起列举，"."与".."不在其中
    pub(crate) fn read_dir(&mut self, cursor: usize, limit: usize) -> Result<(Vec<DirEntry>, usize)> {
        self.expect_dir()?;
        if limit == 0 {
            return Ok((Vec::new(), cursor));
        }

        let fs = self.fs;
        let start = cursor.div_ceil(DIRENT_SIZE) as u32;
        let (found, next) = match self.inner.walk(fs, Intent::Enumerate { limit }, start)? {
            Outcome::Entries { found, next } => (found, next),
            _ => (Vec::new(), start),
        };

        let entries = found
            .into_iter()
            .map(|found| DirEntry {
                inode: inode_number(found.off, found.dirent.cluster()),
                ty: found.dirent.file_type().0.into(),
                name: found.name,
            })
            .collect();
        Ok((entries, next as usize * DIRENT_SIZE))
    }
}

/// 先锁目标目录再锁源目录
pub(super) fn rename<'fs>(src: &Inode<'fs>, name: &str, dst: &Inode<'fs>, new_name: &str) -> Result<()> {
    name::validate(name)?;
    name::validate(new_name)?;
    let fs = src.fs();
    let same_dir = src.slot() == dst.slot();
    if same_dir && name == new_name {
        return Ok(());
    }

    let mut dst_dir = dst.lock()?;
    dst_dir.expect_dir()?;
    let mut src_dir = if same_dir { None } else { Some(src.lock()?) };

    macro_rules! src_dir {
        () => {
            match src_dir.as_mut() {
                Some(guard) => guard,
                None => &mut dst_dir,
            }
        };
    }

    src_dir!().expect_dir()?;
    let found = src_dir!()
        .inner
        .lookup(fs, name)?
        .ok_or(Error::NotFound)?;
    let loc = found.location(src.slot());
    // 目录不能移进自身或自己的子孙；目标目录的锁已持有，须在取子项之前判断
    if fs.itable.is_within(dst.slot(), loc) {
        return Err(Error::InvalidName);
    }
    let child = src_dir!().child(loc, &found.dirent)?;
    if dst_dir.inner.lookup(fs, new_name)?.is_some() {
        return Err(Error::AlreadyExists);
    }

    let mut moved = child.lock()?;
    let is_dir = moved.ty == FileType::Directory;
    let short = dst_dir.inner.short_name_for(fs, new_name, is_dir)?;
    let longs = name::long_entries(new_name, &short);
    let mut dirent = moved.dirent;
    dirent.name = short;

    let new_loc = dst_dir.inner.insert_entry(fs, &longs, &dirent)?;
    src_dir!().inner.remove_entry(fs, name, found.off, found.longs)?;
    dst_dir.inner.dcache.insert(
        new_name.into(),
        CachedEntry {
            off: new_loc.off,
            longs: new_loc.longs,
        },
    );
    if let Some(old_parent) = fs.itable.relocate(child.slot(), new_loc) {
        fs.put_slot(old_parent)?;
    }

    moved.dirent = dirent;
    moved.dirty_in_parent = false;
    if is_dir && !same_dir {
        let dotdot = dst_dir.dotdot().to_bytes();
        moved.write_bytes(fs, DIRENT_SIZE, &dotdot)?;
    }
    log::debug!("dir: renamed {name:?} to {new_name:?}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use vfs::{Corruption, Error};

    use super::entry_name;
    use crate::time::FatTimestamp;
    use crate::volume::data::{FileType, LongDirEntry, ShortDirEntry, name};

    #[test]
    fn long_name_chain_must_be_complete_and_ordered() {
        let long_name = "a-name-spanning-three-long-entries.txt";
        let short = name::with_tilde(name::short_name(long_name, false).0, 0);
        let dirent = ShortDirEntry::new(short, FileType::Regular, 0, 0, FatTimestamp::EPOCH);
        let chain = name::long_entries(long_name, &short);
        assert_eq!(3, chain.len());
        assert_eq!(long_name, entry_name(&dirent, &chain).unwrap());

        // 丢了中间一项
        let gapped = [chain[0], chain[2]];
        assert_eq!(
            Some(Error::Corrupt(Corruption::LongNameOrder)),
            entry_name(&dirent, &gapped).err()
        );

        // 缺少带末项标记的那一项
        let headless: [LongDirEntry; 2] = [chain[1], chain[2]];
        assert_eq!(
            Some(Error::Corrupt(Corruption::LongNameOrder)),
            entry_name(&dirent, &headless).err()
        );

        let mut foreign = chain.clone();
        foreign[1].chksum ^= 1;
        assert_eq!(
            Some(Error::Corrupt(Corruption::ChecksumMismatch)),
            entry_name(&dirent, &foreign).err()
        );
    }
}
