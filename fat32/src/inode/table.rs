//! # inode表
//!
//! 定长的槽位数组。槽位的元数据（引用计数、位置、LRU链）由一把表锁保护，
//! 槽位内容各有一把锁。空槽在空闲链上；引用计数归零的槽位仍缓存着内容，
//! 挂在LRU链上，需要新槽时从最久未用的一端回收，脏的不回收。
//!
//! 子inode占用槽位期间持有父目录的一个引用。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::AtomicBool;

use spin::Mutex;
use vfs::{Error, Resource};

use super::InodeInner;
use crate::Result;
use crate::collections::LruList;

/// 目录项在父目录中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    /// 父目录的槽位，根目录没有父目录
    pub parent: Option<usize>,
    /// 短目录项的下标（以32字节为单位）
    pub off: u32,
    /// 短目录项之前的长目录项个数
    pub longs: u8,
}

impl Location {
    pub const ROOT: Self = Self {
        parent: None,
        off: 0,
        longs: 0,
    };

    #[inline]
    fn key(&self) -> (Option<usize>, u32) {
        (self.parent, self.off)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SlotMeta {
    generation: u32,
    refcnt: usize,
    loc: Option<Location>,
    /// 目录项已删除，最后一个引用释放时截断
    unlinked: bool,
    /// 在脏链表上，不可回收
    queued: bool,
    /// 正在回收，不能再被取用
    reclaiming: bool,
}

#[derive(Debug)]
struct Meta {
    slots: Vec<SlotMeta>,
    free: Vec<usize>,
    lru: LruList,
    index: BTreeMap<(Option<usize>, u32), usize>,
}

pub(crate) struct Slot {
    pub inner: Mutex<InodeInner>,
    /// 回写进行中
    pub writeback: AtomicBool,
}

/// 取用槽位的结果
#[derive(Debug)]
pub(crate) struct Acquired {
    pub slot: usize,
    pub generation: u32,
    /// 槽位是新分配的，内容尚未加载
    pub fresh: bool,
    /// 被回收的旧槽位持有的父目录引用，须在表锁外释放
    pub evicted_parent: Option<usize>,
}

/// 释放引用的结果
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Put {
    /// 仍有引用，或已放进LRU缓存
    Kept,
    /// 最后一个引用，且目录项已删除
    Reclaim,
}

pub(crate) struct InodeTable {
    meta: Mutex<Meta>,
    pub slots: Box<[Slot]>,
}

impl InodeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            meta: Mutex::new(Meta {
                slots: (0..capacity).map(|_| SlotMeta::default()).collect(),
                free: (0..capacity).rev().collect(),
                lru: LruList::new(capacity),
                index: BTreeMap::new(),
            }),
            slots: (0..capacity)
                .map(|slot| Slot {
                    inner: Mutex::new(InodeInner::new(slot)),
                    writeback: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 取得位于`loc`的inode的槽位，没有缓存时分配一个
    pub fn get(&self, loc: Location) -> Result<Acquired> {
        let mut meta = self.meta.lock();

        if let Some(&slot) = meta.index.get(&loc.key()) {
            let entry = &mut meta.slots[slot];
            entry.refcnt += 1;
            entry.loc = Some(loc);
            let generation = entry.generation;
            if entry.refcnt == 1 {
                meta.lru.remove(slot);
            }
            return Ok(Acquired {
                slot,
                generation,
                fresh: false,
                evicted_parent: None,
            });
        }

        let (slot, evicted_parent) = match meta.free.pop() {
            Some(slot) => (slot, None),
            None => {
                let Meta { slots, lru, .. } = &mut *meta;
                let Some(victim) = lru.iter_lru().find(|&slot| !slots[slot].queued) else {
                    log::warn!("itable: all {} slots are busy", self.capacity());
                    return Err(Error::OutOfResource(Resource::Inode));
                };
                lru.remove(victim);
                let old = slots[victim].loc.take();
                if let Some(old) = old {
                    meta.index.remove(&old.key());
                }
                log::debug!("itable: evict slot {victim} at {old:?}");
                (victim, old.and_then(|old| old.parent))
            }
        };

        if let Some(parent) = loc.parent {
            let parent_meta = &mut meta.slots[parent];
            parent_meta.refcnt += 1;
            if parent_meta.refcnt == 1 {
                meta.lru.remove(parent);
            }
        }

        let entry = &mut meta.slots[slot];
        entry.generation = entry.generation.wrapping_add(1);
        entry.refcnt = 1;
        entry.loc = Some(loc);
        entry.unlinked = false;
        entry.queued = false;
        entry.reclaiming = false;
        let generation = entry.generation;
        meta.index.insert(loc.key(), slot);

        Ok(Acquired {
            slot,
            generation,
            fresh: true,
            evicted_parent,
        })
    }

    /// 为已持有引用的槽位再加一个引用
    pub fn dup(&self, slot: usize) {
        let mut meta = self.meta.lock();
        let entry = &mut meta.slots[slot];
        assert!(entry.refcnt > 0, "dup an unreferenced inode slot {slot}");
        entry.refcnt += 1;
    }

    /// 为可能未被引用的槽位取得引用，槽位已空或正在回收时失败
    pub fn acquire(&self, slot: usize) -> Option<u32> {
        let mut meta = self.meta.lock();
        let entry = &mut meta.slots[slot];
        if entry.loc.is_none() || entry.reclaiming {
            return None;
        }
        entry.refcnt += 1;
        let generation = entry.generation;
        if entry.refcnt == 1 {
            meta.lru.remove(slot);
        }
        Some(generation)
    }

    pub fn put(&self, slot: usize) -> Put {
        let mut meta = self.meta.lock();
        let entry = &mut meta.slots[slot];
        assert!(entry.refcnt > 0, "put an unreferenced inode slot {slot}");
        entry.refcnt -= 1;
        if entry.refcnt > 0 {
            return Put::Kept;
        }

        if entry.unlinked {
            entry.reclaiming = true;
            Put::Reclaim
        } else {
            meta.lru.push_front(slot);
            Put::Kept
        }
    }

    /// 回收完毕后归还槽位，返回其持有的父目录引用
    pub fn release(&self, slot: usize) -> Option<usize> {
        let mut meta = self.meta.lock();
        let entry = &mut meta.slots[slot];
        let loc = entry.loc.take();
        entry.reclaiming = false;
        entry.unlinked = false;
        entry.queued = false;
        meta.free.push(slot);
        loc.and_then(|loc| loc.parent)
    }

    /// 目录项已删除：不再能按位置找到它
    pub fn unlink(&self, slot: usize) {
        let mut meta = self.meta.lock();
        let Meta { slots, index, .. } = &mut *meta;
        let entry = &mut slots[slot];
        if !entry.unlinked {
            entry.unlinked = true;
            if let Some(loc) = entry.loc {
                if index.get(&loc.key()) == Some(&slot) {
                    index.remove(&loc.key());
                }
            }
        }
    }

    /// 目录项搬到了`loc`，返回要释放的旧父目录引用
    pub fn relocate(&self, slot: usize, loc: Location) -> Option<usize> {
        let mut meta = self.meta.lock();
        let old = meta.slots[slot].loc.replace(loc);
        if let Some(old) = old {
            meta.index.remove(&old.key());
        }
        meta.index.insert(loc.key(), slot);

        let old_parent = old.and_then(|old| old.parent);
        if old_parent == loc.parent {
            return None;
        }
        if let Some(parent) = loc.parent {
            let parent_meta = &mut meta.slots[parent];
            parent_meta.refcnt += 1;
            if parent_meta.refcnt == 1 {
                meta.lru.remove(parent);
            }
        }
        old_parent
    }

    #[inline]
    pub fn location(&self, slot: usize) -> Option<Location> {
        self.meta.lock().slots[slot].loc
    }

    /// `slot`自身或它的某个祖先是否位于`loc`
    ///
    /// 被引用的inode的祖先都在表里，沿父目录链走到根即可。
    pub fn is_within(&self, slot: usize, loc: Location) -> bool {
        let meta = self.meta.lock();
        let mut cur = Some(slot);
        while let Some(slot) = cur {
            match meta.slots[slot].loc {
                Some(at) if at.key() == loc.key() => return true,
                Some(at) => cur = at.parent,
                None => return false,
            }
        }
        false
    }

    #[inline]
    pub fn is_unlinked(&self, slot: usize) -> bool {
        self.meta.lock().slots[slot].unlinked
    }

    #[inline]
    pub fn generation(&self, slot: usize) -> u32 {
        self.meta.lock().slots[slot].generation
    }

    /// 置脏链标记，返回标记是否发生了变化
    pub fn set_queued(&self, slot: usize, queued: bool) -> bool {
        let mut meta = self.meta.lock();
        let entry = &mut meta.slots[slot];
        let changed = entry.queued != queued;
        entry.queued = queued;
        changed
    }

    /// 未被引用但仍缓存着内容的槽位，从最久未用开始
    pub fn unreferenced(&self) -> Vec<usize> {
        self.meta.lock().lru.iter_lru().collect()
    }

    /// 被引用的槽位数
    pub fn in_use(&self) -> usize {
        let meta = self.meta.lock();
        meta.slots.iter().filter(|entry| entry.refcnt > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(parent: usize, off: u32) -> Location {
        Location {
            parent: Some(parent),
            off,
            longs: 1,
        }
    }

    #[test]
    fn cached_slot_is_reused() {
        let table = InodeTable::new(3);
        let root = table.get(Location::ROOT).unwrap();
        assert!(root.fresh);

        let a = table.get(child(root.slot, 4)).unwrap();
        assert!(a.fresh);
        assert_eq!(Put::Kept, table.put(a.slot));

        let again = table.get(child(root.slot, 4)).unwrap();
        assert!(!again.fresh);
        assert_eq!(a.slot, again.slot);
        assert_eq!(a.generation, again.generation);
    }

    #[test]
    fn evicts_least_recently_used_clean_slot() {
        let table = InodeTable::new(3);
        let root = table.get(Location::ROOT).unwrap();
        let a = table.get(child(root.slot, 1)).unwrap();
        let b = table.get(child(root.slot, 2)).unwrap();
        table.put(a.slot);
        table.put(b.slot);
        // a更久未用，但它是脏的
        table.set_queued(a.slot, true);

        let c = table.get(child(root.slot, 3)).unwrap();
        assert_eq!(b.slot, c.slot);
        assert_eq!(Some(root.slot), c.evicted_parent);
        assert_ne!(b.generation, c.generation);

        let _ = table.put(c.slot);
        table.set_queued(c.slot, true);
        assert_eq!(
            Some(Error::OutOfResource(Resource::Inode)),
            table.get(child(root.slot, 9)).err()
        );
    }

    #[test]
    fn unlinked_slot_is_reclaimed() {
        let table = InodeTable::new(2);
        let root = table.get(Location::ROOT).unwrap();
        let a = table.get(child(root.slot, 7)).unwrap();
        table.dup(a.slot);

        table.unlink(a.slot);
        assert_eq!(Put::Kept, table.put(a.slot));
        assert_eq!(Put::Reclaim, table.put(a.slot));
        assert_eq!(None, table.acquire(a.slot));
        assert_eq!(Some(root.slot), table.release(a.slot));

        // 同一位置的新目录项得到新的inode
        let b = table.get(child(root.slot, 7)).unwrap();
        assert!(b.fresh);
    }

    #[test]
    fn ancestors_are_found_through_parents() {
        let table = InodeTable::new(4);
        let root = table.get(Location::ROOT).unwrap();
        let a = table.get(child(root.slot, 4)).unwrap();
        let b = table.get(child(a.slot, 2)).unwrap();

        assert!(table.is_within(b.slot, child(root.slot, 4)));
        assert!(table.is_within(b.slot, child(a.slot, 2)));
        assert!(table.is_within(a.slot, child(root.slot, 4)));
        assert!(!table.is_within(a.slot, child(a.slot, 2)));
        assert!(!table.is_within(b.slot, child(root.slot, 5)));
        assert!(!table.is_within(root.slot, child(root.slot, 4)));
    }
}
