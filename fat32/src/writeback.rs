//! # 回写
//!
//! 被写过的inode挂在脏链表上。回写一个inode先写出它的脏页，
//! 再把目录项写进父目录的页缓存，父目录因此变脏，随后被同样回写。
//!
//! 触发回写的有三处：定时的[`FatFileSystem::tick`]，
//! 缓存页过多时的[`FatFileSystem::balance`]，以及卸载前的[`FatFileSystem::sync_all`]。

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use crate::Result;
use crate::control::FatFileSystem;
use crate::inode::Inode;
use crate::volume::data::DIRENT_SIZE;

impl FatFileSystem {
    /// 把inode挂到脏链表上；调用方持有它的锁
    pub(crate) fn mark_dirty(&self, slot: usize) {
        let mut list = self.dirty.lock();
        if self.itable.set_queued(slot, true) {
            list.push(slot);
        }
    }

    /// 从脏链表上摘下inode
    pub(crate) fn dequeue(&self, slot: usize) {
        let mut list = self.dirty.lock();
        if self.itable.set_queued(slot, false) {
            list.retain(|&s| s != slot);
        }
    }

    /// 写出至多`limit`个脏页及目录项，返回写出的页数。
    ///
    /// 同一inode已在回写时直接返回，留待下一轮。
    pub(crate) fn sync_one(&self, inode: &Inode<'_>, limit: usize) -> Result<usize> {
        let slot = inode.slot();
        let flag = &self.itable.slots[slot].writeback;
        if flag.swap(true, Ordering::Acquire) {
            log::warn!("writeback: slot {slot} is being written back, deferred");
            return Ok(0);
        }

        let result = self.write_inode(inode, limit);
        flag.store(false, Ordering::Release);
        result
    }

    fn write_inode(&self, inode: &Inode<'_>, limit: usize) -> Result<usize> {
        let (written, in_parent) = {
            let mut inner = inode.lock()?;
            (inner.write_pages(self, limit)?, inner.dirty_in_parent)
        };
        if in_parent {
            self.flush_dirent(inode.slot(), false)?;
        }

        let inner = inode.lock()?;
        if !inner.has_dirty_pages() && !inner.dirty_in_parent {
            self.dequeue(inode.slot());
        }
        if written > 0 {
            log::debug!("writeback: slot {} wrote {written} pages", inode.slot());
        }
        Ok(written)
    }

    /// 把槽位上的短目录项写进父目录。
    ///
    /// 先锁父目录再读子项，改名与回写因此看到一致的位置。
    pub(crate) fn flush_dirent(&self, slot: usize, force: bool) -> Result<()> {
        loop {
            let Some(loc) = self.itable.location(slot) else {
                return Ok(());
            };
            let parent = match loc.parent {
                Some(parent) if !self.itable.is_unlinked(slot) => parent,
                // 根目录没有目录项，已删除的也不必再写
                _ => {
                    self.itable.slots[slot].inner.lock().dirty_in_parent = false;
                    return Ok(());
                }
            };

            let parent = Inode::dup_slot(self, parent);
            let mut dir = parent.lock()?;
            if self.itable.location(slot) != Some(loc) || self.itable.is_unlinked(slot) {
                continue;
            }

            let dirent = {
                let mut inner = self.itable.slots[slot].inner.lock();
                if !inner.valid || !(force || inner.dirty_in_parent) {
                    return Ok(());
                }
                inner.dirty_in_parent = false;
                inner.dirent
            };

            let result = dir.write_bytes(self, loc.off as usize * DIRENT_SIZE, &dirent.to_bytes());
            if result.is_err() {
                self.itable.slots[slot].inner.lock().dirty_in_parent = true;
            }
            return result.map(|_| ());
        }
    }

    /// 回写脏链表上的inode，总共至多`limit`页，返回写出的页数
    pub(crate) fn sweep(&self, limit: usize) -> Result<usize> {
        let snapshot: Vec<usize> = self.dirty.lock().clone();
        let mut budget = limit;
        let mut total = 0;

        for slot in snapshot {
            if budget == 0 {
                break;
            }
            // 槽位可能刚被回收
            let Some(generation) = self.itable.acquire(slot) else {
                continue;
            };
            let inode = Inode::from_raw(self, slot, generation);
            let written = self.sync_one(&inode, budget)?;
            budget -= written.min(budget);
            total += written;
        }

        Ok(total)
    }

    /// 回写一切：脏inode、FAT与FSINFO
    pub fn sync_all(&self) -> Result<()> {
        // 每一轮至少让最深一层的目录项落进父目录
        for pass in 0..=self.itable.capacity() {
            let pending = self.dirty.lock().len();
            if pending == 0 {
                break;
            }
            log::trace!("writeback: pass {pass}, {pending} dirty inodes");
            self.sweep(usize::MAX)?;
        }

        let left = self.dirty.lock().len();
        if left > 0 {
            log::warn!("writeback: {left} inodes are still dirty");
        }

        self.fat.writeback(&self.bcache)?;
        self.fat.update_fsinfo(&self.bcache)
    }

    /// 时钟中断：距上次回写满一个周期就回写一批
    pub fn tick(&self, now: u64) -> Result<()> {
        let last = self.last_tick.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.opts.writeback_period {
            return Ok(());
        }
        if self
            .last_tick
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // 别的线程抢先了
            return Ok(());
        }

        let written = self.sweep(self.opts.writeback_batch)?;
        log::trace!("writeback: tick {now}, {written} pages");
        self.fat.writeback(&self.bcache)?;
        self.fat.update_fsinfo(&self.bcache)
    }

    /// 缓存页过多时回写一批，再丢掉未被引用的inode的干净页
    pub fn balance(&self) -> Result<()> {
        let high = self.opts.dirty_pages_high;
        let cached = self.cached_pages.load(Ordering::Relaxed);
        if cached < high {
            return Ok(());
        }
        log::debug!("writeback: {cached} pages cached, over {high}");

        self.sweep(self.opts.writeback_batch)?;
        for slot in self.itable.unreferenced() {
            if self.cached_pages.load(Ordering::Relaxed) < high {
                break;
            }
            self.itable.slots[slot].inner.lock().drop_pages(self, true);
        }

        log::debug!(
            "writeback: {} pages cached after balance",
            self.cached_pages.load(Ordering::Relaxed)
        );
        Ok(())
    }
}
