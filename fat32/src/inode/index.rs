//! 逻辑簇号到物理簇号的多级索引
//!
//! 12个直接项，50页一级间接，1页二级间接，每页1024项。

use alloc::boxed::Box;
use alloc::vec::Vec;

use vfs::{Error, Resource};

use crate::Result;
use crate::cluster::ClusterId;

const DIRECT: usize = 12;
const PER_PAGE: usize = 1024;
const SINGLE_PAGES: usize = 50;

const SINGLE_END: usize = DIRECT + SINGLE_PAGES * PER_PAGE;

/// 能索引的簇数上限
pub const CAPACITY: usize = SINGLE_END + PER_PAGE * PER_PAGE;

type IndexPage = [ClusterId; PER_PAGE];

#[derive(Debug, Default)]
pub struct IndexTable {
    direct: [ClusterId; DIRECT],
    single: Vec<Box<IndexPage>>,
    /// 二级间接页里的每一项指向一页索引
    double: Vec<Box<IndexPage>>,
    len: usize,
}

impl IndexTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == CAPACITY
    }

    /// 第`n`个逻辑簇的物理簇号
    pub fn get(&self, n: usize) -> Option<ClusterId> {
        if n >= self.len {
            return None;
        }

        Some(if n < DIRECT {
            self.direct[n]
        } else if n < SINGLE_END {
            let n = n - DIRECT;
            self.single[n / PER_PAGE][n % PER_PAGE]
        } else {
            let n = n - SINGLE_END;
            self.double[n / PER_PAGE][n % PER_PAGE]
        })
    }

    #[inline]
    pub fn last(&self) -> Option<ClusterId> {
        self.len.checked_sub(1).and_then(|n| self.get(n))
    }

    /// 在末尾记录一个簇
    pub fn push(&mut self, id: ClusterId) -> Result<()> {
        let n = self.len;
        if n >= CAPACITY {
            return Err(Error::OutOfResource(Resource::IndexTable));
        }

        if n < DIRECT {
            self.direct[n] = id;
        } else {
            let (pages, n) = if n < SINGLE_END {
                (&mut self.single, n - DIRECT)
            } else {
                (&mut self.double, n - SINGLE_END)
            };
            if n % PER_PAGE == 0 {
                pages.push(Box::new([ClusterId::FREE; PER_PAGE]));
            }
            pages[n / PER_PAGE][n % PER_PAGE] = id;
        }
        self.len += 1;

        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
