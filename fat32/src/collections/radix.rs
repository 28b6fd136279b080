//! 基数树：以页号为键的稀疏数组。
//!
//! 每个节点有 64 个槽位，每层消耗页号的 6 位。
//! 节点另为每种标记维护一个 64 位位图，
//! 内部节点的某位置位表示对应子树里至少有一个被标记的叶子，
//! 于是按标记查找只需沿置位的分支下行，开销与被标记的叶子数成正比。

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::{array, fmt};

const MAP_SHIFT: usize = 6;
const MAP_SIZE: usize = 1 << MAP_SHIFT;
const MAP_MASK: usize = MAP_SIZE - 1;
const TAG_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Tag {
    Dirty = 0,
    Writeback = 1,
}

enum Slot<T> {
    Empty,
    Leaf(T),
    Node(Box<Node<T>>),
}

struct Node<T> {
    slots: [Slot<T>; MAP_SIZE],
    /// 非空槽位数
    count: usize,
    tags: [u64; TAG_COUNT],
}

pub struct RadixTree<T> {
    root: Option<Box<Node<T>>>,
    /// 根到叶子的层数，`root`为空时无意义
    height: usize,
    len: usize,
}

impl<T> fmt::Debug for RadixTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadixTree")
            .field("height", &self.height)
            .field("len", &self.len)
            .finish()
    }
}

impl<T> Default for RadixTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Node<T> {
    fn new() -> Box<Self> {
        Box::new(Self {
            slots: array::from_fn(|_| Slot::Empty),
            count: 0,
            tags: [0; TAG_COUNT],
        })
    }

    #[inline]
    fn tagged(&self, tag: Tag, i: usize) -> bool {
        self.tags[tag as usize] & (1 << i) != 0
    }

    #[inline]
    fn set_tag(&mut self, tag: Tag, i: usize, on: bool) {
        if on {
            self.tags[tag as usize] |= 1 << i;
        } else {
            self.tags[tag as usize] &= !(1 << i);
        }
    }

    #[inline]
    fn any_tagged(&self, tag: Tag) -> bool {
        self.tags[tag as usize] != 0
    }
}

/// `height`层的树能容纳的最大页号
fn max_index(height: usize) -> usize {
    let bits = height * MAP_SHIFT;
    if bits >= usize::BITS as usize {
        usize::MAX
    } else {
        (1 << bits) - 1
    }
}

#[inline]
fn slot_of(index: usize, level: usize) -> usize {
    (index >> (level * MAP_SHIFT)) & MAP_MASK
}

impl<T> RadixTree<T> {
    pub const fn new() -> Self {
        Self {
            root: None,
            height: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[allow(dead_code)]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 插入`value`，返回被替换的旧值
    pub fn insert(&mut self, index: usize, value: T) -> Option<T> {
        if self.root.is_none() {
            self.root = Some(Node::new());
            self.height = 1;
        }
        while index > max_index(self.height) {
            self.grow();
        }

        let mut level = self.height - 1;
        let mut node = self.root.as_deref_mut()?;
        while level > 0 {
            let i = slot_of(index, level);
            if let Slot::Empty = node.slots[i] {
                node.slots[i] = Slot::Node(Node::new());
                node.count += 1;
            }
            node = match &mut node.slots[i] {
                Slot::Node(child) => &mut **child,
                _ => unreachable!("leaf above the bottom level"),
            };
            level -= 1;
        }

        let i = slot_of(index, 0);
        match core::mem::replace(&mut node.slots[i], Slot::Leaf(value)) {
            Slot::Leaf(old) => Some(old),
            _ => {
                node.count += 1;
                self.len += 1;
                None
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index > max_index(self.height) {
            return None;
        }
        let mut node = self.root.as_deref()?;
        for level in (1..self.height).rev() {
            node = match &node.slots[slot_of(index, level)] {
                Slot::Node(child) => &**child,
                _ => return None,
            };
        }
        match &node.slots[slot_of(index, 0)] {
            Slot::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index > max_index(self.height) {
            return None;
        }
        let mut node = self.root.as_deref_mut()?;
        for level in (1..self.height).rev() {
            node = match &mut node.slots[slot_of(index, level)] {
                Slot::Node(child) => &mut **child,
                _ => return None,
            };
        }
        match &mut node.slots[slot_of(index, 0)] {
            Slot::Leaf(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    #[allow(dead_code)]
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index > max_index(self.height) {
            return None;
        }
        let height = self.height;
        let root = self.root.as_deref_mut()?;
        let removed = Self::remove_in(root, height - 1, index);
        if removed.is_some() {
            self.len -= 1;
            if root.count == 0 {
                self.root = None;
                self.height = 0;
            }
        }
        removed
    }

    /// 标记一个已存在的叶子，返回叶子是否存在
    pub fn tag_set(&mut self, index: usize, tag: Tag) -> bool {
        if index > max_index(self.height) {
            return false;
        }
        let height = self.height;
        match self.root.as_deref_mut() {
            Some(root) => Self::tag_set_in(root, height - 1, index, tag),
            None => false,
        }
    }

    pub fn tag_clear(&mut self, index: usize, tag: Tag) {
        if index > max_index(self.height) {
            return;
        }
        let height = self.height;
        if let Some(root) = self.root.as_deref_mut() {
            Self::tag_clear_in(root, height - 1, index, tag);
        }
    }

    #[allow(dead_code)]
    pub fn tag_get(&self, index: usize, tag: Tag) -> bool {
        if index > max_index(self.height) {
            return false;
        }
        let Some(mut node) = self.root.as_deref() else {
            return false;
        };
        for level in (1..self.height).rev() {
            let i = slot_of(index, level);
            if !node.tagged(tag, i) {
                return false;
            }
            node = match &node.slots[i] {
                Slot::Node(child) => &**child,
                _ => return false,
            };
        }
        node.tagged(tag, slot_of(index, 0))
    }

    /// 整棵树是否有带`tag`的叶子
    pub fn any_tagged(&self, tag: Tag) -> bool {
        self.root.as_ref().is_some_and(|root| root.any_tagged(tag))
    }

    /// 按页号升序收集从`start`起至多`limit`个带`tag`的页号
    pub fn tagged(&self, tag: Tag, start: usize, limit: usize) -> Vec<usize> {
        let mut found = Vec::new();
        if let Some(root) = self.root.as_deref() {
            Self::collect_tagged(root, self.height - 1, 0, tag, start, limit, &mut found);
        }
        found
    }

    /// 按页号升序收集所有页号
    #[allow(dead_code)]
    pub fn indices(&self) -> Vec<usize> {
        let mut found = Vec::with_capacity(self.len);
        if let Some(root) = self.root.as_deref() {
            Self::collect_all(root, self.height - 1, 0, &mut found);
        }
        found
    }

    /// 只保留`keep`返回真的叶子
    pub fn retain(&mut self, mut keep: impl FnMut(usize, &mut T) -> bool) {
        let height = self.height;
        let Some(root) = self.root.as_deref_mut() else {
            return;
        };
        let removed = Self::retain_in(root, height - 1, 0, &mut keep);
        self.len -= removed;
        if root.count == 0 {
            self.root = None;
            self.height = 0;
        }
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.height = 0;
        self.len = 0;
    }
}

impl<T> RadixTree<T> {
    /// 加高一层，旧根成为新根的0号子节点
    fn grow(&mut self) {
        let Some(old) = self.root.take() else {
            return;
        };
        let mut root = Node::new();
        for tag in [Tag::Dirty, Tag::Writeback] {
            root.set_tag(tag, 0, old.any_tagged(tag));
        }
        root.slots[0] = Slot::Node(old);
        root.count = 1;
        self.root = Some(root);
        self.height += 1;
    }

    fn remove_in(node: &mut Node<T>, level: usize, index: usize) -> Option<T> {
        let i = slot_of(index, level);
        if level == 0 {
            return match core::mem::replace(&mut node.slots[i], Slot::Empty) {
                Slot::Leaf(value) => {
                    node.count -= 1;
                    node.set_tag(Tag::Dirty, i, false);
                    node.set_tag(Tag::Writeback, i, false);
                    Some(value)
                }
                other => {
                    node.slots[i] = other;
                    None
                }
            };
        }

        let Slot::Node(child) = &mut node.slots[i] else {
            return None;
        };
        let removed = Self::remove_in(child, level - 1, index)?;
        let (empty, dirty, writeback) = (
            child.count == 0,
            child.any_tagged(Tag::Dirty),
            child.any_tagged(Tag::Writeback),
        );
        node.set_tag(Tag::Dirty, i, dirty);
        node.set_tag(Tag::Writeback, i, writeback);
        if empty {
            node.slots[i] = Slot::Empty;
            node.count -= 1;
        }
        Some(removed)
    }

    fn tag_set_in(node: &mut Node<T>, level: usize, index: usize, tag: Tag) -> bool {
        let i = slot_of(index, level);
        let hit = match &mut node.slots[i] {
            Slot::Leaf(_) => level == 0,
            Slot::Node(child) if level > 0 => Self::tag_set_in(child, level - 1, index, tag),
            _ => false,
        };
        if hit {
            node.set_tag(tag, i, true);
        }
        hit
    }

    /// 返回清除后此节点是否仍有`tag`
    fn tag_clear_in(node: &mut Node<T>, level: usize, index: usize, tag: Tag) -> bool {
        let i = slot_of(index, level);
        if node.tagged(tag, i) {
            let still = match &mut node.slots[i] {
                Slot::Node(child) if level > 0 => Self::tag_clear_in(child, level - 1, index, tag),
                _ => false,
            };
            node.set_tag(tag, i, still);
        }
        node.any_tagged(tag)
    }

    fn collect_tagged(
        node: &Node<T>,
        level: usize,
        base: usize,
        tag: Tag,
        start: usize,
        limit: usize,
        found: &mut Vec<usize>,
    ) {
        let span = 1usize.checked_shl((level * MAP_SHIFT) as u32).unwrap_or(0);
        for i in 0..MAP_SIZE {
            if found.len() >= limit {
                return;
            }
            if !node.tagged(tag, i) {
                continue;
            }
            let first = base + i * span;
            let last = first.saturating_add(max_index(level));
            if last < start {
                continue;
            }
            match &node.slots[i] {
                Slot::Leaf(_) => found.push(first),
                Slot::Node(child) => {
                    Self::collect_tagged(child, level - 1, first, tag, start, limit, found)
                }
                Slot::Empty => {}
            }
        }
    }

    fn collect_all(node: &Node<T>, level: usize, base: usize, found: &mut Vec<usize>) {
        let span = 1usize.checked_shl((level * MAP_SHIFT) as u32).unwrap_or(0);
        for (i, slot) in node.slots.iter().enumerate() {
            match slot {
                Slot::Leaf(_) => found.push(base + i),
                Slot::Node(child) => Self::collect_all(child, level - 1, base + i * span, found),
                Slot::Empty => {}
            }
        }
    }

    /// 返回删除的叶子数
    fn retain_in(
        node: &mut Node<T>,
        level: usize,
        base: usize,
        keep: &mut impl FnMut(usize, &mut T) -> bool,
    ) -> usize {
        let span = 1usize.checked_shl((level * MAP_SHIFT) as u32).unwrap_or(0);
        let mut removed = 0;
        for i in 0..MAP_SIZE {
            let drop_slot = match &mut node.slots[i] {
                Slot::Leaf(value) => !keep(base + i, value),
                Slot::Node(child) => {
                    removed += Self::retain_in(child, level - 1, base + i * span, keep);
                    let tags = (child.any_tagged(Tag::Dirty), child.any_tagged(Tag::Writeback));
                    let empty = child.count == 0;
                    node.set_tag(Tag::Dirty, i, tags.0);
                    node.set_tag(Tag::Writeback, i, tags.1);
                    empty
                }
                Slot::Empty => false,
            };
            if drop_slot {
                if let Slot::Leaf(_) = node.slots[i] {
                    removed += 1;
                }
                node.slots[i] = Slot::Empty;
                node.count -= 1;
                node.set_tag(Tag::Dirty, i, false);
                node.set_tag(Tag::Writeback, i, false);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{RadixTree, Tag};

    #[test]
    fn sparse_insert_and_lookup() {
        let mut tree = RadixTree::new();
        assert_eq!(None, tree.insert(3, "a"));
        assert_eq!(None, tree.insert(70_000, "b"));
        assert_eq!(Some("a"), tree.insert(3, "c"));

        assert_eq!(2, tree.len());
        assert_eq!(Some(&"c"), tree.get(3));
        assert_eq!(Some(&"b"), tree.get(70_000));
        assert_eq!(None, tree.get(4));
        assert_eq!(vec![3, 70_000], tree.indices());

        assert_eq!(Some("c"), tree.remove(3));
        assert_eq!(None, tree.remove(3));
        assert_eq!(1, tree.len());
        assert_eq!(Some("b"), tree.remove(70_000));
        assert!(tree.is_empty());
    }

    #[test]
    fn dirty_tags_follow_leaves() {
        let mut tree = RadixTree::new();
        for i in [0, 5, 64, 4096, 4097] {
            tree.insert(i, i);
        }
        assert!(!tree.tag_set(6, Tag::Dirty));
        for i in [5, 4096, 4097] {
            assert!(tree.tag_set(i, Tag::Dirty));
        }

        assert!(tree.tag_get(4096, Tag::Dirty));
        assert!(!tree.tag_get(64, Tag::Dirty));
        assert_eq!(vec![5, 4096, 4097], tree.tagged(Tag::Dirty, 0, usize::MAX));
        assert_eq!(vec![4096, 4097], tree.tagged(Tag::Dirty, 6, usize::MAX));
        assert_eq!(vec![5], tree.tagged(Tag::Dirty, 0, 1));

        tree.tag_clear(4096, Tag::Dirty);
        tree.tag_clear(4097, Tag::Dirty);
        assert_eq!(vec![5], tree.tagged(Tag::Dirty, 0, usize::MAX));

        tree.remove(5);
        assert!(!tree.any_tagged(Tag::Dirty));
    }

    #[test]
    fn retain_prunes_and_keeps_tags() {
        let mut tree = RadixTree::new();
        for i in 0..200 {
            tree.insert(i, i);
        }
        tree.tag_set(150, Tag::Dirty);
        tree.retain(|index, _| index % 2 == 0);

        assert_eq!(100, tree.len());
        assert!(tree.get(151).is_none());
        assert_eq!(vec![150], tree.tagged(Tag::Dirty, 0, usize::MAX));
    }
}
