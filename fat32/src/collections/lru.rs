use alloc::vec;
use alloc::vec::Vec;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
    linked: bool,
}

/// 以槽位索引为节点的双向链表，头部为最近使用，尾部为最久未用。
///
/// 节点本身存放在外部的定长数组里，链表只记录索引之间的前后关系，
/// 所以入队、出队、提到队首都是O(1)。
#[derive(Debug, Clone)]
pub struct LruList {
    links: Vec<Link>,
    head: usize,
    tail: usize,
}

impl LruList {
    pub fn new(capacity: usize) -> Self {
        Self {
            links: vec![
                Link {
                    prev: NIL,
                    next: NIL,
                    linked: false
                };
                capacity
            ],
            head: NIL,
            tail: NIL,
        }
    }

    /// 插到队首；已在链表中的节点会先摘下
    pub fn push_front(&mut self, idx: usize) {
        if self.links[idx].linked {
            self.unlink(idx);
        }

        self.links[idx] = Link {
            prev: NIL,
            next: self.head,
            linked: true,
        };
        if self.head != NIL {
            self.links[self.head].prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }

    /// 若节点在链表中则摘下，返回它原本是否在链表中
    pub fn remove(&mut self, idx: usize) -> bool {
        if !self.links[idx].linked {
            return false;
        }
        self.unlink(idx);
        true
    }

    /// 从最久未用到最近使用
    pub fn iter_lru(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.tail;
        core::iter::from_fn(move || {
            (cur != NIL).then(|| {
                let idx = cur;
                cur = self.links[idx].prev;
                idx
            })
        })
    }

    fn unlink(&mut self, idx: usize) {
        let Link { prev, next, .. } = self.links[idx];

        if prev != NIL {
            self.links[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.links[next].prev = prev;
        } else {
            self.tail = prev;
        }

        self.links[idx] = Link {
            prev: NIL,
            next: NIL,
            linked: false,
        };
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::LruList;

    #[test]
    fn order() {
        let mut lru = LruList::new(4);
        lru.push_front(0);
        lru.push_front(1);
        lru.push_front(2);
        assert_eq!(vec![0, 1, 2], lru.iter_lru().collect::<Vec<_>>());

        // 重新使用0号，它变成最近使用
        lru.push_front(0);
        assert_eq!(vec![1, 2, 0], lru.iter_lru().collect::<Vec<_>>());

        assert!(lru.remove(2));
        assert!(!lru.remove(2));
        lru.push_front(3);
        assert_eq!(vec![1, 0, 3], lru.iter_lru().collect::<Vec<_>>());

        assert!(lru.remove(1));
        assert!(lru.remove(3));
        assert!(lru.remove(0));
        assert_eq!(None, lru.iter_lru().next());
    }
}
