use alloc::vec;
use alloc::vec::Vec;

/// 簇的占用位图，第`i`位对应`i`号簇
#[derive(Debug, Clone)]
pub struct Bitmap {
    groups: Vec<u64>,
    /// 有效位数
    bits: usize,
}

impl Bitmap {
    /// 全空的位图；末尾凑整的多余位一律置位，永远不会被分配
    pub fn new(bits: usize) -> Self {
        let mut groups = vec![0u64; bits.div_ceil(64)];
        let tail = bits % 64;
        if tail != 0 {
            if let Some(last) = groups.last_mut() {
                *last = u64::MAX << tail;
            }
        }
        Self { groups, bits }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        self.groups[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        self.groups[idx / 64] |= 1 << (idx % 64);
    }

    #[inline]
    pub fn clear(&mut self, idx: usize) {
        self.groups[idx / 64] &= !(1 << (idx % 64));
    }

    /// 从`from`开始找第一个空位，到末尾后绕回开头
    pub fn find_clear(&self, from: usize) -> Option<usize> {
        let from = if from < self.bits { from } else { 0 };
        let start = from / 64;

        // 起始组内`from`之前的位先视为占用
        let head = self.groups[start] | ((1u64 << (from % 64)) - 1);
        if head != u64::MAX {
            return Some(start * 64 + head.trailing_ones() as usize);
        }

        let n = self.groups.len();
        (1..=n)
            .map(|step| (start + step) % n)
            .find_map(|group_index| {
                let bits = self.groups[group_index];
                (bits != u64::MAX).then(|| group_index * 64 + bits.trailing_ones() as usize)
            })
    }

    /// 空位总数
    pub fn count_clear(&self) -> usize {
        self.groups.iter().map(|g| g.count_zeros() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Bitmap;

    #[test]
    fn wrap_around() {
        let mut map = Bitmap::new(130);
        assert_eq!(130, map.count_clear());

        for i in 0..130 {
            map.set(i);
        }
        assert_eq!(None, map.find_clear(0));
        assert_eq!(0, map.count_clear());

        map.clear(5);
        assert_eq!(Some(5), map.find_clear(100));
        assert_eq!(Some(5), map.find_clear(5));
        map.clear(129);
        assert_eq!(Some(129), map.find_clear(6));
        assert_eq!(Some(5), map.find_clear(130));
        assert!(!map.get(129));
    }
}
