mod lru;
mod radix;

pub use self::{
    lru::LruList,
    radix::{RadixTree, Tag},
};
