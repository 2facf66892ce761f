use super::map::Inner;
use crate::{
    chain::{self, Node},
    common::bits,
    table::BucketTable,
};

use std::mem;

use crossbeam_epoch::{Guard, Shared};

/// A lazy iterator over the values of every entry sharing one key, returned
/// by [`SplitOrderedMap::find`][find].
///
/// Entries with the same key are contiguous in the chain, so the iterator
/// stops at the end of their run. It yields _clones_ of the
/// values and keeps the current thread pinned until dropped; entries removed
/// meanwhile may or may not be seen, but are never freed under it.
///
/// [find]: ./struct.SplitOrderedMap.html#method.find
pub struct Find<'a, V, B> {
    inner: &'a Inner<V, B>,
    key: u32,
    so_key: u32,
    guard: Guard,
    cursor: Cursor<V>,
}

enum Cursor<V> {
    Start,
    At(*const Node<V>),
    Done,
}

impl<'a, V, B> Find<'a, V, B> {
    pub(crate) fn new(inner: &'a Inner<V, B>, key: u32) -> Self {
        Self {
            inner,
            key,
            so_key: bits::data_key(key),
            guard: crossbeam_epoch::pin(),
            cursor: Cursor::Start,
        }
    }

    /// The key whose entries this iterator yields.
    pub fn key(&self) -> u32 {
        self.key
    }

    /// Rewinds the iterator to the first entry for its key, as of now. This
    /// works after the iterator has returned `None` too, so `Find` is not
    /// fused.
    pub fn restart(&mut self) {
        self.cursor = Cursor::Start;
    }
}

impl<'a, V, B> Iterator for Find<'a, V, B>
where
    V: Clone + Send + Sync + 'static,
    B: BucketTable<V>,
{
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        let guard = &self.guard;

        let mut curr: Shared<'_, Node<V>> = match mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return None,
            Cursor::Start => {
                let head = self.inner.bucket_head_for_read(self.key, guard);
                if head.is_null() {
                    return None;
                }
                chain::seek(head, self.so_key, guard).1
            }
            Cursor::At(ptr) => Shared::from(ptr),
        };

        // Safety: `curr` was loaded while `self.guard` was pinned, and it
        // stays pinned for as long as `self` lives.
        while let Some(node) = unsafe { curr.as_ref() } {
            if node.so_key != self.so_key {
                break;
            }
            curr = node.load_next(guard);
            if node.holds(self.key) {
                self.cursor = Cursor::At(curr.as_raw());
                return node.value.clone();
            }
        }
        None
    }
}
