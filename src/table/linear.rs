use super::BucketTable;
use crate::{chain::Node, sync::map::INITIAL_TABLE_SIZE};

use std::{
    fmt, mem,
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

/// A bucket table kept in a single flat array.
///
/// Before the map doubles, `reserve` copies the heads into an array twice the
/// size and swaps it in, so the doubling itself only ever writes slots that
/// already exist. The replaced array is reclaimed once no reader can still
/// hold it.
pub struct LinearTable<V> {
    array: Atomic<HeadArray<V>>,
}

struct HeadArray<V> {
    heads: Box<[Atomic<Node<V>>]>,
}

impl<V> HeadArray<V> {
    fn with_length(length: usize) -> Self {
        assert!(length.is_power_of_two());

        let heads = (0..length).map(|_| Atomic::null()).collect::<Vec<_>>();
        Self {
            heads: heads.into_boxed_slice(),
        }
    }

    fn len(&self) -> usize {
        self.heads.len()
    }
}

impl<V> Default for LinearTable<V> {
    fn default() -> Self {
        Self {
            array: Atomic::new(HeadArray::with_length(INITIAL_TABLE_SIZE)),
        }
    }
}

impl<V> LinearTable<V> {
    fn current<'g>(&self, guard: &'g Guard) -> &'g HeadArray<V> {
        // Safety: the array pointer is never null, and a replaced array is
        // only reclaimed after every guard that could have loaded it unpins.
        unsafe { self.array.load(Ordering::Acquire, guard).deref() }
    }

    /// Number of slots currently allocated.
    pub(crate) fn capacity(&self, guard: &Guard) -> usize {
        self.current(guard).len()
    }

    fn replace(&self, new_array: HeadArray<V>, guard: &Guard) {
        let old = self.array.swap(Owned::new(new_array), Ordering::AcqRel, guard);

        // Safety: `old` is no longer reachable from `self.array`.
        unsafe { defer_acquire_destroy(guard, old) };
    }
}

impl<V: Send + Sync> BucketTable<V> for LinearTable<V> {
    const MAX_BUCKETS: usize = 1 << 31;

    fn get<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Node<V>> {
        match self.current(guard).heads.get(index) {
            Some(head) => head.load(Ordering::Acquire, guard),
            // A reader that loaded a stale table size after a `reset`.
            None => Shared::null(),
        }
    }

    fn set<'g>(&self, index: usize, head: Shared<'g, Node<V>>, guard: &'g Guard) {
        let array = self.current(guard);
        assert!(
            index < array.len(),
            "bucket {index} is outside a table of {} slots",
            array.len()
        );

        array.heads[index].store(head, Ordering::Release);
    }

    fn reserve(&self, len: usize, guard: &Guard) {
        let old_array = self.current(guard);
        if len <= old_array.len() {
            return;
        }

        let new_array = HeadArray::with_length(len.next_power_of_two());
        for (old, new) in old_array.heads.iter().zip(new_array.heads.iter()) {
            new.store(old.load(Ordering::Relaxed, guard), Ordering::Relaxed);
        }
        self.replace(new_array, guard);
    }

    fn reset(&self, guard: &Guard) {
        self.replace(HeadArray::with_length(INITIAL_TABLE_SIZE), guard);
    }
}

impl<V> Drop for LinearTable<V> {
    fn drop(&mut self) {
        // Safety: `&mut self` means no reader can be holding the array.
        unsafe {
            let guard = crossbeam_epoch::unprotected();
            let array = self.array.load(Ordering::Relaxed, guard);
            mem::drop(array.into_owned());
        }
    }
}

impl<V> fmt::Debug for LinearTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();
        f.debug_struct("LinearTable")
            .field("capacity", &self.capacity(guard))
            .finish()
    }
}

unsafe fn defer_acquire_destroy<'g, T>(guard: &'g Guard, ptr: Shared<'g, T>) {
    assert!(!ptr.is_null());

    guard.defer_unchecked(move || {
        atomic::fence(Ordering::Acquire);
        mem::drop(ptr.into_owned());
    });
}
