use super::BucketTable;
use crate::chain::Node;

use std::{
    fmt, mem,
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

const FANOUT_BITS: u32 = 10;
const FANOUT: usize = 1 << FANOUT_BITS;
const FANOUT_MASK: usize = FANOUT - 1;

/// A bucket table kept in a three-level tree of fixed-size segments.
///
/// The root holds `1024` directory pointers, each directory `1024` leaf
/// pointers, and each leaf `1024` heads. Directories and leaves are allocated
/// on the first write that needs them and are never moved afterwards, so
/// growing the table never copies a head and needs no `reserve` step.
pub struct SegmentedTable<V> {
    directories: Box<[Atomic<Directory<V>>]>,
}

struct Directory<V> {
    leaves: Box<[Atomic<Leaf<V>>]>,
}

struct Leaf<V> {
    heads: Box<[Atomic<Node<V>>]>,
}

fn null_slots<T>() -> Box<[Atomic<T>]> {
    (0..FANOUT)
        .map(|_| Atomic::null())
        .collect::<Vec<_>>()
        .into_boxed_slice()
}

/// Splits a bucket index into its (directory, leaf, head) coordinates.
#[inline]
fn locate(index: usize) -> (usize, usize, usize) {
    (
        index >> (2 * FANOUT_BITS),
        (index >> FANOUT_BITS) & FANOUT_MASK,
        index & FANOUT_MASK,
    )
}

impl<V> Default for SegmentedTable<V> {
    fn default() -> Self {
        Self {
            directories: null_slots(),
        }
    }
}

impl<V> SegmentedTable<V> {
    /// Number of leaf segments currently allocated.
    pub(crate) fn allocated_leaves(&self, guard: &Guard) -> usize {
        self.directories
            .iter()
            .filter_map(|d| unsafe { d.load(Ordering::Acquire, guard).as_ref() })
            .map(|d| {
                d.leaves
                    .iter()
                    .filter(|l| !l.load(Ordering::Acquire, guard).is_null())
                    .count()
            })
            .sum()
    }

    /// Returns the leaf holding `index`, allocating the path to it if needed.
    /// Writer only.
    fn leaf_or_alloc<'g>(&self, index: usize, guard: &'g Guard) -> &'g Leaf<V> {
        let (d, l, _) = locate(index);

        let directory = &self.directories[d];
        let mut dir_ptr = directory.load(Ordering::Acquire, guard);
        if dir_ptr.is_null() {
            dir_ptr = Owned::new(Directory {
                leaves: null_slots(),
            })
            .into_shared(guard);
            directory.store(dir_ptr, Ordering::Release);
        }
        // Safety: non-null, and directories are only reclaimed through the
        // epoch collector.
        let dir_ref = unsafe { dir_ptr.deref() };

        let leaf = &dir_ref.leaves[l];
        let mut leaf_ptr = leaf.load(Ordering::Acquire, guard);
        if leaf_ptr.is_null() {
            leaf_ptr = Owned::new(Leaf {
                heads: null_slots(),
            })
            .into_shared(guard);
            leaf.store(leaf_ptr, Ordering::Release);
        }
        // Safety: as above.
        unsafe { leaf_ptr.deref() }
    }
}

impl<V: Send + Sync> BucketTable<V> for SegmentedTable<V> {
    const MAX_BUCKETS: usize = 1 << (3 * FANOUT_BITS);

    fn get<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Node<V>> {
        let (d, l, h) = locate(index);

        let Some(directory) = self.directories.get(d) else {
            return Shared::null();
        };
        // Safety: directories and leaves are only reclaimed through the epoch
        // collector, after every guard that could have loaded them unpins.
        let Some(dir_ref) = (unsafe { directory.load(Ordering::Acquire, guard).as_ref() }) else {
            return Shared::null();
        };
        let Some(leaf_ref) = (unsafe { dir_ref.leaves[l].load(Ordering::Acquire, guard).as_ref() })
        else {
            return Shared::null();
        };

        leaf_ref.heads[h].load(Ordering::Acquire, guard)
    }

    fn set<'g>(&self, index: usize, head: Shared<'g, Node<V>>, guard: &'g Guard) {
        assert!(
            index < Self::MAX_BUCKETS,
            "bucket {index} is beyond the segmented table's reach"
        );

        if head.is_null() && self.get(index, guard).is_null() {
            // Already uninitialized; no need to allocate a leaf to say so.
            return;
        }

        let (_, _, h) = locate(index);
        self.leaf_or_alloc(index, guard).heads[h].store(head, Ordering::Release);
    }

    fn reserve(&self, len: usize, _guard: &Guard) {
        debug_assert!(len <= Self::MAX_BUCKETS);
    }

    fn reset(&self, guard: &Guard) {
        for directory in self.directories.iter() {
            let dir_ptr = directory.swap(Shared::null(), Ordering::AcqRel, guard);
            if !dir_ptr.is_null() {
                // Safety: the directory was just made unreachable.
                unsafe { defer_destroy_directory(guard, dir_ptr) };
            }
        }
    }
}

unsafe fn defer_destroy_directory<'g, V>(guard: &'g Guard, ptr: Shared<'g, Directory<V>>) {
    guard.defer_unchecked(move || {
        atomic::fence(Ordering::Acquire);
        destroy_directory(ptr.into_owned());
    });
}

/// Frees a directory and its leaves. The heads are non-owning and left alone.
fn destroy_directory<V>(directory: Owned<Directory<V>>) {
    // Safety: the directory is owned, so nothing else can reach its leaves.
    let guard = unsafe { crossbeam_epoch::unprotected() };
    for leaf in directory.leaves.iter() {
        let leaf_ptr = leaf.load(Ordering::Relaxed, guard);
        if !leaf_ptr.is_null() {
            mem::drop(unsafe { leaf_ptr.into_owned() });
        }
    }
}

impl<V> Drop for SegmentedTable<V> {
    fn drop(&mut self) {
        // Safety: `&mut self` means no reader can be holding a segment.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        for directory in self.directories.iter() {
            let dir_ptr = directory.load(Ordering::Relaxed, guard);
            if !dir_ptr.is_null() {
                destroy_directory(unsafe { dir_ptr.into_owned() });
            }
        }
    }
}

impl<V> fmt::Debug for SegmentedTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();
        f.debug_struct("SegmentedTable")
            .field("allocated_leaves", &self.allocated_leaves(guard))
            .finish()
    }
}
