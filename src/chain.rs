//! The ordered node chain shared by every bucket of a map.
//!
//! The chain is a singly linked list sorted by split-ordered key. Dummy nodes
//! (even keys) mark where a bucket's run begins, data nodes (odd keys) carry
//! values. Each node owns its successor; bucket tables hold non-owning
//! pointers to dummy nodes.
//!
//! A split-ordered key drops the top bit of the user key to make room for the
//! tag bit, so two user keys may share one. Data nodes keep the full user key
//! and lookups match on it within the run of equal split-ordered keys.
//!
//! A node is always fully built, `next` included, before it is stored into
//! its predecessor with `Release`. Readers follow links with `Acquire` while
//! pinned, and nodes unlinked by a writer are reclaimed through the epoch
//! collector once no reader can still see them.

use std::{
    fmt,
    mem,
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::common::bits;

/// A node of the split-ordered chain.
///
/// Only the map creates or links nodes. Bucket tables store and return
/// pointers to them without looking inside.
pub struct Node<V> {
    pub(crate) so_key: u32,
    /// The user key of a data node, or the bucket index of a dummy node.
    pub(crate) key: u32,
    pub(crate) value: Option<V>,
    pub(crate) next: Atomic<Node<V>>,
}

impl<V> Node<V> {
    pub(crate) fn dummy(bucket: usize, next: Shared<'_, Node<V>>) -> Self {
        Self {
            so_key: bits::dummy_key(bucket),
            key: bucket as u32,
            value: None,
            next: Atomic::from(next),
        }
    }

    pub(crate) fn data(key: u32, value: V, next: Shared<'_, Node<V>>) -> Self {
        Self {
            so_key: bits::data_key(key),
            key,
            value: Some(value),
            next: Atomic::from(next),
        }
    }

    #[inline]
    pub(crate) fn is_dummy(&self) -> bool {
        self.so_key & 1 == 0
    }

    /// Returns `true` if this is a data node for `key`.
    #[inline]
    pub(crate) fn holds(&self, key: u32) -> bool {
        !self.is_dummy() && self.key == key
    }

    #[inline]
    pub(crate) fn load_next<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<V>> {
        self.next.load(Ordering::Acquire, guard)
    }
}

impl<V> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("so_key", &format_args!("{:#010x}", self.so_key))
            .field("key", &self.key)
            .field("dummy", &self.is_dummy())
            .finish()
    }
}

/// Walks the chain from `head` and returns the last node whose key is below
/// `so_key` together with its successor, the first node whose key is at or
/// above `so_key` (null at the end of the chain).
///
/// `head` must be a live, non-null node with a key below `so_key`.
pub(crate) fn seek<'g, V>(
    head: Shared<'g, Node<V>>,
    so_key: u32,
    guard: &'g Guard,
) -> (&'g Node<V>, Shared<'g, Node<V>>) {
    // Safety: the caller passes a node reachable from the chain while `guard`
    // is pinned, so it cannot be reclaimed under us.
    let mut prev = unsafe { head.deref() };
    debug_assert!(prev.so_key < so_key);

    let mut curr = prev.load_next(guard);
    // Safety: every link was published with `Release` after its node was
    // fully built, and unlinked nodes outlive the pinned guard.
    while let Some(node) = unsafe { curr.as_ref() } {
        if node.so_key >= so_key {
            break;
        }
        prev = node;
        curr = node.load_next(guard);
    }

    (prev, curr)
}

/// Retires a node that has been unlinked from the chain. It is dropped, value
/// included, once every thread that may still hold it has unpinned.
///
/// # Safety
///
/// `ptr` must be non-null, unreachable from the chain and the bucket table,
/// and retired only once.
pub(crate) unsafe fn defer_destroy_node<'g, V>(guard: &'g Guard, ptr: Shared<'g, Node<V>>) {
    assert!(!ptr.is_null());

    guard.defer_unchecked(move || {
        atomic::fence(Ordering::Acquire);
        mem::drop(ptr.into_owned());
    });
}

/// Frees every node reachable from `head` immediately.
///
/// # Safety
///
/// No other thread may access the chain, now or later.
pub(crate) unsafe fn destroy_chain<V>(head: Shared<'_, Node<V>>) {
    let guard = crossbeam_epoch::unprotected();
    let mut curr = head;
    while !curr.is_null() {
        let next = curr.deref().next.load(Ordering::Relaxed, guard);
        mem::drop(curr.into_owned());
        curr = next;
    }
}
