//! Bucket tables: the storage behind a map's bucket index.
//!
//! A bucket table maps a bucket index to the dummy node that begins that
//! bucket's run in the chain, or to null while the bucket is uninitialized.
//! The map serializes every `set`, `reserve` and `reset` behind its writer
//! lock, but `get` runs concurrently with all of them, so implementations
//! must never move or free storage a reader may be looking at without going
//! through the epoch collector.

pub(crate) mod linear;
pub(crate) mod segmented;

pub use crate::chain::Node;
pub use linear::LinearTable;
pub use segmented::SegmentedTable;

use crossbeam_epoch::{Guard, Shared};

/// Indexed storage for chain heads, with null meaning "uninitialized".
pub trait BucketTable<V>: Default + Send + Sync {
    /// The largest table size this storage can address. Always a power of
    /// two.
    const MAX_BUCKETS: usize;

    /// Returns the head of `index`, or null if it has not been initialized.
    /// An index beyond the storage currently allocated reads as null.
    fn get<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Node<V>>;

    /// Publishes `head` as the head of `index`. Writer only. `index` must be
    /// below the size last passed to `reserve`.
    fn set<'g>(&self, index: usize, head: Shared<'g, Node<V>>, guard: &'g Guard);

    /// Makes indices below `len` writable before the map doubles. Writer only.
    fn reserve(&self, len: usize, guard: &Guard);

    /// Forgets every head and returns to the initial two-bucket state. Writer
    /// only; the nodes themselves are not touched.
    fn reset(&self, guard: &Guard);
}
