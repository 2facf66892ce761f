use super::{builder::MapBuilder, iter::Find};
use crate::{
    chain::{self, Node},
    common::bits,
    notification::{notifier::RemovalNotifier, RemovalCause, RemovalListener},
    ops::AddStrategy,
    table::{BucketTable, LinearTable, SegmentedTable},
};

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use smallvec::SmallVec;

pub(crate) const INITIAL_TABLE_SIZE: usize = 2;
pub(crate) const INITIAL_INDEX_BITS: u32 = 1;
pub(crate) const DEFAULT_MAX_LOAD: f64 = 1.5;

/// A split-ordered hash map from `u32` keys to values of type `V`, whose
/// bucket index is stored in a bucket table of type `B`.
///
/// All entries live in a single linked chain sorted by the bit-reversed key.
/// Each bucket is a contiguous run of that chain, headed by a dummy node that
/// the bucket table points to. When the number of entries exceeds
/// `max_load * table_size`, the table doubles: every bucket splits in two by
/// splicing one new dummy node into the chain, and no entry is ever moved or
/// rehashed.
///
/// # Examples
///
/// ```rust
/// use splitorder::{sync::LinearMap, AddStrategy};
///
/// let map = LinearMap::new();
///
/// assert!(map.add(7, "seven", AddStrategy::ReplaceExisting));
/// assert!(!map.add(7, "sept", AddStrategy::ReturnFalseOnExisting));
/// assert!(map.add(7, "sieben", AddStrategy::AddDuplicate));
///
/// assert_eq!(map.find_first(7), Some("seven"));
/// assert_eq!(map.find(7).collect::<Vec<_>>(), vec!["seven", "sieben"]);
/// assert_eq!(map.count(), 2);
///
/// assert_eq!(map.delete_if(7, |v| v.starts_with('s') && v.len() > 5), 1);
/// assert_eq!(map.delete(7), 1);
/// assert!(map.is_empty());
/// ```
///
/// # Thread Safety
///
/// The map is shared between threads by cloning it; clones are cheap and
/// refer to the same entries.
///
/// - Writers (`add`, `delete`, `delete_if` and `clear`, plus the doubling an
///   `add` may trigger) are serialized by a single map-wide lock.
/// - Readers (`find_first`, `find`, `contains_key` and `count`) take no lock
///   and run concurrently with each other and with a writer.
///
/// A reader racing with a writer observes the chain either before or after
/// each link change, never in between. Entries removed while a reader is
/// looking at them stay alive until the reader is done.
///
/// # Bucket tables
///
/// Two bucket tables are provided. [`LinearTable`][linear] keeps the bucket
/// heads in one flat array that is copied into a larger one before each
/// doubling; it is the default. [`SegmentedTable`][segmented] keeps them in a
/// three-level tree of lazily allocated segments and never copies a head. Use
/// the [`LinearMap`] and [`SegmentedMap`] aliases, or the builder's
/// `linear` and `segmented` methods, to pick one.
///
/// [linear]: ../table/struct.LinearTable.html
/// [segmented]: ../table/struct.SegmentedTable.html
pub struct SplitOrderedMap<V, B = LinearTable<V>> {
    inner: Arc<Inner<V, B>>,
}

/// A [`SplitOrderedMap`] whose bucket heads live in a single flat array.
pub type LinearMap<V> = SplitOrderedMap<V, LinearTable<V>>;

/// A [`SplitOrderedMap`] whose bucket heads live in a three-level segmented
/// array.
pub type SegmentedMap<V> = SplitOrderedMap<V, SegmentedTable<V>>;

impl<V, B> Clone for SplitOrderedMap<V, B> {
    /// Makes a clone of this shared map.
    ///
    /// This operation is cheap as it only creates a thread-safe
    /// reference-counted pointer to the shared state.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, B> fmt::Debug for SplitOrderedMap<V, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitOrderedMap")
            .field("name", &self.inner.name)
            .field("count", &self.inner.count.load(Ordering::Acquire))
            .field("table_size", &self.inner.table_size.load(Ordering::Acquire))
            .field("max_load", &self.inner.max_load)
            .finish()
    }
}

impl<V, B> Default for SplitOrderedMap<V, B>
where
    V: Clone + Send + Sync + 'static,
    B: BucketTable<V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, B> SplitOrderedMap<V, B>
where
    V: Clone + Send + Sync + 'static,
    B: BucketTable<V>,
{
    /// Constructs an empty map with two buckets and the default load factor
    /// of `1.5`.
    ///
    /// To set a name, a load factor or a removal listener, use the
    /// [`MapBuilder`][builder-struct].
    ///
    /// [builder-struct]: ./struct.MapBuilder.html
    pub fn new() -> Self {
        Self::with_everything(None, DEFAULT_MAX_LOAD, None)
    }

    /// Returns a [`MapBuilder`][builder-struct], which can build a map with
    /// various configuration knobs.
    ///
    /// [builder-struct]: ./struct.MapBuilder.html
    pub fn builder() -> MapBuilder<V, B> {
        MapBuilder::default()
    }

    pub(crate) fn with_everything(
        name: Option<String>,
        max_load: f64,
        removal_listener: Option<RemovalListener<V>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner::new(name, max_load, removal_listener)),
        }
    }

    /// Returns the name of this map, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns the load factor that triggers a doubling.
    pub fn max_load(&self) -> f64 {
        self.inner.max_load
    }

    /// Returns the number of entries, duplicates included.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns the current number of buckets. Starts at 2 and only ever
    /// doubles, until `clear` resets it.
    pub fn table_size(&self) -> usize {
        self.inner.table_size.load(Ordering::Acquire)
    }

    /// Adds an entry for `key`, treating an existing entry as `strategy`
    /// says.
    ///
    /// Returns `false` only when `strategy` is
    /// [`ReturnFalseOnExisting`][AddStrategy::ReturnFalseOnExisting] and the
    /// key is already present; the map is left untouched in that case.
    ///
    /// Keys are compared in full. `key` and `key ^ (1 << 31)` share a place
    /// in the chain but are never treated as the same entry.
    pub fn add(&self, key: u32, value: V, strategy: AddStrategy) -> bool {
        self.inner.add(key, value, strategy)
    }

    /// Returns a _clone_ of the value of the first entry for `key`.
    ///
    /// If you want to store values that will be expensive to clone, wrap
    /// them by `std::sync::Arc` before storing them in the map.
    ///
    /// Only entries added under exactly `key` are found; an entry for
    /// `key ^ (1 << 31)` is a different entry.
    pub fn find_first(&self, key: u32) -> Option<V> {
        self.inner.find_first(key)
    }

    /// Returns `true` if the map holds at least one entry for `key`.
    pub fn contains_key(&self, key: u32) -> bool {
        self.inner.with_first(key, |_| ()).is_some()
    }

    /// Returns a lazy iterator over _clones_ of the values of every entry for
    /// `key`, in insertion order.
    ///
    /// The iterator keeps the current thread pinned to the epoch collector
    /// until it is dropped, which holds back reclamation of removed entries
    /// map-wide. Do not keep it around longer than needed.
    pub fn find(&self, key: u32) -> Find<'_, V, B> {
        Find::new(&self.inner, key)
    }

    /// Removes every entry for `key` and returns how many were removed.
    pub fn delete(&self, key: u32) -> usize {
        self.inner.delete_if(key, |_| true)
    }

    /// Removes the entries for `key` whose value satisfies `predicate`, and
    /// returns how many were removed. Entries failing the predicate keep their
    /// place.
    pub fn delete_if(&self, key: u32, predicate: impl FnMut(&V) -> bool) -> usize {
        self.inner.delete_if(key, predicate)
    }

    /// Removes every entry and shrinks the bucket table back to two buckets.
    ///
    /// With a removal listener configured, every removed entry is reported
    /// with [`RemovalCause::Cleared`].
    pub fn clear(&self) {
        self.inner.clear()
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        self.inner.assert_invariants()
    }
}

pub(crate) struct Inner<V, B> {
    name: Option<String>,
    buckets: B,
    /// Bucket 0's dummy node, the first node of the chain.
    root: Atomic<Node<V>>,
    table_size: AtomicUsize,
    index_bits: AtomicU32,
    count: CachePadded<AtomicUsize>,
    max_load: f64,
    write_lock: Mutex<()>,
    removal_notifier: Option<RemovalNotifier<V>>,
}

impl<V, B> Drop for Inner<V, B> {
    fn drop(&mut self) {
        // Safety: the last handle is gone, so no reader or writer can reach
        // the chain anymore.
        unsafe {
            let guard = epoch::unprotected();
            chain::destroy_chain(self.root.load(Ordering::Relaxed, guard));
        }
    }
}

impl<V, B> Inner<V, B>
where
    V: Clone + Send + Sync + 'static,
    B: BucketTable<V>,
{
    fn new(
        name: Option<String>,
        max_load: f64,
        removal_listener: Option<RemovalListener<V>>,
    ) -> Self {
        assert!(max_load.is_finite() && max_load > 0.0);

        let removal_notifier = removal_listener.map(|l| RemovalNotifier::new(l, name.clone()));
        Self {
            name,
            buckets: B::default(),
            root: Atomic::null(),
            table_size: AtomicUsize::new(INITIAL_TABLE_SIZE),
            index_bits: AtomicU32::new(INITIAL_INDEX_BITS),
            count: CachePadded::new(AtomicUsize::new(0)),
            max_load,
            write_lock: Mutex::new(()),
            removal_notifier,
        }
    }

    pub(crate) fn current_table_size(&self) -> usize {
        self.table_size.load(Ordering::Acquire)
    }

    /// Returns the head of the bucket `key` falls into right now, or null if
    /// that bucket is uninitialized and therefore holds no entries. Never
    /// initializes anything.
    pub(crate) fn bucket_head_for_read<'g>(
        &self,
        key: u32,
        guard: &'g Guard,
    ) -> Shared<'g, Node<V>> {
        // Acquire pairs with the Release in `double`, so every dummy node
        // published for this size is visible through the bucket table.
        let size = self.current_table_size();
        self.buckets.get(bits::bucket_index(key, size), guard)
    }

    fn with_first<T>(&self, key: u32, with_value: impl FnOnce(&V) -> T) -> Option<T> {
        let so_key = bits::data_key(key);
        let guard = &epoch::pin();

        let head = self.bucket_head_for_read(key, guard);
        if head.is_null() {
            return None;
        }

        let (_, mut curr) = chain::seek(head, so_key, guard);
        // Safety: reachable while `guard` is pinned.
        while let Some(node) = unsafe { curr.as_ref() } {
            if node.so_key != so_key {
                break;
            }
            if node.holds(key) {
                return node.value.as_ref().map(with_value);
            }
            curr = node.load_next(guard);
        }
        None
    }

    fn find_first(&self, key: u32) -> Option<V> {
        self.with_first(key, V::clone)
    }

    fn add(&self, key: u32, value: V, strategy: AddStrategy) -> bool {
        let so_key = bits::data_key(key);
        let _lock = self.write_lock.lock();
        let guard = &epoch::pin();

        let size = self.table_size.load(Ordering::Relaxed);
        let head = self.bucket_head(bits::bucket_index(key, size), guard);
        let (mut prev, mut curr) = chain::seek(head, so_key, guard);

        // Walk the run sharing `so_key`. New entries go at its end, which
        // keeps duplicates in insertion order.
        // Safety: reachable while `guard` is pinned.
        while let Some(node) = unsafe { curr.as_ref() } {
            if node.so_key != so_key {
                break;
            }
            if node.holds(key) {
                match strategy {
                    AddStrategy::ReplaceExisting => {
                        // Swap in a fresh node instead of writing the value in
                        // place, so a reader cloning the old value is
                        // unaffected.
                        let replacement = Node::data(key, value, node.load_next(guard));
                        prev.next.store(Owned::new(replacement), Ordering::Release);
                        // Safety: `curr` was just unlinked and is not a bucket
                        // head, since data nodes never are.
                        unsafe { chain::defer_destroy_node(guard, curr) };
                        return true;
                    }
                    AddStrategy::ReturnFalseOnExisting => return false,
                    AddStrategy::AddDuplicate => (),
                }
            }
            prev = node;
            curr = node.load_next(guard);
        }

        prev.next
            .store(Owned::new(Node::data(key, value, curr)), Ordering::Release);
        self.count.fetch_add(1, Ordering::AcqRel);

        self.expand_if_needed(guard);
        true
    }

    fn delete_if(&self, key: u32, mut predicate: impl FnMut(&V) -> bool) -> usize {
        let so_key = bits::data_key(key);
        let _lock = self.write_lock.lock();
        let guard = &epoch::pin();

        let size = self.table_size.load(Ordering::Relaxed);
        let head = self.buckets.get(bits::bucket_index(key, size), guard);
        if head.is_null() {
            return 0;
        }

        let (mut prev, mut curr) = chain::seek(head, so_key, guard);
        let mut removed = 0;

        // Safety: reachable while `guard` is pinned.
        while let Some(node) = unsafe { curr.as_ref() } {
            if node.so_key != so_key {
                break;
            }

            let next = node.load_next(guard);
            let value = match &node.value {
                Some(value) if node.holds(key) => value,
                // Another key in the same run.
                _ => {
                    prev = node;
                    curr = next;
                    continue;
                }
            };

            if predicate(value) {
                prev.next.store(next, Ordering::Release);
                self.count.fetch_sub(1, Ordering::AcqRel);
                self.notify_removal(key, value, RemovalCause::Explicit);
                // Safety: `curr` was just unlinked and data nodes are never
                // bucket heads.
                unsafe { chain::defer_destroy_node(guard, curr) };
                removed += 1;
            } else {
                prev = node;
            }
            curr = next;
        }

        removed
    }

    fn clear(&self) {
        let _lock = self.write_lock.lock();
        let guard = &epoch::pin();

        let old_root = self.root.swap(Shared::null(), Ordering::AcqRel, guard);
        self.buckets.reset(guard);
        self.index_bits.store(INITIAL_INDEX_BITS, Ordering::Release);
        self.table_size.store(INITIAL_TABLE_SIZE, Ordering::Release);
        #[cfg(feature = "logging")]
        let removed = self.count.load(Ordering::Relaxed);
        self.count.store(0, Ordering::Release);

        let mut curr = old_root;
        // Safety: the old chain is unreachable from the map, but nodes are
        // only reclaimed once `guard` unpins.
        while let Some(node) = unsafe { curr.as_ref() } {
            let next = node.load_next(guard);
            if let Some(value) = &node.value {
                self.notify_removal(node.key, value, RemovalCause::Cleared);
            }
            unsafe { chain::defer_destroy_node(guard, curr) };
            curr = next;
        }
        guard.flush();

        #[cfg(feature = "logging")]
        log::debug!("{}Cleared {removed} entries", self.log_prefix());
    }

    fn notify_removal(&self, key: u32, value: &V, cause: RemovalCause) {
        if let Some(notifier) = &self.removal_notifier {
            if notifier.is_enabled() {
                notifier.notify(key, value.clone(), cause);
            }
        }
    }

    /// Returns the head of `index`, initializing it (and any uninitialized
    /// ancestor) first. Writer only.
    fn bucket_head<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Node<V>> {
        let head = self.buckets.get(index, guard);
        if !head.is_null() {
            return head;
        }
        self.initialize_bucket(index, guard)
    }

    /// Initializes `index`, walking up its parents until an initialized one
    /// is found and then splicing dummy nodes back down. The parent of a
    /// bucket is always spliced first, so every dummy node is inserted into a
    /// run that already exists. Writer only.
    fn initialize_bucket<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Node<V>> {
        debug_assert!(index < self.table_size.load(Ordering::Relaxed));

        // At most one entry per index bit.
        let mut pending = SmallVec::<[usize; 32]>::new();
        let mut bucket = index;
        let mut head = self.buckets.get(bucket, guard);
        while head.is_null() && bucket != 0 {
            pending.push(bucket);
            bucket = bits::parent(bucket);
            head = self.buckets.get(bucket, guard);
        }

        if head.is_null() {
            // The very first node of the chain.
            debug_assert!(self.root.load(Ordering::Relaxed, guard).is_null());
            head = Owned::new(Node::dummy(0, Shared::null())).into_shared(guard);
            self.root.store(head, Ordering::Release);
            self.buckets.set(0, head, guard);
        }

        while let Some(bucket) = pending.pop() {
            head = self.splice_dummy(head, bucket, guard);
        }

        head
    }

    /// Links the dummy node of `bucket` into the run of its parent, whose head
    /// is `parent_head`, and publishes it in the bucket table.
    fn splice_dummy<'g>(
        &self,
        parent_head: Shared<'g, Node<V>>,
        bucket: usize,
        guard: &'g Guard,
    ) -> Shared<'g, Node<V>> {
        let dummy_key = bits::dummy_key(bucket);
        let (prev, curr) = chain::seek(parent_head, dummy_key, guard);

        // Safety: reachable while `guard` is pinned.
        let dummy = match unsafe { curr.as_ref() } {
            // Already linked. Cannot happen while writers are serialized.
            Some(node) if node.so_key == dummy_key => curr,
            _ => {
                let dummy = Owned::new(Node::dummy(bucket, curr)).into_shared(guard);
                prev.next.store(dummy, Ordering::Release);
                dummy
            }
        };

        self.buckets.set(bucket, dummy, guard);
        dummy
    }

    /// Doubles the table until the load factor holds again, or the bucket
    /// table cannot grow any further. Writer only.
    fn expand_if_needed(&self, guard: &Guard) {
        loop {
            let size = self.table_size.load(Ordering::Relaxed);
            let count = self.count.load(Ordering::Relaxed);

            if count as f64 <= self.max_load * size as f64 || size >= B::MAX_BUCKETS {
                return;
            }
            self.double(size, guard);
        }
    }

    /// Splits every bucket `i` of a table of `old_size` buckets into `i` and
    /// `old_size + i`.
    ///
    /// Nothing moves: the entries of `old_size + i` already sit at the tail of
    /// bucket `i`'s run, so splitting only means splicing a dummy node in
    /// front of them. A bucket with no such tail, or one that is itself
    /// uninitialized, leaves its sibling uninitialized.
    fn double(&self, old_size: usize, guard: &Guard) {
        let index_bits = self.index_bits.load(Ordering::Relaxed);
        debug_assert_eq!(old_size, 1 << index_bits);

        let new_size = old_size * 2;
        // Grow the storage before anything is published into the new half.
        self.buckets.reserve(new_size, guard);

        for i in 0..old_size {
            let sibling = old_size + i;
            let head = self.buckets.get(i, guard);
            if head.is_null() {
                self.buckets.set(sibling, Shared::null(), guard);
                continue;
            }

            let (prev, curr) = chain::seek(head, bits::dummy_key(sibling), guard);
            // Safety: reachable while `guard` is pinned.
            match unsafe { curr.as_ref() } {
                Some(node) if bits::bucket_of(node.so_key, new_size) == sibling => {
                    let dummy = Owned::new(Node::dummy(sibling, curr)).into_shared(guard);
                    self.buckets.set(sibling, dummy, guard);
                    prev.next.store(dummy, Ordering::Release);
                }
                _ => self.buckets.set(sibling, Shared::null(), guard),
            }
        }

        self.index_bits.store(index_bits + 1, Ordering::Release);
        self.table_size.store(new_size, Ordering::Release);

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Doubled the bucket table from {old_size} to {new_size} buckets ({} entries)",
            self.log_prefix(),
            self.count.load(Ordering::Relaxed)
        );
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        self.name
            .as_deref()
            .map(|name| format!("[{name}] "))
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl<V, B> Inner<V, B>
where
    V: Clone + Send + Sync + 'static,
    B: BucketTable<V>,
{
    /// Walks the whole chain and the bucket table and panics if any of the
    /// structural invariants is broken. Not meant to race with writers.
    fn assert_invariants(&self) {
        use std::collections::HashSet;

        let _lock = self.write_lock.lock();
        let guard = &epoch::pin();

        let size = self.table_size.load(Ordering::Acquire);
        let index_bits = self.index_bits.load(Ordering::Acquire);
        let count = self.count.load(Ordering::Acquire);
        assert_eq!(size, 1 << index_bits);

        // Chain order and node census.
        let mut dummies = HashSet::new();
        let mut data = 0;
        let mut prev_key = None;
        let mut curr = self.root.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { curr.as_ref() } {
            if let Some(prev_key) = prev_key {
                if node.is_dummy() {
                    assert!(prev_key < node.so_key, "dummy {node:?} out of order");
                } else {
                    assert!(prev_key <= node.so_key, "data {node:?} out of order");
                }
            }
            prev_key = Some(node.so_key);

            if node.is_dummy() {
                assert!(node.value.is_none());
                dummies.insert(node.so_key);
            } else {
                assert!(node.value.is_some());
                assert_eq!(node.so_key, bits::data_key(node.key));
                let bucket = bits::bucket_of(node.so_key, size);
                assert!(
                    !self.buckets.get(bucket, guard).is_null(),
                    "entry {node:?} lives in uninitialized bucket {bucket}"
                );
                data += 1;
            }
            curr = node.load_next(guard);
        }
        assert_eq!(data, count, "count does not match the chain");

        // Bucket table.
        let mut initialized = 0;
        for b in 0..size {
            let Some(head) = (unsafe { self.buckets.get(b, guard).as_ref() }) else {
                continue;
            };
            initialized += 1;
            assert_eq!(head.so_key, bits::dummy_key(b), "bucket {b} has a foreign head");
            assert!(dummies.contains(&head.so_key), "bucket {b} is not in the chain");
            if b > 0 {
                let parent = bits::parent(b);
                assert!(parent < b);
                assert!(
                    !self.buckets.get(parent, guard).is_null(),
                    "bucket {b} is initialized but its parent {parent} is not"
                );
            }
        }
        assert_eq!(dummies.len(), initialized);
        assert!(count == 0 || !self.root.load(Ordering::Acquire, guard).is_null());

        if size < B::MAX_BUCKETS {
            assert!(count as f64 <= self.max_load * size as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LinearMap, SegmentedMap, SplitOrderedMap};
    use crate::{
        common::test_utils::{run_deferred, DropTracker},
        notification::RemovalCause,
        ops::AddStrategy::{self, *},
        table::BucketTable,
    };

    use parking_lot::Mutex;
    use paste::paste;
    use std::{collections::HashSet, sync::Arc};

    fn fill<B: BucketTable<u32>>(
        map: &SplitOrderedMap<u32, B>,
        keys: impl IntoIterator<Item = u32>,
    ) {
        for key in keys {
            assert!(map.add(key, key * 10, ReturnFalseOnExisting));
        }
    }

    macro_rules! map_tests {
        ($name:ident, $map:ident) => {
            paste! {
                #[test]
                fn [<$name _starts_empty>]() {
                    let map = $map::<u32>::new();
                    assert_eq!(map.count(), 0);
                    assert!(map.is_empty());
                    assert_eq!(map.table_size(), 2);
                    assert_eq!(map.max_load(), 1.5);
                    assert_eq!(map.find_first(0), None);
                    assert_eq!(map.find(0).next(), None);
                    assert_eq!(map.delete(0), 0);
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _replace_existing_is_idempotent>]() {
                    let map = $map::new();
                    assert!(map.add(42, "a", ReplaceExisting));
                    assert!(map.add(42, "b", ReplaceExisting));
                    assert_eq!(map.count(), 1);
                    assert_eq!(map.find_first(42), Some("b"));
                    assert_eq!(map.find(42).collect::<Vec<_>>(), vec!["b"]);
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _return_false_on_existing>]() {
                    let map = $map::new();
                    assert!(map.add(9, "a", ReturnFalseOnExisting));
                    assert!(!map.add(9, "b", ReturnFalseOnExisting));
                    assert_eq!(map.count(), 1);
                    assert_eq!(map.find_first(9), Some("a"));
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _duplicates_accumulate>]() {
                    let map = $map::new();
                    fill(&map, [1, 3, 5]);
                    let before = map.count();

                    for v in [100, 200, 300] {
                        assert!(map.add(17, v, AddDuplicate));
                    }
                    assert_eq!(map.count(), before + 3);

                    let found = map.find(17).collect::<Vec<_>>();
                    assert_eq!(found, vec![100, 200, 300]);
                    assert_eq!(map.find_first(17), Some(100));
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _delete_then_find>]() {
                    let map = $map::new();
                    fill(&map, 0..100);
                    for key in (0..100).step_by(3) {
                        assert_eq!(map.delete(key), 1);
                        assert_eq!(map.find_first(key), None);
                        assert!(!map.contains_key(key));
                    }
                    for key in (0..100).filter(|k| k % 3 != 0) {
                        assert_eq!(map.find_first(key), Some(key * 10));
                    }
                    assert_eq!(map.count(), 66);
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _delete_if_skips_failing_entries>]() {
                    let map = $map::new();
                    for v in 1..=6 {
                        map.add(5, v, AddDuplicate);
                    }
                    map.add(6, 7, AddDuplicate);

                    assert_eq!(map.delete_if(5, |v| v % 2 == 0), 3);
                    assert_eq!(map.find(5).collect::<Vec<_>>(), vec![1, 3, 5]);
                    assert_eq!(map.find_first(6), Some(7));
                    assert_eq!(map.count(), 4);

                    assert_eq!(map.delete_if(5, |_| false), 0);
                    assert_eq!(map.delete_if(1234, |_| true), 0);
                    assert_eq!(map.delete(5), 3);
                    assert_eq!(map.count(), 1);
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _load_factor_holds_after_every_add>]() {
                    let map = $map::new();
                    for key in 0..5_000u32 {
                        map.add(key.wrapping_mul(2_654_435_761), key, ReplaceExisting);
                        assert!(map.count() as f64 <= map.max_load() * map.table_size() as f64);
                    }
                    assert_eq!(map.count(), 5_000);
                    assert!(map.table_size() >= 4096);
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _growth_keeps_everything_reachable>]() {
                    let map = $map::new();
                    let keys = (0..3_000u32).map(|i| i.wrapping_mul(0x9E37_79B9));
                    for key in keys.clone() {
                        map.add(key, key, ReturnFalseOnExisting);
                    }
                    for key in keys.clone() {
                        assert_eq!(map.find_first(key), Some(key));
                    }
                    map.assert_invariants();

                    for key in keys.clone().step_by(2) {
                        assert_eq!(map.delete(key), 1);
                    }
                    for (i, key) in keys.enumerate() {
                        assert_eq!(map.contains_key(key), i % 2 == 1);
                    }
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _extreme_keys>]() {
                    let map = $map::new();
                    for key in [0, 1, u32::MAX, u32::MAX - 1, 1 << 31, (1 << 31) - 1] {
                        assert!(map.add(key, key, ReturnFalseOnExisting));
                    }
                    for key in [0, 1, u32::MAX, u32::MAX - 1, 1 << 31, (1 << 31) - 1] {
                        assert_eq!(map.find_first(key), Some(key));
                    }
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _top_bit_keys_do_not_alias>]() {
                    let map = $map::new();
                    let low = 0x1234;
                    let high = low | 1 << 31;

                    map.add(low, "low-1", AddDuplicate);
                    map.add(high, "high-1", AddDuplicate);
                    map.add(low, "low-2", AddDuplicate);
                    assert!(!map.add(high, "high-2", ReturnFalseOnExisting));
                    map.add(high, "high-3", ReplaceExisting);

                    assert_eq!(map.find(low).collect::<Vec<_>>(), vec!["low-1", "low-2"]);
                    assert_eq!(map.find(high).collect::<Vec<_>>(), vec!["high-3"]);
                    assert_eq!(map.count(), 3);

                    assert_eq!(map.delete(low), 2);
                    assert_eq!(map.find_first(low), None);
                    assert_eq!(map.find_first(high), Some("high-3"));
                    assert_eq!(map.delete_if(high, |_| true), 1);
                    assert!(map.is_empty());
                    map.assert_invariants();
                }

                #[test]
                fn [<$name _clear_resets>]() {
                    let map = $map::new();
                    fill(&map, 0..1_000);
                    assert!(map.table_size() > 2);

                    map.clear();
                    assert_eq!(map.count(), 0);
                    assert_eq!(map.table_size(), 2);
                    assert_eq!(map.find_first(10), None);
                    map.assert_invariants();

                    assert!(map.add(0, 0, ReturnFalseOnExisting));
                    assert_eq!(map.find_first(0), Some(0));
                    fill(&map, 1..50);
                    assert_eq!(map.count(), 50);
                    map.assert_invariants();

                    map.clear();
                    map.clear();
                    assert!(map.is_empty());
                }

                #[test]
                fn [<$name _find_is_restartable>]() {
                    let map = $map::new();
                    for v in ["x", "y", "z"] {
                        map.add(3, v, AddDuplicate);
                    }

                    let mut found = map.find(3);
                    assert_eq!(found.next(), Some("x"));
                    assert_eq!(found.next(), Some("y"));
                    found.restart();
                    assert_eq!(found.collect::<Vec<_>>(), vec!["x", "y", "z"]);
                    assert_eq!(map.find(4).count(), 0);
                }

                #[test]
                fn [<$name _removal_listener>]() {
                    let removed = Arc::new(Mutex::new(Vec::new()));
                    let removed1 = Arc::clone(&removed);
                    let map = $map::builder()
                        .removal_listener(move |k, v, cause| removed1.lock().push((k, v, cause)))
                        .build();

                    map.add(1, "one", ReplaceExisting);
                    map.add(1, "uno", ReplaceExisting);
                    map.add(2, "two", ReplaceExisting);
                    map.add(3, "three", ReplaceExisting);
                    // Replacing does not report the old value.
                    assert!(removed.lock().is_empty());

                    assert_eq!(map.delete(2), 1);
                    assert_eq!(*removed.lock(), vec![(2, "two", RemovalCause::Explicit)]);

                    removed.lock().clear();
                    map.clear();
                    let cleared = removed.lock().iter().cloned().collect::<HashSet<_>>();
                    let expected = [
                        (1, "uno", RemovalCause::Cleared),
                        (3, "three", RemovalCause::Cleared),
                    ];
                    assert_eq!(cleared, expected.into_iter().collect());
                }

                #[test]
                fn [<$name _values_are_dropped_once>]() {
                    let tracker = DropTracker::default();
                    {
                        let map = $map::new();
                        for key in 0..64 {
                            map.add(key, tracker.value(key), AddDuplicate);
                        }
                        map.add(0, tracker.value(1000), ReplaceExisting);
                        assert_eq!(map.delete(1), 1);
                        assert_eq!(map.delete_if(2, |v| v.id() == 2), 1);
                        map.clear();
                        for key in 0..8 {
                            map.add(key, tracker.value(key), AddDuplicate);
                        }
                    }
                    run_deferred();

                    assert_eq!(tracker.created(), 64 + 1 + 8);
                    assert_eq!(tracker.dropped(), tracker.created());
                }
            }
        };
    }

    map_tests!(linear, LinearMap);
    map_tests!(segmented, SegmentedMap);

    #[test]
    fn small_load_factor_doubles_repeatedly() {
        let map = LinearMap::builder().max_load(0.25).build();
        for key in 0..100u32 {
            map.add(key, key, ReturnFalseOnExisting);
            assert!(map.count() as f64 <= 0.25 * map.table_size() as f64);
        }
        assert_eq!(map.table_size(), 512);
        map.assert_invariants();
    }

    #[test]
    fn laziness_survives_doubling() {
        // Keys that all fall into bucket 0 never initialize any other bucket.
        let map = SegmentedMap::builder().max_load(1.0).build();
        for i in 0..64u32 {
            map.add(i << 16, i, ReturnFalseOnExisting);
        }
        assert_eq!(map.table_size(), 64);
        for key in 1..64u32 {
            assert_eq!(map.find_first(key), None);
        }
        map.assert_invariants();
    }

    #[test]
    fn strategies_compose_on_duplicates() {
        let map = LinearMap::new();
        map.add(8, 'a', AddDuplicate);
        map.add(8, 'b', AddDuplicate);
        // Replacing touches only the first entry of the run.
        map.add(8, 'c', AddStrategy::default());
        assert_eq!(map.find(8).collect::<String>(), "cb");
        assert_eq!(map.count(), 2);
        map.assert_invariants();
    }

    #[test]
    fn clones_share_entries() {
        let map = SegmentedMap::new();
        let map2 = map.clone();
        map.add(1, 1, ReplaceExisting);
        assert_eq!(map2.find_first(1), Some(1));
        map2.clear();
        assert!(map.is_empty());
    }
}
