//! Map operations.

/// How [`SplitOrderedMap::add`][add] treats a key that is already present.
///
/// [add]: ./sync/struct.SplitOrderedMap.html#method.add
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddStrategy {
    /// Overwrite the value of the first entry with the key. The count does
    /// not change and the replaced value is not reported to the removal
    /// listener.
    #[default]
    ReplaceExisting,
    /// Leave the map untouched and make `add` return `false`.
    ReturnFalseOnExisting,
    /// Add another entry with the same key after the existing ones. Entries
    /// sharing a key are kept in insertion order.
    AddDuplicate,
}
