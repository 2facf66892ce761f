//! Notifications about entries removed from a map.

pub(crate) mod notifier;

use std::sync::Arc;

/// A listener invoked with the key and value of every entry removed from a
/// map. See [`MapBuilder::removal_listener`][listener] for when it runs.
///
/// [listener]: ../sync/struct.MapBuilder.html#method.removal_listener
pub type RemovalListener<V> = Arc<dyn Fn(u32, V, RemovalCause) + Send + Sync + 'static>;

// NOTE: Dropping a map drops all of its values without sending notifications.
// Call `clear` first to have every entry reported.

/// Indicates the reason why an entry was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// The entry was removed by `delete` or `delete_if`.
    Explicit,
    /// The entry was removed by `clear`.
    Cleared,
}
