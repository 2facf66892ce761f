use super::map::{SplitOrderedMap, DEFAULT_MAX_LOAD};
use crate::{
    common::error::BuildError,
    notification::{RemovalCause, RemovalListener},
    table::{BucketTable, LinearTable, SegmentedTable},
};

use std::{marker::PhantomData, sync::Arc};

/// Builds a [`SplitOrderedMap`][map-struct] with various configuration knobs.
///
/// [map-struct]: ./struct.SplitOrderedMap.html
///
/// # Examples
///
/// ```rust
/// use splitorder::{notification::RemovalCause, sync::SegmentedMap, AddStrategy};
///
/// let map = SegmentedMap::builder()
///     .name("sessions")
///     // Double the bucket table once there are more entries than buckets.
///     .max_load(1.0)
///     .removal_listener(|key, value: String, cause| {
///         println!("removed {key} -> {value} ({cause:?})");
///     })
///     .build();
///
/// map.add(1, "alice".to_string(), AddStrategy::ReplaceExisting);
/// assert_eq!(map.name(), Some("sessions"));
///
/// // Prints "removed 1 -> alice (Cleared)".
/// map.clear();
/// ```
///
pub struct MapBuilder<V, B> {
    name: Option<String>,
    max_load: f64,
    removal_listener: Option<RemovalListener<V>>,
    table_type: PhantomData<B>,
}

impl<V, B> Default for MapBuilder<V, B> {
    fn default() -> Self {
        Self {
            name: None,
            max_load: DEFAULT_MAX_LOAD,
            removal_listener: None,
            table_type: PhantomData,
        }
    }
}

impl<V, B> MapBuilder<V, B>
where
    V: Clone + Send + Sync + 'static,
    B: BucketTable<V>,
{
    /// Construct a new `MapBuilder` with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `SplitOrderedMap<V, B>`.
    ///
    /// # Panics
    ///
    /// Panics if the configured `max_load` is not finite and positive. Use
    /// [`try_build`](#method.try_build) to get an error instead.
    pub fn build(self) -> SplitOrderedMap<V, B> {
        match self.try_build() {
            Ok(map) => map,
            Err(e) => panic!("{e}"),
        }
    }

    /// Builds a `SplitOrderedMap<V, B>`, or returns an error if the
    /// configuration is invalid.
    pub fn try_build(self) -> Result<SplitOrderedMap<V, B>, BuildError> {
        if !(self.max_load.is_finite() && self.max_load > 0.0) {
            return Err(BuildError::InvalidMaxLoad(self.max_load));
        }

        Ok(SplitOrderedMap::with_everything(
            self.name,
            self.max_load,
            self.removal_listener,
        ))
    }
}

impl<V, B> MapBuilder<V, B> {
    /// Sets the name of the map. The name is used to prefix log messages
    /// when the `logging` feature is enabled.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the load factor. The bucket table doubles as soon as an `add`
    /// leaves more than `max_load * table_size` entries in the map.
    ///
    /// The default is `1.5`.
    pub fn max_load(self, max_load: f64) -> Self {
        Self { max_load, ..self }
    }

    /// Sets the removal listener of the map.
    ///
    /// The listener is called synchronously, while the map's writer lock is
    /// held, once for every entry removed by `delete`, `delete_if` or
    /// `clear`. It receives the key, a _clone_ of the value and the cause.
    /// Values overwritten by [`AddStrategy::ReplaceExisting`][replace] are not
    /// reported, and neither are the values dropped with the map.
    ///
    /// The listener must not call back into the same map, or it will
    /// deadlock. If it panics, the panic is caught and the listener is
    /// disabled for the rest of the map's life.
    ///
    /// [replace]: ../enum.AddStrategy.html#variant.ReplaceExisting
    pub fn removal_listener(
        self,
        listener: impl Fn(u32, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        Self {
            removal_listener: Some(Arc::new(listener)),
            ..self
        }
    }

    /// Switches to a flat array bucket table.
    pub fn linear(self) -> MapBuilder<V, LinearTable<V>> {
        self.with_table()
    }

    /// Switches to a three-level segmented bucket table.
    pub fn segmented(self) -> MapBuilder<V, SegmentedTable<V>> {
        self.with_table()
    }

    fn with_table<C>(self) -> MapBuilder<V, C> {
        MapBuilder {
            name: self.name,
            max_load: self.max_load,
            removal_listener: self.removal_listener,
            table_type: PhantomData,
        }
    }
}
