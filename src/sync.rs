//! Provides the thread-safe split-ordered map.

mod builder;
mod iter;
pub(crate) mod map;

pub use {
    builder::MapBuilder,
    iter::Find,
    map::{LinearMap, SegmentedMap, SplitOrderedMap},
};
