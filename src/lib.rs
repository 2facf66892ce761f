#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! A split-ordered, incrementally resizable hash map with lock-free reads.
//!
//! [`SplitOrderedMap`][map-struct] stores `u32`-keyed entries in a single
//! linked chain sorted by the bit-reversed key. Buckets are contiguous runs of
//! that chain, so doubling the bucket table only splices one dummy node per
//! bucket into the chain; no entry is ever moved or rehashed. Writers are
//! serialized by one lock, while readers never lock and see a consistent chain
//! even while the table is doubling.
//!
//! The bucket index itself is pluggable through the [`BucketTable`] trait:
//!
//! - [`LinearTable`][linear] keeps the heads in one flat array, copied into a
//!   twice-as-large array before each doubling.
//! - [`SegmentedTable`][segmented] keeps them in a three-level tree of lazily
//!   allocated segments that never moves a head.
//!
//! # Example
//!
//! ```rust
//! use splitorder::{sync::SegmentedMap, AddStrategy};
//! use std::thread;
//!
//! let map = SegmentedMap::new();
//!
//! let writers: Vec<_> = (0..4u32)
//!     .map(|t| {
//!         let map = map.clone();
//!         thread::spawn(move || {
//!             for i in 0..1_000 {
//!                 map.add(t * 1_000 + i, i, AddStrategy::ReplaceExisting);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for w in writers {
//!     w.join().expect("writer panicked");
//! }
//!
//! assert_eq!(map.count(), 4_000);
//! assert_eq!(map.find_first(3_999), Some(999));
//! ```
//!
//! # Logging
//!
//! With the `logging` feature, maps report table doublings and clears at
//! the `debug` level, and disabled removal listeners at the `error` level,
//! through the [`log`](https://docs.rs/log) facade.
//!
//! [map-struct]: ./sync/struct.SplitOrderedMap.html
//! [linear]: ./table/struct.LinearTable.html
//! [segmented]: ./table/struct.SegmentedTable.html

pub(crate) mod chain;
pub(crate) mod common;
pub mod notification;
pub mod ops;
pub mod sync;
pub mod table;

pub use common::error::BuildError;
pub use ops::AddStrategy;
pub use sync::SplitOrderedMap;
pub use table::BucketTable;
