/// The error type for [`MapBuilder::try_build`][try-build].
///
/// [try-build]: ./sync/struct.MapBuilder.html#method.try_build
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The configured load factor cannot trigger a sensible doubling.
    ///
    /// `max_load` must be finite and strictly positive.
    #[error("max_load must be finite and greater than zero, but got {0}")]
    InvalidMaxLoad(f64),
}
