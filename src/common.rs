pub(crate) mod bits;
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test_utils;
