//! Bit-level helpers behind split ordering.
//!
//! A key is placed in the shared chain by the reverse of its bits, so the
//! entries of bucket `b` in a table of `2^n` buckets occupy one contiguous run
//! of the chain, and doubling the table splits every run in two without moving
//! anything.

/// `LOG_TABLE[b]` is the position of the highest set bit of the byte `b`.
/// `LOG_TABLE[0]` is never consulted.
const LOG_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 2;
    while i < 256 {
        table[i] = table[i / 2] + 1;
        i += 1;
    }
    table
};

/// Reverses the bit order of a single byte with the 64-bit multiply and
/// modulus-1023 trick.
#[inline]
fn reverse_byte(b: u32) -> u32 {
    (((b as u64 * 0x0002_0202_0202) & 0x0108_8442_2010) % 1023) as u32
}

/// Reverses the bit order of a 32-bit word, one byte at a time.
#[inline]
pub(crate) fn reverse_bits(x: u32) -> u32 {
    (reverse_byte(x & 0xff) << 24)
        | (reverse_byte((x >> 8) & 0xff) << 16)
        | (reverse_byte((x >> 16) & 0xff) << 8)
        | reverse_byte(x >> 24)
}

/// Returns the position of the most significant set bit of `v`. `v` must not
/// be zero.
#[inline]
fn highest_bit(v: u32) -> u32 {
    debug_assert!(v != 0);

    let upper = v >> 16;
    if upper != 0 {
        let top = upper >> 8;
        if top != 0 {
            24 + LOG_TABLE[top as usize] as u32
        } else {
            16 + LOG_TABLE[upper as usize] as u32
        }
    } else {
        let top = v >> 8;
        if top != 0 {
            8 + LOG_TABLE[top as usize] as u32
        } else {
            LOG_TABLE[v as usize] as u32
        }
    }
}

/// Returns the bucket that must be initialized before `bucket`: `bucket` with
/// its most significant set bit cleared. `parent(0)` is `0`.
#[inline]
pub(crate) fn parent(bucket: usize) -> usize {
    if bucket == 0 {
        return 0;
    }
    debug_assert!(bucket <= u32::MAX as usize);

    bucket & !(1 << highest_bit(bucket as u32))
}

/// The chain key of a data node holding `key`. Always odd, and blind to the
/// top bit of `key`.
#[inline]
pub(crate) fn data_key(key: u32) -> u32 {
    reverse_bits(key) | 1
}

/// The chain key of the dummy node that heads `bucket`. Always even.
#[inline]
pub(crate) fn dummy_key(bucket: usize) -> u32 {
    debug_assert!(bucket <= u32::MAX as usize);

    reverse_bits(bucket as u32)
}

/// The bucket a chain key falls into in a table of `table_size` buckets.
#[inline]
pub(crate) fn bucket_of(so_key: u32, table_size: usize) -> usize {
    debug_assert!(table_size.is_power_of_two());

    reverse_bits(so_key) as usize & (table_size - 1)
}

/// The bucket a user key falls into in a table of `table_size` buckets.
#[inline]
pub(crate) fn bucket_index(key: u32, table_size: usize) -> usize {
    debug_assert!(table_size.is_power_of_two());

    key as usize & (table_size - 1)
}
