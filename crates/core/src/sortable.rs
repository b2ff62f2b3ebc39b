//! Order-preserving byte encoding for IEEE-754 doubles
//!
//! The numeric-range index keys contain `sort(v)`: a u64 whose big-endian
//! byte order matches the numeric order of the source double. Non-negative
//! values get their sign bit flipped; negative values get all bits flipped.
//! The mapping is invertible on all finite doubles.

const SIGN_BIT: u64 = 1 << 63;

/// Map a double to its order-preserving u64 form.
#[inline]
pub fn f64_to_sortable(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & SIGN_BIT == 0 {
        bits ^ SIGN_BIT
    } else {
        !bits
    }
}

/// Invert [`f64_to_sortable`].
#[inline]
pub fn f64_from_sortable(s: u64) -> f64 {
    let bits = if s & SIGN_BIT != 0 { s ^ SIGN_BIT } else { !s };
    f64::from_bits(bits)
}

/// The big-endian byte form used inside range-index keys.
#[inline]
pub fn sortable_bytes(v: f64) -> [u8; 8] {
    f64_to_sortable(v).to_be_bytes()
}
