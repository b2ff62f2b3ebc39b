//! On-disk key layouts
//!
//! All index keys are fixed 24-byte concatenations of big-endian u64
//! components, so lexicographic order equals component-tuple order. The
//! `meta` column family uses short reserved-prefix keys for counters and
//! the statistics record.

use byteorder::{BigEndian, ByteOrder};
use triad_core::{sortable_bytes, Error, Result, TermId, TermKind, Triple};

/// Byte length of one key component.
pub const COMPONENT_LEN: usize = 8;

/// Byte length of a full triple-index key.
pub const TRIPLE_KEY_LEN: usize = 3 * COMPONENT_LEN;

/// Pack three ids into a 24-byte index key.
pub fn pack3(a: TermId, b: TermId, c: TermId) -> [u8; TRIPLE_KEY_LEN] {
    let mut key = [0u8; TRIPLE_KEY_LEN];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..16].copy_from_slice(&b.to_be_bytes());
    key[16..].copy_from_slice(&c.to_be_bytes());
    key
}

/// Unpack a 24-byte index key into its three components.
pub fn unpack3(key: &[u8]) -> Result<(TermId, TermId, TermId)> {
    if key.len() != TRIPLE_KEY_LEN {
        return Err(Error::corrupted(format!(
            "index key has length {}, expected {TRIPLE_KEY_LEN}",
            key.len()
        )));
    }
    let comp = |i: usize| TermId::from_u64(BigEndian::read_u64(&key[i * 8..(i + 1) * 8]));
    Ok((comp(0), comp(1), comp(2)))
}

/// Key for the numeric-range index: `p ∥ sort(value) ∥ s`.
pub fn range_key(p: TermId, value: f64, s: TermId) -> [u8; TRIPLE_KEY_LEN] {
    let mut key = [0u8; TRIPLE_KEY_LEN];
    key[..8].copy_from_slice(&p.to_be_bytes());
    key[8..16].copy_from_slice(&sortable_bytes(value));
    key[16..].copy_from_slice(&s.to_be_bytes());
    key
}

/// The SPO key of a triple.
pub fn spo_key(t: &Triple) -> [u8; TRIPLE_KEY_LEN] {
    pack3(t.s, t.p, t.o)
}

/// The POS key of a triple.
pub fn pos_key(t: &Triple) -> [u8; TRIPLE_KEY_LEN] {
    pack3(t.p, t.o, t.s)
}

/// The OSP key of a triple.
pub fn osp_key(t: &Triple) -> [u8; TRIPLE_KEY_LEN] {
    pack3(t.o, t.s, t.p)
}

/// Reserved keys inside the `meta` column family.
pub mod meta {
    use super::*;

    /// Versioned statistics record.
    pub const STATS: &[u8] = b"m/stats";

    /// Persisted dictionary counter ceiling for a kind subspace.
    pub fn dict_counter(kind: TermKind) -> &'static [u8] {
        match kind {
            TermKind::Iri => b"m/ctr/iri",
            TermKind::Blank => b"m/ctr/blank",
            TermKind::Literal => b"m/ctr/lit",
        }
    }

    /// Registered range-indexed predicates (one key per predicate).
    pub const RANGE_PRED_PREFIX: &[u8] = b"m/range/";

    /// Key registering one predicate for range indexing.
    pub fn range_predicate(p: TermId) -> Vec<u8> {
        let mut key = Vec::with_capacity(RANGE_PRED_PREFIX.len() + 8);
        key.extend_from_slice(RANGE_PRED_PREFIX);
        key.extend_from_slice(&p.to_be_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> TermId {
        TermId::from_u64(n)
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let key = pack3(id(1), id(1 << 40), id(u64::MAX));
        let (a, b, c) = unpack3(&key).unwrap();
        assert_eq!((a, b, c), (id(1), id(1 << 40), id(u64::MAX)));
    }

    #[test]
    fn test_unpack_rejects_bad_length() {
        assert!(unpack3(&[0u8; 23]).is_err());
        assert!(unpack3(&[]).is_err());
    }

    #[test]
    fn test_key_order_is_tuple_order() {
        // (1,2,3) < (1,2,4) < (1,3,0) < (2,0,0) lexicographically
        let keys = [
            pack3(id(1), id(2), id(3)),
            pack3(id(1), id(2), id(4)),
            pack3(id(1), id(3), id(0)),
            pack3(id(2), id(0), id(0)),
        ];
        for w in keys.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_range_key_orders_by_value() {
        let p = id(7);
        let s = id(9);
        let lo = range_key(p, -4.5, s);
        let mid = range_key(p, 0.0, s);
        let hi = range_key(p, 123.25, s);
        assert!(lo < mid && mid < hi);
    }

    #[test]
    fn test_index_keys_permute_components() {
        let t = Triple::new(id(1), id(2), id(3));
        assert_eq!(unpack3(&spo_key(&t)).unwrap(), (id(1), id(2), id(3)));
        assert_eq!(unpack3(&pos_key(&t)).unwrap(), (id(2), id(3), id(1)));
        assert_eq!(unpack3(&osp_key(&t)).unwrap(), (id(3), id(1), id(2)));
    }

    proptest::proptest! {
        #[test]
        fn prop_pack_unpack_round_trip(a: u64, b: u64, c: u64) {
            let key = pack3(id(a), id(b), id(c));
            proptest::prop_assert_eq!(unpack3(&key).unwrap(), (id(a), id(b), id(c)));
        }

        #[test]
        fn prop_key_order_matches_tuple_order(a1: u64, b1: u64, c1: u64, a2: u64, b2: u64, c2: u64) {
            let k1 = pack3(id(a1), id(b1), id(c1));
            let k2 = pack3(id(a2), id(b2), id(c2));
            proptest::prop_assert_eq!((a1, b1, c1) < (a2, b2, c2), k1 < k2);
        }
    }
}
