//! 64-bit term ids: dictionary ids and inline ids
//!
//! Ids partition into two disjoint spaces on the most significant bit.
//!
//! **Dictionary ids** (MSB = 0) are allocated monotonically by the
//! dictionary. Bits 62..61 carry the term kind (IRI / blank / literal) so
//! kind checks never touch storage; the low 61 bits are the per-kind
//! sequence number.
//!
//! **Inline ids** (MSB = 1) carry the value of a small literal in the id
//! itself. The high byte is a datatype tag; the low 56 bits are the
//! payload. Decoding and numeric comparison are pure computation.
//!
//! | tag | datatype | payload |
//! |------|----------|---------|
//! | 0x81 | xsd:integer | value + 2^55 (signed range ±2^55) |
//! | 0x82 | xsd:double | IEEE bits >> 8 (low 8 bits must be zero) |
//! | 0x83 | xsd:decimal | scale byte ∥ 48-bit offset mantissa |
//! | 0x84 | xsd:dateTime | epoch seconds + 2^55 |
//! | 0x85 | xsd:date | epoch seconds of midnight UTC + 2^55 |
//! | 0x86 | xsd:boolean | 0 or 1 |
//!
//! Inline encoding is attempted only for lexical forms that re-render
//! identically from the decoded value, which keeps the dictionary
//! bijective without storing anything.

use crate::term::{xsd, Term, TermKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const INLINE_BIT: u64 = 1 << 63;
const PAYLOAD_MASK: u64 = (1 << 56) - 1;
const INT_OFFSET: i64 = 1 << 55;
const MANTISSA_OFFSET: i64 = 1 << 47;

const TAG_INT: u8 = 0x81;
const TAG_FLOAT: u8 = 0x82;
const TAG_DECIMAL: u8 = 0x83;
const TAG_DATETIME: u8 = 0x84;
const TAG_DATE: u8 = 0x85;
const TAG_BOOL: u8 = 0x86;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Datatype tag of an inline id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineTag {
    /// xsd:integer
    Integer,
    /// xsd:double with a 56-bit-exact mantissa
    Float,
    /// xsd:decimal as scale + scaled mantissa
    Decimal,
    /// xsd:dateTime at whole-second precision
    DateTime,
    /// xsd:date
    Date,
    /// xsd:boolean
    Boolean,
}

impl InlineTag {
    fn from_byte(b: u8) -> Option<InlineTag> {
        match b {
            TAG_INT => Some(InlineTag::Integer),
            TAG_FLOAT => Some(InlineTag::Float),
            TAG_DECIMAL => Some(InlineTag::Decimal),
            TAG_DATETIME => Some(InlineTag::DateTime),
            TAG_DATE => Some(InlineTag::Date),
            TAG_BOOL => Some(InlineTag::Boolean),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            InlineTag::Integer => TAG_INT,
            InlineTag::Float => TAG_FLOAT,
            InlineTag::Decimal => TAG_DECIMAL,
            InlineTag::DateTime => TAG_DATETIME,
            InlineTag::Date => TAG_DATE,
            InlineTag::Boolean => TAG_BOOL,
        }
    }

    /// True for tags whose payload is a number admitted by the range index.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            InlineTag::Integer | InlineTag::Float | InlineTag::Decimal
        )
    }
}

/// A 64-bit encoded term.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TermId(u64);

impl TermId {
    /// Highest sequence number a dictionary subspace can hold.
    pub const MAX_DICT_SEQ: u64 = (1 << 61) - 1;

    /// Wrap a raw id value.
    pub const fn from_u64(raw: u64) -> TermId {
        TermId(raw)
    }

    /// The raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Big-endian key bytes, the form used inside all index keys.
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from big-endian key bytes.
    pub const fn from_be_bytes(bytes: [u8; 8]) -> TermId {
        TermId(u64::from_be_bytes(bytes))
    }

    /// Build a dictionary id from a kind subspace and sequence number.
    ///
    /// # Panics
    /// Panics when `seq` exceeds the 61-bit subspace — the dictionary
    /// counter has gone inconsistent, which is invariant-level.
    pub fn from_dict(kind: TermKind, seq: u64) -> TermId {
        assert!(
            seq <= Self::MAX_DICT_SEQ,
            "dictionary sequence exhausted the 61-bit subspace"
        );
        let kind_bits = match kind {
            TermKind::Iri => 0u64,
            TermKind::Blank => 1,
            TermKind::Literal => 2,
        };
        TermId(kind_bits << 61 | seq)
    }

    /// True when this id carries an inline literal.
    pub const fn is_inline(self) -> bool {
        self.0 & INLINE_BIT != 0
    }

    /// The inline datatype tag, when this is an inline id.
    pub fn inline_tag(self) -> Option<InlineTag> {
        if self.is_inline() {
            InlineTag::from_byte((self.0 >> 56) as u8)
        } else {
            None
        }
    }

    /// The kind subspace of a dictionary id (`None` for inline ids).
    pub fn dict_kind(self) -> Option<TermKind> {
        if self.is_inline() {
            return None;
        }
        match self.0 >> 61 {
            0 => Some(TermKind::Iri),
            1 => Some(TermKind::Blank),
            2 => Some(TermKind::Literal),
            _ => None,
        }
    }

    /// The sequence number of a dictionary id (`None` for inline ids).
    pub fn dict_seq(self) -> Option<u64> {
        if self.is_inline() {
            None
        } else {
            Some(self.0 & Self::MAX_DICT_SEQ)
        }
    }

    /// Attempt the inline encoding. Pure computation; `None` means the
    /// term needs a dictionary id.
    pub fn try_inline(term: &Term) -> Option<TermId> {
        let Term::Typed { lexical, datatype } = term else {
            return None;
        };
        match datatype.as_str() {
            xsd::INTEGER => {
                let value: i64 = lexical.parse().ok()?;
                if value.to_string() != *lexical {
                    return None;
                }
                if !(-INT_OFFSET..INT_OFFSET).contains(&value) {
                    return None;
                }
                Some(Self::inline(TAG_INT, (value + INT_OFFSET) as u64))
            }
            xsd::DOUBLE => {
                let value: f64 = lexical.parse().ok()?;
                if !value.is_finite() || format!("{}", value) != *lexical {
                    return None;
                }
                let bits = value.to_bits();
                if bits & 0xFF != 0 {
                    return None;
                }
                Some(Self::inline(TAG_FLOAT, bits >> 8))
            }
            xsd::DECIMAL => {
                let (mantissa, scale) = parse_decimal(lexical)?;
                if render_decimal(mantissa, scale) != *lexical {
                    return None;
                }
                let payload = (scale as u64) << 48 | (mantissa + MANTISSA_OFFSET) as u64;
                Some(Self::inline(TAG_DECIMAL, payload))
            }
            xsd::DATE_TIME => {
                let dt = NaiveDateTime::parse_from_str(lexical, DATETIME_FORMAT).ok()?;
                let secs = dt.and_utc().timestamp();
                Some(Self::inline(TAG_DATETIME, (secs + INT_OFFSET) as u64))
            }
            xsd::DATE => {
                let d = NaiveDate::parse_from_str(lexical, DATE_FORMAT).ok()?;
                let secs = d.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
                Some(Self::inline(TAG_DATE, (secs + INT_OFFSET) as u64))
            }
            xsd::BOOLEAN => match lexical.as_str() {
                "true" => Some(Self::inline(TAG_BOOL, 1)),
                "false" => Some(Self::inline(TAG_BOOL, 0)),
                _ => None,
            },
            _ => None,
        }
    }

    const fn inline(tag: u8, payload: u64) -> TermId {
        TermId((tag as u64) << 56 | (payload & PAYLOAD_MASK))
    }

    /// Decode an inline id back into its term. `None` for dictionary ids
    /// or an unknown tag byte.
    pub fn decode_inline(self) -> Option<Term> {
        let tag = self.inline_tag()?;
        let payload = self.0 & PAYLOAD_MASK;
        match tag {
            InlineTag::Integer => {
                let value = payload as i64 - INT_OFFSET;
                Some(Term::typed(value.to_string(), xsd::INTEGER))
            }
            InlineTag::Float => {
                let value = f64::from_bits(payload << 8);
                Some(Term::typed(format!("{}", value), xsd::DOUBLE))
            }
            InlineTag::Decimal => {
                let scale = (payload >> 48) as u8;
                let mantissa = (payload & ((1 << 48) - 1)) as i64 - MANTISSA_OFFSET;
                Some(Term::typed(render_decimal(mantissa, scale), xsd::DECIMAL))
            }
            InlineTag::DateTime => {
                let secs = payload as i64 - INT_OFFSET;
                let dt = DateTime::<Utc>::from_timestamp(secs, 0)?;
                Some(Term::typed(
                    dt.format(DATETIME_FORMAT).to_string(),
                    xsd::DATE_TIME,
                ))
            }
            InlineTag::Date => {
                let secs = payload as i64 - INT_OFFSET;
                let dt = DateTime::<Utc>::from_timestamp(secs, 0)?;
                Some(Term::typed(dt.format(DATE_FORMAT).to_string(), xsd::DATE))
            }
            InlineTag::Boolean => Some(Term::boolean(payload == 1)),
        }
    }

    /// The numeric value of an inline numeric id (integer, float or
    /// decimal). Used by the range index and the numeric histograms.
    pub fn inline_numeric(self) -> Option<f64> {
        let tag = self.inline_tag()?;
        let payload = self.0 & PAYLOAD_MASK;
        match tag {
            InlineTag::Integer => Some((payload as i64 - INT_OFFSET) as f64),
            InlineTag::Float => Some(f64::from_bits(payload << 8)),
            InlineTag::Decimal => {
                let scale = (payload >> 48) as u32;
                let mantissa = (payload & ((1 << 48) - 1)) as i64 - MANTISSA_OFFSET;
                Some(mantissa as f64 / 10f64.powi(scale as i32))
            }
            _ => None,
        }
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Parse a canonical decimal lexical form into (mantissa, scale).
///
/// Accepts `[-]digits[.digits]` with no leading zeros on the integer part
/// (a lone `0` is allowed). Trailing zeros in the fraction are preserved
/// through the scale, so `3.10` and `3.1` encode differently and both
/// round-trip exactly.
fn parse_decimal(lexical: &str) -> Option<(i64, u8)> {
    let (negative, body) = match lexical.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lexical),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac_part.len() > 18 {
        return None;
    }
    let digits: String = format!("{int_part}{frac_part}");
    let magnitude: i64 = digits.parse().ok()?;
    if magnitude >= MANTISSA_OFFSET {
        return None;
    }
    let mantissa = if negative { -magnitude } else { magnitude };
    Some((mantissa, frac_part.len() as u8))
}

fn render_decimal(mantissa: i64, scale: u8) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let negative = mantissa < 0;
    let magnitude = mantissa.unsigned_abs();
    let pow = 10u64.pow(scale as u32);
    let int_part = magnitude / pow;
    let frac_part = magnitude % pow;
    let sign = if negative { "-" } else { "" };
    format!(
        "{sign}{int_part}.{frac_part:0width$}",
        width = scale as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // === Id spaces ===

    #[test]
    fn test_dict_ids_are_not_inline() {
        let id = TermId::from_dict(TermKind::Iri, 7);
        assert!(!id.is_inline());
        assert_eq!(id.dict_kind(), Some(TermKind::Iri));
        assert_eq!(id.dict_seq(), Some(7));
    }

    #[test]
    fn test_dict_kind_subspaces_disjoint() {
        let a = TermId::from_dict(TermKind::Iri, 1);
        let b = TermId::from_dict(TermKind::Blank, 1);
        let c = TermId::from_dict(TermKind::Literal, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(b.dict_kind(), Some(TermKind::Blank));
        assert_eq!(c.dict_kind(), Some(TermKind::Literal));
    }

    #[test]
    #[should_panic(expected = "61-bit subspace")]
    fn test_dict_seq_overflow_panics() {
        TermId::from_dict(TermKind::Iri, TermId::MAX_DICT_SEQ + 1);
    }

    // === Inline integers ===

    #[test]
    fn test_inline_integer_round_trip() {
        for v in [-1_000_000i64, -1, 0, 1, 42, 1_000_000] {
            let t = Term::integer(v);
            let id = TermId::try_inline(&t).expect("integer should inline");
            assert!(id.is_inline());
            assert_eq!(id.inline_tag(), Some(InlineTag::Integer));
            assert_eq!(id.decode_inline().unwrap(), t);
            assert_eq!(id.inline_numeric(), Some(v as f64));
        }
    }

    #[test]
    fn test_inline_integer_order_matches_value() {
        let a = TermId::try_inline(&Term::integer(-5)).unwrap();
        let b = TermId::try_inline(&Term::integer(3)).unwrap();
        let c = TermId::try_inline(&Term::integer(4)).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_huge_integer_not_inlined() {
        let t = Term::typed("36893488147419103232", xsd::INTEGER); // 2^65
        assert!(TermId::try_inline(&t).is_none());
    }

    #[test]
    fn test_non_canonical_integer_not_inlined() {
        assert!(TermId::try_inline(&Term::typed("007", xsd::INTEGER)).is_none());
        assert!(TermId::try_inline(&Term::typed("+7", xsd::INTEGER)).is_none());
    }

    // === Inline doubles ===

    #[test]
    fn test_inline_double_round_trip() {
        for v in [0.0, 1.5, -2.25, 1024.0, -0.5] {
            let t = Term::double(v);
            let id = TermId::try_inline(&t).expect("double should inline");
            assert_eq!(id.decode_inline().unwrap(), t);
            assert_eq!(id.inline_numeric(), Some(v));
        }
    }

    #[test]
    fn test_double_with_full_mantissa_not_inlined() {
        // 0.1 uses the full 52-bit mantissa; low 8 bits are non-zero
        let t = Term::double(0.1);
        assert!(TermId::try_inline(&t).is_none());
    }

    #[test]
    fn test_nan_not_inlined() {
        let t = Term::typed("NaN", xsd::DOUBLE);
        assert!(TermId::try_inline(&t).is_none());
    }

    // === Inline decimals ===

    #[test]
    fn test_inline_decimal_round_trip() {
        for lex in ["0", "5", "-5", "3.25", "-3.25", "3.10", "0.001"] {
            let t = Term::typed(lex, xsd::DECIMAL);
            let id = TermId::try_inline(&t).unwrap_or_else(|| panic!("{lex} should inline"));
            assert_eq!(id.decode_inline().unwrap(), t);
        }
    }

    #[test]
    fn test_decimal_trailing_zeros_preserved() {
        let a = TermId::try_inline(&Term::typed("3.1", xsd::DECIMAL)).unwrap();
        let b = TermId::try_inline(&Term::typed("3.10", xsd::DECIMAL)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.inline_numeric(), b.inline_numeric());
    }

    #[test]
    fn test_decimal_leading_zero_not_inlined() {
        assert!(TermId::try_inline(&Term::typed("03.1", xsd::DECIMAL)).is_none());
    }

    // === Inline temporal and boolean ===

    #[test]
    fn test_inline_datetime_round_trip() {
        let t = Term::typed("2024-02-29T12:30:00Z", xsd::DATE_TIME);
        let id = TermId::try_inline(&t).expect("dateTime should inline");
        assert_eq!(id.decode_inline().unwrap(), t);
        assert_eq!(id.inline_numeric(), None);
    }

    #[test]
    fn test_inline_date_round_trip() {
        let t = Term::typed("1969-07-20", xsd::DATE);
        let id = TermId::try_inline(&t).expect("date should inline");
        assert_eq!(id.decode_inline().unwrap(), t);
    }

    #[test]
    fn test_fractional_seconds_not_inlined() {
        let t = Term::typed("2024-01-01T00:00:00.5Z", xsd::DATE_TIME);
        assert!(TermId::try_inline(&t).is_none());
    }

    #[test]
    fn test_inline_boolean() {
        let t = TermId::try_inline(&Term::boolean(true)).unwrap();
        let f = TermId::try_inline(&Term::boolean(false)).unwrap();
        assert_ne!(t, f);
        assert_eq!(t.decode_inline().unwrap(), Term::boolean(true));
        assert_eq!(f.decode_inline().unwrap(), Term::boolean(false));
        // "True" is not a canonical boolean
        assert!(TermId::try_inline(&Term::typed("True", xsd::BOOLEAN)).is_none());
    }

    // === Non-inlinable terms ===

    #[test]
    fn test_strings_and_iris_not_inlined() {
        assert!(TermId::try_inline(&Term::string("42")).is_none());
        assert!(TermId::try_inline(&Term::iri("http://x")).is_none());
        assert!(TermId::try_inline(&Term::lang_string("42", "en")).is_none());
    }

    proptest! {
        #[test]
        fn prop_inline_integer_round_trip(v in -(1i64 << 54)..(1i64 << 54)) {
            let t = Term::integer(v);
            let id = TermId::try_inline(&t).unwrap();
            prop_assert_eq!(id.decode_inline().unwrap(), t);
        }

        #[test]
        fn prop_inline_integer_order(a in -(1i64 << 54)..(1i64 << 54), b in -(1i64 << 54)..(1i64 << 54)) {
            let ia = TermId::try_inline(&Term::integer(a)).unwrap();
            let ib = TermId::try_inline(&Term::integer(b)).unwrap();
            prop_assert_eq!(a < b, ia < ib);
        }
    }
}
