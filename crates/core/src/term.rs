//! RDF terms and their canonical byte form
//!
//! A [`Term`] is one of IRI, blank node, typed literal or language-tagged
//! literal. The canonical byte form — a one-byte type tag followed by the
//! UTF-8 content, with a NUL-separated datatype/language suffix for
//! literals — is the dictionary key, so it must be injective and stable.
//!
//! ## Contract
//!
//! - Lexical forms, datatype IRIs and language tags must not contain NUL
//!   bytes; `validate` rejects them at ingress.
//! - `from_canonical_bytes(canonical_bytes(t)) == t` for every valid term.
//! - Terms arrive already canonicalised from the surface parsers; this
//!   module does not normalise lexical forms.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// XSD namespace datatype IRIs used by the inline encoder.
pub mod xsd {
    /// xsd:integer
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    /// xsd:decimal
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    /// xsd:double
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    /// xsd:boolean
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    /// xsd:dateTime
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
    /// xsd:date
    pub const DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
    /// xsd:string
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
}

/// Type tag for IRIs in the canonical form
const TAG_IRI: u8 = 0x01;
/// Type tag for blank nodes
const TAG_BLANK: u8 = 0x02;
/// Type tag for typed literals
const TAG_TYPED: u8 = 0x03;
/// Type tag for language-tagged literals
const TAG_LANG: u8 = 0x04;

/// Coarse term kind, mirrored in the dictionary id subspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// An IRI reference
    Iri,
    /// A blank node (scoped to a load transaction)
    Blank,
    /// A literal, typed or language-tagged
    Literal,
}

/// An RDF term in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// An IRI reference
    Iri(String),
    /// A blank node label
    Blank(String),
    /// A literal with an explicit datatype IRI
    Typed {
        /// The lexical form
        lexical: String,
        /// The datatype IRI
        datatype: String,
    },
    /// A language-tagged string literal
    LangString {
        /// The lexical form
        lexical: String,
        /// The BCP-47 language tag
        lang: String,
    },
}

impl Term {
    /// Construct an IRI term.
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    /// Construct a blank node term.
    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    /// Construct a typed literal.
    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Typed {
            lexical: lexical.into(),
            datatype: datatype.into(),
        }
    }

    /// Construct a language-tagged literal.
    pub fn lang_string(lexical: impl Into<String>, lang: impl Into<String>) -> Self {
        Term::LangString {
            lexical: lexical.into(),
            lang: lang.into(),
        }
    }

    /// Construct an xsd:integer literal from a value.
    pub fn integer(value: i64) -> Self {
        Term::typed(value.to_string(), xsd::INTEGER)
    }

    /// Construct an xsd:double literal from a value.
    ///
    /// The lexical form is the shortest representation that round-trips
    /// through `f64` parsing, which is the canonical form this store uses.
    pub fn double(value: f64) -> Self {
        Term::typed(format!("{}", value), xsd::DOUBLE)
    }

    /// Construct an xsd:boolean literal.
    pub fn boolean(value: bool) -> Self {
        Term::typed(if value { "true" } else { "false" }, xsd::BOOLEAN)
    }

    /// Construct an xsd:string literal.
    pub fn string(value: impl Into<String>) -> Self {
        Term::typed(value, xsd::STRING)
    }

    /// The coarse kind of this term.
    pub fn kind(&self) -> TermKind {
        match self {
            Term::Iri(_) => TermKind::Iri,
            Term::Blank(_) => TermKind::Blank,
            Term::Typed { .. } | Term::LangString { .. } => TermKind::Literal,
        }
    }

    /// Validate the term for ingress: non-empty IRI/label, no NUL bytes
    /// anywhere (the canonical form uses NUL as a separator).
    pub fn validate(&self) -> Result<()> {
        fn check(part: &str, what: &str) -> Result<()> {
            if part.contains('\x00') {
                return Err(Error::invalid_input(format!("{what} contains a NUL byte")));
            }
            Ok(())
        }
        match self {
            Term::Iri(iri) => {
                if iri.is_empty() {
                    return Err(Error::invalid_input("IRI cannot be empty"));
                }
                check(iri, "IRI")
            }
            Term::Blank(label) => {
                if label.is_empty() {
                    return Err(Error::invalid_input("blank node label cannot be empty"));
                }
                check(label, "blank node label")
            }
            Term::Typed { lexical, datatype } => {
                if datatype.is_empty() {
                    return Err(Error::invalid_input("datatype IRI cannot be empty"));
                }
                check(lexical, "lexical form")?;
                check(datatype, "datatype IRI")
            }
            Term::LangString { lexical, lang } => {
                if lang.is_empty() {
                    return Err(Error::invalid_input("language tag cannot be empty"));
                }
                check(lexical, "lexical form")?;
                check(lang, "language tag")
            }
        }
    }

    /// The canonical byte form: one tag byte, the UTF-8 content, and a
    /// NUL-separated datatype/language suffix for literals.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Term::Iri(iri) => {
                let mut out = Vec::with_capacity(1 + iri.len());
                out.push(TAG_IRI);
                out.extend_from_slice(iri.as_bytes());
                out
            }
            Term::Blank(label) => {
                let mut out = Vec::with_capacity(1 + label.len());
                out.push(TAG_BLANK);
                out.extend_from_slice(label.as_bytes());
                out
            }
            Term::Typed { lexical, datatype } => {
                let mut out = Vec::with_capacity(2 + lexical.len() + datatype.len());
                out.push(TAG_TYPED);
                out.extend_from_slice(lexical.as_bytes());
                out.push(0);
                out.extend_from_slice(datatype.as_bytes());
                out
            }
            Term::LangString { lexical, lang } => {
                let mut out = Vec::with_capacity(2 + lexical.len() + lang.len());
                out.push(TAG_LANG);
                out.extend_from_slice(lexical.as_bytes());
                out.push(0);
                out.extend_from_slice(lang.as_bytes());
                out
            }
        }
    }

    /// Decode a term from its canonical byte form.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Term> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::corrupted("empty canonical term"))?;
        let utf8 = |b: &[u8]| -> Result<String> {
            String::from_utf8(b.to_vec())
                .map_err(|_| Error::corrupted("canonical term is not valid UTF-8"))
        };
        match tag {
            TAG_IRI => Ok(Term::Iri(utf8(rest)?)),
            TAG_BLANK => Ok(Term::Blank(utf8(rest)?)),
            TAG_TYPED | TAG_LANG => {
                let sep = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| Error::corrupted("canonical literal lacks separator"))?;
                let lexical = utf8(&rest[..sep])?;
                let suffix = utf8(&rest[sep + 1..])?;
                if tag == TAG_TYPED {
                    Ok(Term::Typed {
                        lexical,
                        datatype: suffix,
                    })
                } else {
                    Ok(Term::LangString {
                        lexical,
                        lang: suffix,
                    })
                }
            }
            other => Err(Error::corrupted(format!(
                "unknown canonical term tag 0x{other:02x}"
            ))),
        }
    }

    /// The numeric value of this term, when it is a numeric typed literal.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Term::Typed { lexical, datatype } => match datatype.as_str() {
                xsd::INTEGER | xsd::DECIMAL | xsd::DOUBLE => lexical.parse::<f64>().ok(),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Typed { lexical, datatype } => write!(f, "\"{lexical}\"^^<{datatype}>"),
            Term::LangString { lexical, lang } => write!(f, "\"{lexical}\"@{lang}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // === Canonical form ===

    #[test]
    fn test_canonical_round_trip_iri() {
        let t = Term::iri("http://example.org/a");
        assert_eq!(Term::from_canonical_bytes(&t.canonical_bytes()).unwrap(), t);
    }

    #[test]
    fn test_canonical_round_trip_blank() {
        let t = Term::blank("b42");
        assert_eq!(Term::from_canonical_bytes(&t.canonical_bytes()).unwrap(), t);
    }

    #[test]
    fn test_canonical_round_trip_typed() {
        let t = Term::typed("42", xsd::INTEGER);
        assert_eq!(Term::from_canonical_bytes(&t.canonical_bytes()).unwrap(), t);
    }

    #[test]
    fn test_canonical_round_trip_lang() {
        let t = Term::lang_string("bonjour", "fr");
        assert_eq!(Term::from_canonical_bytes(&t.canonical_bytes()).unwrap(), t);
    }

    #[test]
    fn test_canonical_forms_are_distinct() {
        // Same text, different kinds must not collide
        let iri = Term::iri("x");
        let blank = Term::blank("x");
        let lit = Term::string("x");
        assert_ne!(iri.canonical_bytes(), blank.canonical_bytes());
        assert_ne!(iri.canonical_bytes(), lit.canonical_bytes());
        assert_ne!(blank.canonical_bytes(), lit.canonical_bytes());
    }

    #[test]
    fn test_typed_and_lang_do_not_collide() {
        let typed = Term::typed("a", "fr");
        let lang = Term::lang_string("a", "fr");
        assert_ne!(typed.canonical_bytes(), lang.canonical_bytes());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Term::from_canonical_bytes(&[]).is_err());
        assert!(Term::from_canonical_bytes(&[0x7f, b'x']).is_err());
        // Typed literal without separator
        assert!(Term::from_canonical_bytes(&[TAG_TYPED, b'x']).is_err());
    }

    // === Validation ===

    #[test]
    fn test_validate_rejects_nul() {
        assert!(Term::iri("a\x00b").validate().is_err());
        assert!(Term::typed("a\x00", xsd::STRING).validate().is_err());
        assert!(Term::lang_string("ok", "f\x00r").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(Term::iri("").validate().is_err());
        assert!(Term::blank("").validate().is_err());
        assert!(Term::typed("ok", "").validate().is_err());
        assert!(Term::lang_string("ok", "").validate().is_err());
    }

    #[test]
    fn test_validate_accepts_unicode() {
        assert!(Term::iri("http://example.org/日本語").validate().is_ok());
        assert!(Term::lang_string("héllo", "fr").validate().is_ok());
    }

    // === Numerics ===

    #[test]
    fn test_as_f64() {
        assert_eq!(Term::integer(42).as_f64(), Some(42.0));
        assert_eq!(Term::double(1.5).as_f64(), Some(1.5));
        assert_eq!(Term::typed("3.25", xsd::DECIMAL).as_f64(), Some(3.25));
        assert_eq!(Term::string("42").as_f64(), None);
        assert_eq!(Term::iri("http://x").as_f64(), None);
    }

    #[test]
    fn test_kind() {
        assert_eq!(Term::iri("x").kind(), TermKind::Iri);
        assert_eq!(Term::blank("x").kind(), TermKind::Blank);
        assert_eq!(Term::string("x").kind(), TermKind::Literal);
        assert_eq!(Term::lang_string("x", "en").kind(), TermKind::Literal);
    }

    proptest! {
        #[test]
        fn prop_canonical_round_trip(lexical in "[a-zA-Z0-9 .:/#-]{0,40}", dt in "[a-z:/#]{1,30}") {
            let t = Term::typed(lexical, dt);
            prop_assert_eq!(Term::from_canonical_bytes(&t.canonical_bytes()).unwrap(), t);
        }
    }
}
