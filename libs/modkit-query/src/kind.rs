//! Shared `FieldKind` enum for the repository type system.
//!
//! This enum represents the logical types of persistent properties. It is
//! used by the metamodel, the part-tree parser (ignore-case checks), the DTO
//! rewrite (constructor compatibility) and by the `sea-orm` binding when
//! coercing bound arguments.

use std::fmt;

/// Logical property types known to the query layer.
///
/// # Example
///
/// ```
/// use modkit_query::FieldKind;
///
/// assert!(FieldKind::String.is_textual());
/// assert_eq!(FieldKind::I64.to_string(), "I64");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    I64,
    F64,
    Bool,
    Uuid,
    DateTimeUtc,
    Date,
    Time,
    Decimal,
    /// Dense float vector used by similarity search.
    Vector,
}

impl FieldKind {
    /// Whether case-insensitive comparison can be applied to this kind.
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, FieldKind::String)
    }

    /// Whether values of this kind have a total order usable for keyset scrolling.
    #[must_use]
    pub const fn is_orderable(self) -> bool {
        !matches!(self, FieldKind::Vector)
    }

    /// Parse the tag written by `Display` back into a kind.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "String" => FieldKind::String,
            "I64" => FieldKind::I64,
            "F64" => FieldKind::F64,
            "Bool" => FieldKind::Bool,
            "Uuid" => FieldKind::Uuid,
            "DateTimeUtc" => FieldKind::DateTimeUtc,
            "Date" => FieldKind::Date,
            "Time" => FieldKind::Time,
            "Decimal" => FieldKind::Decimal,
            "Vector" => FieldKind::Vector,
            _ => return None,
        })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "String"),
            FieldKind::I64 => write!(f, "I64"),
            FieldKind::F64 => write!(f, "F64"),
            FieldKind::Bool => write!(f, "Bool"),
            FieldKind::Uuid => write!(f, "Uuid"),
            FieldKind::DateTimeUtc => write!(f, "DateTimeUtc"),
            FieldKind::Date => write!(f, "Date"),
            FieldKind::Time => write!(f, "Time"),
            FieldKind::Decimal => write!(f, "Decimal"),
            FieldKind::Vector => write!(f, "Vector"),
        }
    }
}
