use std::fmt;

use crate::metamodel::{Metamodel, PropertyKind, normalize};
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Declared property name.
    pub name: String,
    pub kind: PropertyKind,
}

/// A resolved, non-empty chain of properties starting at `owner`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    pub owner: String,
    pub segments: Vec<PathSegment>,
}

impl PropertyPath {
    /// Resolve a method-name fragment such as `AddressZipCode` or
    /// `Address_ZipCode` against `owner`.
    ///
    /// Camel-case words are matched greedily, longest prefix first, and the
    /// resolver backtracks into shorter prefixes when the remainder cannot be
    /// resolved on the nested type. An `_` forces a segment boundary.
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` naming the fragment when no decomposition
    /// matches.
    pub fn from_source(source: &str, owner: &str, model: &Metamodel) -> Result<Self, Error> {
        let invalid = || Error::InvalidPath {
            domain: owner.to_owned(),
            segment: uncapitalize(source),
        };
        if source.is_empty() {
            return Err(invalid());
        }

        let mut segments = Vec::new();
        let mut current = owner.to_owned();
        for (i, piece) in source.split('_').enumerate() {
            if piece.is_empty() {
                return Err(invalid());
            }
            if i > 0 {
                let last: &PathSegment = segments.last().ok_or_else(invalid)?;
                current = last.kind.target().ok_or_else(invalid)?.to_owned();
            }
            let words = camel_words(piece);
            let resolved = resolve_words(&words, &current, model).ok_or_else(invalid)?;
            segments.extend(resolved);
        }
        Ok(Self {
            owner: owner.to_owned(),
            segments,
        })
    }

    /// Resolve an already dotted path (`address.zipCode`).
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` naming the first unknown segment.
    pub fn from_dotted(dotted: &str, owner: &str, model: &Metamodel) -> Result<Self, Error> {
        let mut segments: Vec<PathSegment> = Vec::new();
        let mut current = owner.to_owned();
        for name in dotted.split('.') {
            if let Some(last) = segments.last() {
                current = last
                    .kind
                    .target()
                    .ok_or_else(|| Error::InvalidPath {
                        domain: current.clone(),
                        segment: name.to_owned(),
                    })?
                    .to_owned();
            }
            let prop = model
                .property(&current, &normalize(name))
                .ok_or_else(|| Error::InvalidPath {
                    domain: current.clone(),
                    segment: name.to_owned(),
                })?;
            segments.push(PathSegment {
                name: prop.name.clone(),
                kind: prop.kind.clone(),
            });
        }
        Ok(Self {
            owner: owner.to_owned(),
            segments,
        })
    }

    /// Dot-separated declared names.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    #[must_use]
    pub fn leaf(&self) -> &PathSegment {
        // Non-empty by construction.
        &self.segments[self.segments.len() - 1]
    }

    #[must_use]
    pub fn leaf_kind(&self) -> &PropertyKind {
        &self.leaf().kind
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self.leaf_kind(), PropertyKind::Collection(_))
    }

    /// Length of the matched source text, used to rank ambiguous parses.
    #[must_use]
    pub fn weight(&self) -> usize {
        self.segments.iter().map(|s| normalize(&s.name).len()).sum()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.dotted())
    }
}

fn resolve_words(words: &[&str], owner: &str, model: &Metamodel) -> Option<Vec<PathSegment>> {
    for n in (1..=words.len()).rev() {
        let candidate = normalize(&words[..n].concat());
        let Some(prop) = model.property(owner, &candidate) else {
            continue;
        };
        let head = PathSegment {
            name: prop.name.clone(),
            kind: prop.kind.clone(),
        };
        if n == words.len() {
            return Some(vec![head]);
        }
        if let Some(target) = prop.kind.target()
            && let Some(rest) = resolve_words(&words[n..], target, model)
        {
            let mut out = Vec::with_capacity(rest.len() + 1);
            out.push(head);
            out.extend(rest);
            return Some(out);
        }
    }
    None
}

/// Split `AddressZipCode` into `["Address", "Zip", "Code"]`.
fn camel_words(s: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if i > start && c.is_uppercase() {
            words.push(&s[start..i]);
            start = i;
        }
    }
    if start < s.len() {
        words.push(&s[start..]);
    }
    words
}

fn uncapitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
