//! Entity metamodel consumed by the parser and the query creator.
//!
//! A [`Metamodel`] is a read-only registry of [`EntityType`]s. Embeddable
//! types are registered like entities but carry no identifier.

use std::collections::HashMap;
use std::fmt;

use crate::{Error, FieldKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Scalar column.
    Basic(FieldKind),
    /// Value object stored inline; names the embeddable type.
    Embedded(String),
    /// Single-valued reference to another entity.
    Association(String),
    /// Multi-valued reference; names the element type.
    Collection(String),
}

impl PropertyKind {
    /// Type to continue navigation into, if this property is not a scalar.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            PropertyKind::Basic(_) => None,
            PropertyKind::Embedded(t) | PropertyKind::Association(t) | PropertyKind::Collection(t) => {
                Some(t)
            }
        }
    }

    #[must_use]
    pub fn field_kind(&self) -> Option<FieldKind> {
        match self {
            PropertyKind::Basic(k) => Some(*k),
            _ => None,
        }
    }

    /// Whether navigating through this property requires a join.
    #[must_use]
    pub fn is_join(&self) -> bool {
        matches!(self, PropertyKind::Association(_) | PropertyKind::Collection(_))
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Basic(k) => write!(f, "{k}"),
            PropertyKind::Embedded(t) => write!(f, "embedded {t}"),
            PropertyKind::Association(t) => write!(f, "association to {t}"),
            PropertyKind::Collection(t) => write!(f, "collection of {t}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

/// Persistent type description built with a consuming builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub properties: Vec<Property>,
    pub id: Vec<String>,
    pub super_type: Option<String>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            id: Vec::new(),
            super_type: None,
        }
    }

    #[must_use]
    pub fn id(mut self, name: &str, kind: FieldKind) -> Self {
        self.id.push(name.to_owned());
        self.with(name, PropertyKind::Basic(kind))
    }

    #[must_use]
    pub fn basic(self, name: &str, kind: FieldKind) -> Self {
        self.with(name, PropertyKind::Basic(kind))
    }

    #[must_use]
    pub fn embedded(self, name: &str, type_name: &str) -> Self {
        self.with(name, PropertyKind::Embedded(type_name.to_owned()))
    }

    #[must_use]
    pub fn association(self, name: &str, type_name: &str) -> Self {
        self.with(name, PropertyKind::Association(type_name.to_owned()))
    }

    #[must_use]
    pub fn collection(self, name: &str, element_type: &str) -> Self {
        self.with(name, PropertyKind::Collection(element_type.to_owned()))
    }

    #[must_use]
    pub fn extends(mut self, super_type: &str) -> Self {
        self.super_type = Some(super_type.to_owned());
        self
    }

    fn with(mut self, name: &str, kind: PropertyKind) -> Self {
        self.properties.push(Property {
            name: name.to_owned(),
            kind,
        });
        self
    }
}

/// Normalized form used when matching method-name words against property
/// names: lowercase with underscores removed.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Registry of entity and embeddable types.
#[derive(Clone, Debug, Default)]
pub struct Metamodel {
    types: HashMap<String, EntityType>,
}

impl Metamodel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, ty: EntityType) -> Self {
        self.register(ty);
        self
    }

    pub fn register(&mut self, ty: EntityType) {
        self.types.insert(ty.name.clone(), ty);
    }

    /// # Errors
    /// Returns `Error::UnknownEntity` if the type is not registered.
    pub fn entity(&self, name: &str) -> Result<&EntityType, Error> {
        self.types
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_owned()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Find a property by its normalized name, searching super types.
    #[must_use]
    pub fn property(&self, type_name: &str, normalized: &str) -> Option<&Property> {
        let mut current = self.types.get(type_name);
        while let Some(ty) = current {
            if let Some(p) = ty.properties.iter().find(|p| normalize(&p.name) == normalized) {
                return Some(p);
            }
            current = ty.super_type.as_deref().and_then(|s| self.types.get(s));
        }
        None
    }

    /// Identifier attributes of a type, inherited from super types if absent.
    #[must_use]
    pub fn id_attributes(&self, type_name: &str) -> Vec<String> {
        let mut current = self.types.get(type_name);
        while let Some(ty) = current {
            if !ty.id.is_empty() {
                return ty.id.clone();
            }
            current = ty.super_type.as_deref().and_then(|s| self.types.get(s));
        }
        Vec::new()
    }

    /// Whether `sub` is `ancestor` or inherits from it.
    #[must_use]
    pub fn is_assignable(&self, sub: &str, ancestor: &str) -> bool {
        let mut current = Some(sub);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.types.get(name).and_then(|t| t.super_type.as_deref());
        }
        false
    }

    /// Resolve a dotted path to the kind of its last segment.
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` naming the first unknown segment.
    pub fn resolve(&self, type_name: &str, dotted: &str) -> Result<&PropertyKind, Error> {
        let mut owner = type_name;
        let mut found: Option<&Property> = None;
        for segment in dotted.split('.') {
            if let Some(prev) = found {
                owner = prev.kind.target().ok_or_else(|| Error::InvalidPath {
                    domain: owner.to_owned(),
                    segment: segment.to_owned(),
                })?;
            }
            found = Some(
                self.property(owner, &normalize(segment))
                    .ok_or_else(|| Error::InvalidPath {
                        domain: owner.to_owned(),
                        segment: segment.to_owned(),
                    })?,
            );
        }
        found.map(|p| &p.kind).ok_or_else(|| Error::InvalidPath {
            domain: type_name.to_owned(),
            segment: dotted.to_owned(),
        })
    }
}
