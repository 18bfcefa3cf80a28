//! Result shapes of repository methods.

use std::collections::HashMap;

use crate::metamodel::Metamodel;
use crate::{Error, FieldKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstructorParam {
    pub name: String,
    /// Declared kind, when known, used to check selection compatibility.
    pub kind: Option<FieldKind>,
}

/// A class-based or interface-based projection type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectionType {
    /// Instantiated through a constructor expression.
    Dto {
        name: String,
        params: Vec<ConstructorParam>,
        /// Type the DTO inherits from, if any.
        extends: Option<String>,
    },
    /// Backed by aliased columns named after its properties.
    Interface { name: String, properties: Vec<String> },
}

impl ProjectionType {
    pub fn dto<I, S>(name: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<FieldKind>)>,
        S: Into<String>,
    {
        ProjectionType::Dto {
            name: name.to_owned(),
            params: params
                .into_iter()
                .map(|(n, kind)| ConstructorParam {
                    name: n.into(),
                    kind,
                })
                .collect(),
            extends: None,
        }
    }

    pub fn interface<I, S>(name: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProjectionType::Interface {
            name: name.to_owned(),
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn extending(self, parent: &str) -> Self {
        match self {
            ProjectionType::Dto { name, params, .. } => ProjectionType::Dto {
                name,
                params,
                extends: Some(parent.to_owned()),
            },
            other @ ProjectionType::Interface { .. } => other,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ProjectionType::Dto { name, .. } | ProjectionType::Interface { name, .. } => name,
        }
    }
}

/// Projection types known to a repository.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, ProjectionType>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, ty: ProjectionType) -> Self {
        self.types.insert(ty.name().to_owned(), ty);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProjectionType> {
        self.types.get(name)
    }
}

const SCALARS: &[&str] = &[
    "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "String", "Uuid",
    "Decimal", "BigDecimal", "DateTime", "NaiveDate", "NaiveTime", "()",
];

/// Resolved result shape of a query method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnedType {
    /// The domain type or a type within its hierarchy.
    Domain { domain: String, returned: String },
    /// A class projection outside the domain hierarchy.
    Dto {
        domain: String,
        name: String,
        params: Vec<ConstructorParam>,
    },
    Interface {
        domain: String,
        name: String,
        properties: Vec<String>,
    },
    /// Single scalar value such as a count or an existence flag.
    Scalar { domain: String, name: String },
}

impl ReturnedType {
    /// Resolve `returned` for a method on a repository of `domain`.
    ///
    /// # Errors
    /// Returns `Error::UnresolvableReturnType` if the name is neither a scalar,
    /// a type in the metamodel, nor a registered projection.
    pub fn of(
        returned: &str,
        domain: &str,
        model: &Metamodel,
        registry: &TypeRegistry,
    ) -> Result<Self, Error> {
        let in_hierarchy =
            |name: &str| model.is_assignable(domain, name) || model.is_assignable(name, domain);

        if in_hierarchy(returned) || model.contains(returned) {
            return Ok(ReturnedType::Domain {
                domain: domain.to_owned(),
                returned: returned.to_owned(),
            });
        }
        if SCALARS.contains(&returned) {
            return Ok(ReturnedType::Scalar {
                domain: domain.to_owned(),
                name: returned.to_owned(),
            });
        }
        match registry.get(returned) {
            Some(ProjectionType::Dto {
                name,
                params,
                extends,
            }) => {
                if extends.as_deref().is_some_and(in_hierarchy) {
                    Ok(ReturnedType::Domain {
                        domain: domain.to_owned(),
                        returned: name.clone(),
                    })
                } else {
                    Ok(ReturnedType::Dto {
                        domain: domain.to_owned(),
                        name: name.clone(),
                        params: params.clone(),
                    })
                }
            }
            Some(ProjectionType::Interface { name, properties }) => Ok(ReturnedType::Interface {
                domain: domain.to_owned(),
                name: name.clone(),
                properties: properties.clone(),
            }),
            None => Err(Error::UnresolvableReturnType(returned.to_owned())),
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        match self {
            ReturnedType::Domain { domain, .. }
            | ReturnedType::Dto { domain, .. }
            | ReturnedType::Interface { domain, .. }
            | ReturnedType::Scalar { domain, .. } => domain,
        }
    }

    #[must_use]
    pub fn returned_name(&self) -> &str {
        match self {
            ReturnedType::Domain { returned, .. } => returned,
            ReturnedType::Dto { name, .. }
            | ReturnedType::Interface { name, .. }
            | ReturnedType::Scalar { name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_projecting(&self) -> bool {
        matches!(self, ReturnedType::Dto { .. } | ReturnedType::Interface { .. })
    }

    /// Whether the selection must become a constructor expression.
    #[must_use]
    pub fn needs_constructor_expression(&self) -> bool {
        matches!(self, ReturnedType::Dto { .. })
    }

    #[must_use]
    pub fn constructor_params(&self) -> &[ConstructorParam] {
        match self {
            ReturnedType::Dto { params, .. } => params,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::EntityType;

    fn setup() -> (Metamodel, TypeRegistry) {
        let model = Metamodel::new()
            .with(EntityType::new("Person").id("id", FieldKind::I64))
            .with(EntityType::new("User").extends("Person"));
        let registry = TypeRegistry::new()
            .with(ProjectionType::dto("UserDto", [("firstname", Some(FieldKind::String))]))
            .with(ProjectionType::dto("AdminView", [("id", None::<FieldKind>)]).extending("User"))
            .with(ProjectionType::interface("NameOnly", ["firstname"]));
        (model, registry)
    }

    #[test]
    fn resolves_each_shape() {
        let (m, r) = setup();
        assert!(matches!(
            ReturnedType::of("Person", "User", &m, &r).unwrap(),
            ReturnedType::Domain { .. }
        ));
        assert!(ReturnedType::of("UserDto", "User", &m, &r)
            .unwrap()
            .needs_constructor_expression());
        assert!(!ReturnedType::of("AdminView", "User", &m, &r)
            .unwrap()
            .needs_constructor_expression());
        assert!(ReturnedType::of("NameOnly", "User", &m, &r).unwrap().is_projecting());
        assert!(matches!(
            ReturnedType::of("u64", "User", &m, &r).unwrap(),
            ReturnedType::Scalar { .. }
        ));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let (m, r) = setup();
        assert_eq!(
            ReturnedType::of("Ghost", "User", &m, &r).unwrap_err(),
            Error::UnresolvableReturnType("Ghost".to_owned())
        );
    }
}
