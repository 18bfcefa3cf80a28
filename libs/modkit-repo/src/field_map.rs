//! Property to column mapping and value coercion.
//!
//! Property names follow the metamodel (`lastname`, `address.zipCode`);
//! embedded values map to their flattened columns. Lookups are
//! case-insensitive.

use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use modkit_query::{FieldKind, Value};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{EntityTrait, ModelTrait};

use crate::RepoError;

#[derive(Clone)]
pub struct Field<E: EntityTrait> {
    pub name: String,
    pub col: E::Column,
    pub kind: FieldKind,
}

#[derive(Clone)]
#[must_use]
pub struct FieldMap<E: EntityTrait> {
    map: HashMap<String, Field<E>>,
    ids: Vec<String>,
}

impl<E: EntityTrait> Default for FieldMap<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityTrait> FieldMap<E> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            ids: Vec::new(),
        }
    }

    pub fn insert(mut self, property: impl Into<String>, col: E::Column, kind: FieldKind) -> Self {
        let name = property.into();
        self.map.insert(
            name.to_lowercase(),
            Field {
                name,
                col,
                kind,
            },
        );
        self
    }

    /// Map an identifier property; identifiers are the keyset tie-breakers.
    pub fn id(mut self, property: impl Into<String>, col: E::Column, kind: FieldKind) -> Self {
        let name = property.into();
        self.ids.push(name.clone());
        self.insert(name, col, kind)
    }

    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Field<E>> {
        self.map.get(&property.to_lowercase())
    }

    /// # Errors
    /// Returns `RepoError::UnknownProperty` for unmapped properties.
    pub fn path(&self, property: &str) -> Result<Path<E>, RepoError> {
        let field = self
            .get(property)
            .ok_or_else(|| RepoError::UnknownProperty(property.to_owned()))?;
        Ok(Path {
            name: field.name.clone(),
            col: field.col,
            kind: field.kind,
            upper: false,
        })
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Sort-key values of `model` for keyset positions.
    ///
    /// # Errors
    /// Returns `RepoError::UnknownProperty` for unmapped properties and
    /// `RepoError::TypeMismatch` for column values without a query value.
    pub fn key_values<'p>(
        &self,
        model: &E::Model,
        properties: impl IntoIterator<Item = &'p str>,
    ) -> Result<Vec<(String, Value)>, RepoError> {
        properties
            .into_iter()
            .map(|property| {
                let field = self
                    .get(property)
                    .ok_or_else(|| RepoError::UnknownProperty(property.to_owned()))?;
                Ok((property.to_owned(), from_column(field, model.get(field.col))?))
            })
            .collect()
    }
}

/// A resolved property: column, kind and case folding.
#[derive(Clone, Debug)]
pub struct Path<E: EntityTrait> {
    pub name: String,
    pub col: E::Column,
    pub kind: FieldKind,
    upper: bool,
}

impl<E: EntityTrait> Path<E> {
    /// Compare through `upper(...)`; bound values are upper-cased too.
    #[must_use]
    pub fn upper(mut self) -> Self {
        self.upper = true;
        self
    }

    #[must_use]
    pub fn is_upper(&self) -> bool {
        self.upper
    }

    pub(crate) fn expr(&self) -> SimpleExpr {
        if self.upper {
            Func::upper(Expr::col(self.col)).into()
        } else {
            Expr::col(self.col).into()
        }
    }

    /// Coerce a query value for this column.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the kind.
    pub fn coerce(&self, value: &Value) -> Result<sea_orm::Value, RepoError> {
        if self.upper
            && let Value::String(s) = value
        {
            return coerce(&self.name, self.kind, &Value::String(s.to_uppercase()));
        }
        coerce(&self.name, self.kind, value)
    }

    /// Coerce every element of a list argument.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` for non-list arguments or elements
    /// that do not fit the kind.
    pub fn coerce_many(&self, value: &Value) -> Result<Vec<sea_orm::Value>, RepoError> {
        match value {
            Value::List(items) => items.iter().map(|v| self.coerce(v)).collect(),
            other => Err(self.mismatch(other)),
        }
    }

    pub(crate) fn mismatch(&self, got: &Value) -> RepoError {
        mismatch(&self.name, self.kind, got)
    }
}

fn mismatch(property: &str, expected: FieldKind, got: &Value) -> RepoError {
    RepoError::TypeMismatch {
        property: property.to_owned(),
        expected,
        got: got.to_string(),
    }
}

/* ---------- coercion helpers ---------- */

fn bigdecimal_to_decimal(property: &str, bd: &BigDecimal) -> Result<Decimal, RepoError> {
    // Preserve precision via string.
    let s = bd.normalized().to_string();
    Decimal::from_str_exact(&s)
        .or_else(|_| s.parse::<Decimal>())
        .map_err(|_| RepoError::InvalidArgument(format!("`{property}`: invalid decimal {s}")))
}

fn coerce(property: &str, kind: FieldKind, v: &Value) -> Result<sea_orm::Value, RepoError> {
    use sea_orm::Value as S;
    Ok(match (kind, v) {
        (FieldKind::String, Value::String(s)) => S::String(Some(Box::new(s.clone()))),
        (FieldKind::I64, Value::Number(n)) => {
            S::BigInt(Some(n.to_i64().ok_or_else(|| mismatch(property, kind, v))?))
        }
        (FieldKind::F64, Value::Number(n)) => {
            S::Double(Some(n.to_f64().ok_or_else(|| mismatch(property, kind, v))?))
        }
        (FieldKind::Decimal, Value::Number(n)) => {
            S::Decimal(Some(Box::new(bigdecimal_to_decimal(property, n)?)))
        }
        (FieldKind::Bool, Value::Bool(b)) => S::Bool(Some(*b)),
        (FieldKind::Uuid, Value::Uuid(u)) => S::Uuid(Some(Box::new(*u))),
        (FieldKind::DateTimeUtc, Value::DateTime(dt)) => S::ChronoDateTimeUtc(Some(Box::new(*dt))),
        (FieldKind::Date, Value::Date(d)) => S::ChronoDate(Some(Box::new(*d))),
        (FieldKind::Time, Value::Time(t)) => S::ChronoTime(Some(Box::new(*t))),
        (expected, other) => return Err(mismatch(property, expected, other)),
    })
}

/// Bind a value without a column to coerce against, as native query
/// parameters are bound. Integral numbers bind as `BIGINT`.
pub(crate) fn bind_value(v: &Value) -> Result<sea_orm::Value, RepoError> {
    use sea_orm::Value as S;
    Ok(match v {
        Value::Null => S::String(None),
        Value::Bool(b) => S::Bool(Some(*b)),
        Value::Number(n) => match n.to_i64() {
            Some(i) if BigDecimal::from(i) == *n => S::BigInt(Some(i)),
            _ => S::Double(n.to_f64()),
        },
        Value::Uuid(u) => S::Uuid(Some(Box::new(*u))),
        Value::DateTime(dt) => S::ChronoDateTimeUtc(Some(Box::new(*dt))),
        Value::Date(d) => S::ChronoDate(Some(Box::new(*d))),
        Value::Time(t) => S::ChronoTime(Some(Box::new(*t))),
        Value::String(s) => S::String(Some(Box::new(s.clone()))),
        Value::Vector(_) | Value::Range(..) | Value::List(_) => {
            return Err(RepoError::InvalidArgument(format!(
                "{v} arguments cannot be bound to a native query"
            )));
        }
    })
}

/// Read a column value back into the query value model.
fn from_column<E: EntityTrait>(field: &Field<E>, v: sea_orm::Value) -> Result<Value, RepoError> {
    use sea_orm::Value as S;
    let unreadable = || RepoError::TypeMismatch {
        property: field.name.clone(),
        expected: field.kind,
        got: "unreadable column value".to_owned(),
    };
    Ok(match v {
        S::Bool(b) => b.into(),
        S::TinyInt(i) => i.map(i64::from).into(),
        S::SmallInt(i) => i.map(i64::from).into(),
        S::Int(i) => i.map(i64::from).into(),
        S::BigInt(i) => i.into(),
        S::TinyUnsigned(i) => i.map(i64::from).into(),
        S::SmallUnsigned(i) => i.map(i64::from).into(),
        S::Unsigned(i) => i.map(i64::from).into(),
        S::BigUnsigned(Some(i)) => Value::Number(BigDecimal::from(i)),
        S::Float(Some(f)) => decimal_text(&f.to_string()).ok_or_else(unreadable)?,
        S::Double(Some(f)) => decimal_text(&f.to_string()).ok_or_else(unreadable)?,
        S::Decimal(Some(d)) => decimal_text(&d.to_string()).ok_or_else(unreadable)?,
        S::String(s) => s.map(|s| *s).into(),
        S::Char(c) => c.map(String::from).into(),
        S::Uuid(u) => u.map(|u| *u).into(),
        S::ChronoDateTimeUtc(dt) => dt.map(|dt| *dt).into(),
        S::ChronoDate(Some(d)) => Value::Date(*d),
        S::ChronoTime(Some(t)) => Value::Time(*t),
        S::BigUnsigned(None)
        | S::Float(None)
        | S::Double(None)
        | S::Decimal(None)
        | S::ChronoDate(None)
        | S::ChronoTime(None) => Value::Null,
        _ => return Err(unreadable()),
    })
}

fn decimal_text(s: &str) -> Option<Value> {
    BigDecimal::from_str(s).ok().map(Value::Number)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    mod ent {
        use sea_orm::entity::prelude::*;

        #[derive(Debug, Clone, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "person")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub name: String,
            pub nickname: Option<String>,
            pub weight: f64,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    fn fields() -> FieldMap<ent::Entity> {
        FieldMap::new()
            .id("id", ent::Column::Id, FieldKind::I64)
            .insert("name", ent::Column::Name, FieldKind::String)
            .insert("nickname", ent::Column::Nickname, FieldKind::String)
            .insert("weight", ent::Column::Weight, FieldKind::F64)
    }

    #[test]
    fn lookup_is_case_insensitive_and_keeps_declared_name() {
        let path = fields().path("NAME").unwrap();
        assert_eq!(path.name, "name");
        assert!(matches!(fields().path("age"), Err(RepoError::UnknownProperty(p)) if p == "age"));
    }

    #[test]
    fn coercion_follows_field_kind() {
        let f = fields();
        let id = f.path("id").unwrap();
        assert_eq!(id.coerce(&Value::from(7)).unwrap(), sea_orm::Value::BigInt(Some(7)));
        assert!(matches!(
            id.coerce(&Value::from("7")),
            Err(RepoError::TypeMismatch { expected: FieldKind::I64, .. })
        ));
        let upper = f.path("name").unwrap().upper();
        assert_eq!(
            upper.coerce(&Value::from("doe")).unwrap(),
            sea_orm::Value::String(Some(Box::new("DOE".to_owned())))
        );
    }

    #[test]
    fn key_values_read_model_columns() {
        let model = ent::Model {
            id: 3,
            name: "Ann".to_owned(),
            nickname: None,
            weight: 61.5,
        };
        let keys = fields()
            .key_values(&model, ["name", "nickname", "id"])
            .unwrap();
        assert_eq!(
            keys,
            vec![
                ("name".to_owned(), Value::from("Ann")),
                ("nickname".to_owned(), Value::Null),
                ("id".to_owned(), Value::from(3)),
            ]
        );
        assert_eq!(fields().ids(), ["id".to_owned()]);
    }
}
