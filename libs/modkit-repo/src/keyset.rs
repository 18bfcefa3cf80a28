//! Keyset predicates as `SeaORM` conditions.

use modkit_query::scroll::QueryStrategy;
use modkit_query::sort::{Direction, Order};
use modkit_query::{Error, Value};
use sea_orm::{Condition, EntityTrait};

use crate::field_map::{FieldMap, Path};
use crate::specification::CriteriaBuilder;
use crate::RepoError;

/// Builds keyset conditions against mapped columns.
pub struct SeaOrmStrategy<'a, E: EntityTrait> {
    fields: &'a FieldMap<E>,
    cb: CriteriaBuilder,
}

impl<'a, E: EntityTrait> SeaOrmStrategy<'a, E> {
    #[must_use]
    pub fn new(fields: &'a FieldMap<E>) -> Self {
        Self {
            fields,
            cb: CriteriaBuilder,
        }
    }
}

pub(crate) fn query_error(e: RepoError) -> Error {
    match e {
        RepoError::Query(inner) => inner,
        RepoError::UnknownProperty(property) => {
            Error::InvalidScrollPosition(format!("sort property `{property}` is not mapped"))
        }
        other => Error::InvalidArgument(other.to_string()),
    }
}

impl<E: EntityTrait> QueryStrategy for SeaOrmStrategy<'_, E> {
    type Expression = Path<E>;
    type Predicate = Condition;

    fn create_expression(&mut self, property: &str) -> Result<Path<E>, Error> {
        self.fields.path(property).map_err(query_error)
    }

    fn compare(&mut self, order: &Order, path: Path<E>, value: &Value) -> Result<Condition, Error> {
        let path = if order.ignore_case { path.upper() } else { path };
        match (value.is_null(), order.direction) {
            (true, Direction::Asc) => Ok(self.cb.is_null(&path)),
            (true, Direction::Desc) => Ok(self.cb.is_not_null(&path)),
            (false, Direction::Asc) => self.cb.greater_than(&path, value).map_err(query_error),
            (false, Direction::Desc) => self.cb.less_than(&path, value).map_err(query_error),
        }
    }

    fn compare_equal(&mut self, path: Path<E>, value: &Value) -> Result<Condition, Error> {
        self.cb.equal(&path, value).map_err(query_error)
    }

    fn and(&mut self, predicates: Vec<Condition>) -> Condition {
        predicates
            .into_iter()
            .fold(Condition::all(), Condition::add)
    }

    fn or(&mut self, predicates: Vec<Condition>) -> Condition {
        predicates
            .into_iter()
            .fold(Condition::any(), Condition::add)
    }
}
