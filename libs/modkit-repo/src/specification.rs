//! Composable predicates over a `SeaORM` entity.
//!
//! A specification contributes an optional `Condition`; `None` means "no
//! restriction". Composition treats `None` as the neutral element:
//!
//! - `a.and(b)` with `a` unrestricted is `b`; symmetric for `or`.
//! - `not(s)` with `s` unrestricted selects nothing.
//! - `all_of([])` and `any_of([])` are unrestricted.
//!
//! [`Specification`] is parameterized by the query kind it restricts:
//! [`Select`] specifications may mark their query distinct, [`Delete`]
//! specifications restrict bulk deletes. [`PredicateSpecification`] sees
//! neither and adapts into both.

use std::marker::PhantomData;
use std::sync::Arc;

use modkit_query::Value;
use sea_orm::sea_query::{Expr, LikeExpr};
use sea_orm::{Condition, EntityTrait};

use crate::field_map::{FieldMap, Path};
use crate::RepoError;

/// Kind of statement a specification restricts.
pub trait QueryKind: 'static {
    /// Kind-specific handle passed to the specification.
    type Query: Default;
}

pub struct Select;

pub struct Delete;

/// Select statement options a specification may adjust.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectQuery {
    pub distinct: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteQuery;

impl QueryKind for Select {
    type Query = SelectQuery;
}

impl QueryKind for Delete {
    type Query = DeleteQuery;
}

/// Entry point for property access inside a specification.
pub struct Root<'a, E: EntityTrait> {
    fields: &'a FieldMap<E>,
}

impl<'a, E: EntityTrait> Root<'a, E> {
    #[must_use]
    pub fn new(fields: &'a FieldMap<E>) -> Self {
        Self { fields }
    }

    /// # Errors
    /// Returns `RepoError::UnknownProperty` for unmapped properties.
    pub fn get(&self, property: &str) -> Result<Path<E>, RepoError> {
        self.fields.path(property)
    }
}

/// Builds the conditions specifications contribute.
#[derive(Clone, Copy, Debug, Default)]
pub struct CriteriaBuilder;

#[allow(clippy::unused_self)] // Method-style API handed to every specification
impl CriteriaBuilder {
    /// Always true.
    #[must_use]
    pub fn conjunction(&self) -> Condition {
        Condition::all().add(Expr::cust("1=1"))
    }

    /// Always false.
    #[must_use]
    pub fn disjunction(&self) -> Condition {
        Condition::all().add(Expr::cust("1=0"))
    }

    #[must_use]
    pub fn and(&self, left: Condition, right: Condition) -> Condition {
        Condition::all().add(left).add(right)
    }

    #[must_use]
    pub fn or(&self, left: Condition, right: Condition) -> Condition {
        Condition::any().add(left).add(right)
    }

    #[must_use]
    pub fn not(&self, inner: Condition) -> Condition {
        Condition::all().add(inner).not()
    }

    /// Equality; a null value compares with `is null`.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the column.
    pub fn equal<E: EntityTrait>(&self, path: &Path<E>, value: &Value) -> Result<Condition, RepoError> {
        if value.is_null() {
            return Ok(self.is_null(path));
        }
        Ok(Condition::all().add(Expr::expr(path.expr()).eq(path.coerce(value)?)))
    }

    /// Inequality; a null value compares with `is not null`.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the column.
    pub fn not_equal<E: EntityTrait>(&self, path: &Path<E>, value: &Value) -> Result<Condition, RepoError> {
        if value.is_null() {
            return Ok(self.is_not_null(path));
        }
        Ok(Condition::all().add(Expr::expr(path.expr()).ne(path.coerce(value)?)))
    }

    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the column.
    pub fn greater_than<E: EntityTrait>(&self, path: &Path<E>, value: &Value) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(Expr::expr(path.expr()).gt(path.coerce(value)?)))
    }

    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the column.
    pub fn greater_than_or_equal<E: EntityTrait>(
        &self,
        path: &Path<E>,
        value: &Value,
    ) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(Expr::expr(path.expr()).gte(path.coerce(value)?)))
    }

    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the column.
    pub fn less_than<E: EntityTrait>(&self, path: &Path<E>, value: &Value) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(Expr::expr(path.expr()).lt(path.coerce(value)?)))
    }

    /// # Errors
    /// Returns `RepoError::TypeMismatch` if the value does not fit the column.
    pub fn less_than_or_equal<E: EntityTrait>(
        &self,
        path: &Path<E>,
        value: &Value,
    ) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(Expr::expr(path.expr()).lte(path.coerce(value)?)))
    }

    /// Inclusive range.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` if a bound does not fit the column.
    pub fn between<E: EntityTrait>(
        &self,
        path: &Path<E>,
        lower: &Value,
        upper: &Value,
    ) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(
            Expr::expr(path.expr()).between(path.coerce(lower)?, path.coerce(upper)?),
        ))
    }

    /// `like` with a caller-supplied pattern.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` for non-string columns.
    pub fn like<E: EntityTrait>(
        &self,
        path: &Path<E>,
        pattern: &str,
        escape: Option<char>,
    ) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(Expr::expr(path.expr()).like(like_expr(path, pattern, escape)?)))
    }

    /// # Errors
    /// Returns `RepoError::TypeMismatch` for non-string columns.
    pub fn not_like<E: EntityTrait>(
        &self,
        path: &Path<E>,
        pattern: &str,
        escape: Option<char>,
    ) -> Result<Condition, RepoError> {
        Ok(Condition::all().add(Expr::expr(path.expr()).not_like(like_expr(path, pattern, escape)?)))
    }

    #[must_use]
    pub fn is_null<E: EntityTrait>(&self, path: &Path<E>) -> Condition {
        Condition::all().add(Expr::expr(path.expr()).is_null())
    }

    #[must_use]
    pub fn is_not_null<E: EntityTrait>(&self, path: &Path<E>) -> Condition {
        Condition::all().add(Expr::expr(path.expr()).is_not_null())
    }

    /// Membership in a list argument; an empty list selects nothing.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` for non-list arguments.
    pub fn is_in<E: EntityTrait>(&self, path: &Path<E>, values: &Value) -> Result<Condition, RepoError> {
        let values = path.coerce_many(values)?;
        if values.is_empty() {
            return Ok(self.disjunction());
        }
        Ok(Condition::all().add(Expr::expr(path.expr()).is_in(values)))
    }

    /// Non-membership; an empty list restricts nothing.
    ///
    /// # Errors
    /// Returns `RepoError::TypeMismatch` for non-list arguments.
    pub fn not_in<E: EntityTrait>(&self, path: &Path<E>, values: &Value) -> Result<Condition, RepoError> {
        let values = path.coerce_many(values)?;
        if values.is_empty() {
            return Ok(self.conjunction());
        }
        Ok(Condition::all().add(Expr::expr(path.expr()).is_not_in(values)))
    }
}

fn like_expr<E: EntityTrait>(
    path: &Path<E>,
    pattern: &str,
    escape: Option<char>,
) -> Result<LikeExpr, RepoError> {
    if path.kind != modkit_query::FieldKind::String {
        return Err(path.mismatch(&Value::from(pattern)));
    }
    let pattern = if path.is_upper() {
        pattern.to_uppercase()
    } else {
        pattern.to_owned()
    };
    let like = LikeExpr::new(pattern);
    Ok(match escape {
        Some(c) => like.escape(c),
        None => like,
    })
}

type SpecFn<E, Q> =
    dyn Fn(&Root<'_, E>, &mut Q, &CriteriaBuilder) -> Result<Option<Condition>, RepoError>
        + Send
        + Sync;

type PredicateFn<E> =
    dyn Fn(&Root<'_, E>, &CriteriaBuilder) -> Result<Option<Condition>, RepoError> + Send + Sync;

/// Restriction of a query of kind `K` over entity `E`.
#[must_use]
pub struct Specification<E: EntityTrait, K: QueryKind = Select> {
    f: Arc<SpecFn<E, K::Query>>,
    kind: PhantomData<fn() -> K>,
}

/// Restriction of a bulk delete.
pub type DeleteSpecification<E> = Specification<E, Delete>;

impl<E: EntityTrait, K: QueryKind> Clone for Specification<E, K> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
            kind: PhantomData,
        }
    }
}

impl<E: EntityTrait, K: QueryKind> Specification<E, K> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Root<'_, E>, &mut K::Query, &CriteriaBuilder) -> Result<Option<Condition>, RepoError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            f: Arc::new(f),
            kind: PhantomData,
        }
    }

    /// Contributes no predicate.
    pub fn unrestricted() -> Self {
        Self::new(|_, _, _| Ok(None))
    }

    /// Evaluate against one query.
    ///
    /// # Errors
    /// Propagates errors raised while building the condition.
    pub fn to_predicate(
        &self,
        root: &Root<'_, E>,
        query: &mut K::Query,
        cb: &CriteriaBuilder,
    ) -> Result<Option<Condition>, RepoError> {
        (self.f)(root, query, cb)
    }

    pub fn and(self, other: Self) -> Self {
        Self::new(move |root, query, cb| {
            let left = self.to_predicate(root, query, cb)?;
            let right = other.to_predicate(root, query, cb)?;
            Ok(match (left, right) {
                (Some(l), Some(r)) => Some(cb.and(l, r)),
                (l, r) => l.or(r),
            })
        })
    }

    pub fn or(self, other: Self) -> Self {
        Self::new(move |root, query, cb| {
            let left = self.to_predicate(root, query, cb)?;
            let right = other.to_predicate(root, query, cb)?;
            Ok(match (left, right) {
                (Some(l), Some(r)) => Some(cb.or(l, r)),
                (l, r) => l.or(r),
            })
        })
    }

    /// Negation; negating an unrestricted specification selects nothing.
    pub fn not(spec: Self) -> Self {
        Self::new(move |root, query, cb| {
            Ok(Some(match spec.to_predicate(root, query, cb)? {
                Some(inner) => cb.not(inner),
                None => cb.disjunction(),
            }))
        })
    }

    pub fn all_of(specs: impl IntoIterator<Item = Self>) -> Self {
        specs
            .into_iter()
            .reduce(Self::and)
            .unwrap_or_else(Self::unrestricted)
    }

    pub fn any_of(specs: impl IntoIterator<Item = Self>) -> Self {
        specs
            .into_iter()
            .reduce(Self::or)
            .unwrap_or_else(Self::unrestricted)
    }

    /// Reuse this restriction for another query kind; the other kind's
    /// query handle is not visible to it.
    pub fn adapt<K2: QueryKind>(self) -> Specification<E, K2> {
        Specification::new(move |root, _, cb| {
            self.to_predicate(root, &mut <K::Query as Default>::default(), cb)
        })
    }
}

impl<E: EntityTrait> Specification<E, Select> {
    /// Mark the selecting query distinct.
    pub fn distinct(self) -> Self {
        Self::new(move |root, query, cb| {
            query.distinct = true;
            self.to_predicate(root, query, cb)
        })
    }
}

/// Restriction that applies to any query kind.
#[must_use]
pub struct PredicateSpecification<E: EntityTrait> {
    f: Arc<PredicateFn<E>>,
}

impl<E: EntityTrait> Clone for PredicateSpecification<E> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<E: EntityTrait> PredicateSpecification<E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Root<'_, E>, &CriteriaBuilder) -> Result<Option<Condition>, RepoError>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// # Errors
    /// Propagates errors raised while building the condition.
    pub fn to_predicate(
        &self,
        root: &Root<'_, E>,
        cb: &CriteriaBuilder,
    ) -> Result<Option<Condition>, RepoError> {
        (self.f)(root, cb)
    }
}

impl<E: EntityTrait, K: QueryKind> From<PredicateSpecification<E>> for Specification<E, K> {
    fn from(spec: PredicateSpecification<E>) -> Self {
        Specification::new(move |root, _, cb| spec.to_predicate(root, cb))
    }
}
