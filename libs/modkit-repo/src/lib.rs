#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Repository execution for `ModKit` on `SeaORM`.
//!
//! [`modkit_query`] decides what a repository method means; this crate runs
//! it. A [`FieldMap`] binds metamodel properties to entity columns, a
//! [`Specification`] composes `sea_orm::Condition`s, and the
//! [`PredicateExecutor`] runs them with paging, sorting, keyset scrolling,
//! lock modes and statement timeouts. [`Repository`] validates a set of
//! method declarations up front and dispatches derived methods by name.
//!
//! ```ignore
//! let fields = FieldMap::<user::Entity>::new()
//!     .id("id", user::Column::Id, FieldKind::I64)
//!     .insert("lastname", user::Column::Lastname, FieldKind::String);
//! let executor = PredicateExecutor::new(conn, fields);
//! let spec = Specification::new(|root, _, cb| {
//!     Ok(Some(cb.equal(&root.get("lastname")?, &Value::from("Doe"))?))
//! });
//! let user = executor.find_one(&spec).await?;
//! ```

pub mod config;
pub mod derived;
pub mod executor;
pub mod field_map;
pub mod fluent;
pub mod keyset;
pub mod repository;
pub mod specification;

use std::time::Duration;

pub use config::RepositoryConfig;
pub use executor::{LockMode, PredicateExecutor};
pub use field_map::{Field, FieldMap, Path};
pub use fluent::FluentQuery;
pub use repository::{Outcome, Repository, RepositoryFactory};
pub use specification::{
    CriteriaBuilder, DeleteSpecification, PredicateSpecification, Root, Specification,
};

/// Errors raised while executing repository queries.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Query(#[from] modkit_query::Error),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error("query did not return a unique result: at least {0} rows matched")]
    NonUniqueResult(usize),

    #[error("invalid repository usage: {0}")]
    InvalidUsage(String),

    #[error("property `{0}` is not mapped to a column")]
    UnknownProperty(String),

    #[error("type mismatch for `{property}`: expected {expected}, got {got}")]
    TypeMismatch {
        property: String,
        expected: modkit_query::FieldKind,
        got: String,
    },

    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("operator {0} is not supported by the SeaORM executor")]
    UnsupportedOperator(String),

    #[error("property path `{0}` navigates a relation, which the SeaORM executor cannot join")]
    UnsupportedPath(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid repository configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RepoError>;
