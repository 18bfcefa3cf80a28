#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Query derivation, rewriting and planning for `ModKit` repositories.
//!
//! The crate is backend-agnostic: it turns repository method declarations
//! into query plans and query text. Execution against a database lives in
//! `modkit-repo`.
//!
//! Pipeline, leaf first:
//! - [`part_tree`] parses derived method names against a [`metamodel`].
//! - [`jpql`] parses declared query text; [`transform`] rewrites it.
//! - [`creator`] renders part trees to query text.
//! - [`scroll`] builds keyset predicates for any backend.
//! - [`plan`] ties these together for one method; [`aot`] does the same at
//!   build time and renders Rust source.

pub mod aot;
pub mod creator;
pub mod errors;
pub mod hints;
pub mod jpql;
pub mod kind;
pub mod metamodel;
pub mod options;
pub mod part_tree;
pub mod plan;
pub mod returned_type;
pub mod scroll;
pub mod sort;
pub mod token;
pub mod transform;
pub mod value;

pub use errors::Error;
pub use kind::FieldKind;
pub use options::{IgnoreCase, QueryOptions, ScoringFunction};
pub use sort::{Direction, NullHandling, Order, Page, PageRequest, Sort, Window};
pub use value::Value;

pub type Result<T> = std::result::Result<T, Error>;
