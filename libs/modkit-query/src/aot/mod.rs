//! Ahead-of-time repository generation.
//!
//! The contributor plans every method of a repository at build time and
//! renders the resulting [`QueryPlan`]s as Rust source. Generated code
//! compiles through [`QueryPlan::compile`] exactly like the runtime path.
//! Methods whose declared query contains a template expression cannot be
//! resolved ahead of time and are listed as fallbacks instead.

mod codegen;
mod contributor;

pub use contributor::RepositoryContributor;

use crate::plan::QueryPlan;

/// Result of contributing one repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedRepository {
    /// Repository type name, e.g. `UserRepository`.
    pub name: String,
    pub domain: String,
    /// Plans with derived queries already rendered to text.
    pub methods: Vec<QueryPlan>,
    /// Methods left to the runtime planner.
    pub fallbacks: Vec<String>,
}

impl GeneratedRepository {
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&QueryPlan> {
        self.methods.iter().find(|m| m.method == name)
    }

    #[must_use]
    pub fn is_fallback(&self, name: &str) -> bool {
        self.fallbacks.iter().any(|f| f == name)
    }
}
