//! Options shared by the parser and the query creator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Case sensitivity of a single comparison.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreCase {
    /// Compare as stored.
    #[default]
    Never,
    /// Fold case; a non-textual property is an error.
    Always,
    /// Fold case for textual properties only.
    WhenPossible,
}

/// Distance function used by `Near` / `Within` and vector scoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFunction {
    #[default]
    Cosine,
    Euclidean,
    InnerProduct,
}

impl ScoringFunction {
    /// Query-language function name.
    #[must_use]
    pub const fn function_name(self) -> &'static str {
        match self {
            ScoringFunction::Cosine => "cosine_distance",
            ScoringFunction::Euclidean => "euclidean_distance",
            ScoringFunction::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for ScoringFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryOptions {
    /// Applied to parts that do not say `IgnoreCase` themselves.
    pub ignore_case: IgnoreCase,
    pub scoring_function: ScoringFunction,
    pub escape: char,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            ignore_case: IgnoreCase::Never,
            scoring_function: ScoringFunction::Cosine,
            escape: '\\',
        }
    }
}
