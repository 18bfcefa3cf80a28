//! Repository configuration loaded through `figment`.
//!
//! ```yaml
//! repository:
//!   default_page_size: 50
//!   max_page_size: 500
//!   ignore_case: when_possible
//!   scoring_function: euclidean
//!   query_timeout: 5s
//! ```

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use modkit_query::{IgnoreCase, QueryOptions, ScoringFunction};
use serde::{Deserialize, Serialize};

use crate::RepoError;

const KEY: &str = "repository";
const ENV_PREFIX: &str = "MODKIT_REPO_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Page size used when a caller does not request one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    /// Upper bound applied to every requested page or scroll window.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
    #[serde(default)]
    pub ignore_case: IgnoreCase,
    #[serde(default)]
    pub scoring_function: ScoringFunction,
    /// Statement timeout applied when a method carries no timeout hint.
    #[serde(default, with = "humantime_serde")]
    pub query_timeout: Option<Duration>,
    #[serde(default = "default_escape_character")]
    pub escape_character: char,
}

fn default_page_size() -> u64 {
    20
}

fn default_max_page_size() -> u64 {
    1000
}

fn default_escape_character() -> char {
    '\\'
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            ignore_case: IgnoreCase::default(),
            scoring_function: ScoringFunction::default(),
            query_timeout: None,
            escape_character: default_escape_character(),
        }
    }
}

impl RepositoryConfig {
    /// Extract the `repository` section; a missing section yields defaults.
    ///
    /// # Errors
    /// Returns `RepoError::Config` if the section is malformed or the page
    /// sizes are inconsistent.
    pub fn from_figment(figment: &Figment) -> Result<Self, RepoError> {
        let config = match figment.extract_inner::<Self>(KEY) {
            Ok(config) => config,
            Err(e) if e.missing() => Self::default(),
            Err(e) => return Err(RepoError::Config(e.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Merge defaults, an optional YAML file and `MODKIT_REPO_*` variables.
    ///
    /// # Errors
    /// Same as [`RepositoryConfig::from_figment`].
    pub fn load(path: Option<&Path>) -> Result<Self, RepoError> {
        let mut figment = Figment::from(Serialized::default(KEY, Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let figment =
            figment.merge(Env::prefixed(ENV_PREFIX).map(|key| format!("{KEY}.{key}").into()));
        Self::from_figment(&figment)
    }

    fn validate(&self) -> Result<(), RepoError> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(RepoError::Config("page sizes must be positive".to_owned()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(RepoError::Config(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        Ok(())
    }

    /// Options consumed by the parser and the query creator.
    #[must_use]
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            ignore_case: self.ignore_case,
            scoring_function: self.scoring_function,
            escape: self.escape_character,
        }
    }

    /// Clamp a requested page size, falling back to the default. Never
    /// below one, even for a hand-built config with a zero maximum.
    #[must_use]
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
            .max(1)
    }
}
