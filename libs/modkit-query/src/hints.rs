//! Provider hints attached to repository queries.

use std::time::Duration;

use crate::Error;

/// Statement timeout, as a humantime duration (`"250ms"`, `"5s"`).
pub const TIMEOUT: &str = "query.timeout";
/// Relations to eagerly fetch with the result.
pub const FETCH_GRAPH: &str = "query.fetchgraph";
pub const LOAD_GRAPH: &str = "query.loadgraph";
pub const READ_ONLY: &str = "query.read_only";
pub const COMMENT: &str = "query.comment";

/// Graph hints shape the fetched rows and never apply to counting.
const FETCH_ONLY: &[&str] = &[FETCH_GRAPH, LOAD_GRAPH];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryHint {
    pub name: String,
    pub value: String,
    /// Whether the hint also applies to the count query of a page.
    pub for_counting: bool,
}

/// Immutable set of hints for one query method.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QueryHints {
    hints: Vec<QueryHint>,
}

impl QueryHints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hint that applies to both fetch and count queries.
    #[must_use]
    pub fn with(self, name: &str, value: impl Into<String>) -> Self {
        self.with_hint(QueryHint {
            name: name.to_owned(),
            value: value.into(),
            for_counting: true,
        })
    }

    /// Add a hint that applies to fetch queries only.
    #[must_use]
    pub fn with_fetch_only(self, name: &str, value: impl Into<String>) -> Self {
        self.with_hint(QueryHint {
            name: name.to_owned(),
            value: value.into(),
            for_counting: false,
        })
    }

    #[must_use]
    pub fn with_hint(mut self, hint: QueryHint) -> Self {
        self.hints.retain(|h| h.name != hint.name);
        self.hints.push(hint);
        self
    }

    /// Subset applicable to count queries.
    #[must_use]
    pub fn for_counts(&self) -> Self {
        Self {
            hints: self
                .hints
                .iter()
                .filter(|h| h.for_counting && !FETCH_ONLY.contains(&h.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.hints
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryHint> {
        self.hints.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Parsed [`TIMEOUT`] hint.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` if the value is not a duration.
    pub fn timeout(&self) -> Result<Option<Duration>, Error> {
        self.get(TIMEOUT)
            .map(|raw| {
                humantime::parse_duration(raw)
                    .map_err(|e| Error::InvalidArgument(format!("{TIMEOUT} `{raw}`: {e}")))
            })
            .transpose()
    }

    /// Relations named by the fetch or load graph hints.
    #[must_use]
    pub fn fetch_relations(&self) -> Vec<&str> {
        FETCH_ONLY
            .iter()
            .filter_map(|name| self.get(name))
            .flat_map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_subset_drops_graphs_and_fetch_only_hints() {
        let hints = QueryHints::new()
            .with(TIMEOUT, "2s")
            .with(FETCH_GRAPH, "roles")
            .with_fetch_only(COMMENT, "listing");
        let counts = hints.for_counts();
        assert_eq!(counts.get(TIMEOUT), Some("2s"));
        assert!(counts.get(FETCH_GRAPH).is_none());
        assert!(counts.get(COMMENT).is_none());
        assert_eq!(hints.iter().count(), 3);
    }

    #[test]
    fn timeout_parses_humantime() {
        let hints = QueryHints::new().with(TIMEOUT, "250ms");
        assert_eq!(hints.timeout().unwrap(), Some(Duration::from_millis(250)));
        assert!(QueryHints::new().with(TIMEOUT, "soon").timeout().is_err());
        assert_eq!(QueryHints::new().timeout().unwrap(), None);
    }

    #[test]
    fn later_hint_replaces_earlier() {
        let hints = QueryHints::new()
            .with(LOAD_GRAPH, "a")
            .with(LOAD_GRAPH, "manager, roles");
        assert_eq!(hints.fetch_relations(), vec!["manager", "roles"]);
    }
}
