//! Error type shared by parsing, rewriting and planning.

/// Errors raised while deriving, rewriting or planning repository queries.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Method name parsing
    #[error("cannot parse method name `{method}`: unexpected segment `{segment}`")]
    Parse { method: String, segment: String },

    #[error("no property `{segment}` found on type `{domain}`")]
    InvalidPath { domain: String, segment: String },

    #[error("method `{method}` declares {declared} parameters but its query consumes {expected}")]
    ParameterCountMismatch {
        method: String,
        declared: usize,
        expected: usize,
    },

    #[error("ignore case is not supported for property `{property}` of kind {kind}")]
    IgnoreCaseUnsupported { property: String, kind: String },

    #[error("unknown entity type `{0}`")]
    UnknownEntity(String),

    // Query text
    #[error("query syntax error at offset {offset}: {message}")]
    QuerySyntax { offset: usize, message: String },

    #[error("sort expression `{0}` is not a property path, alias or function alias")]
    InvalidSortProperty(String),

    #[error("count query cannot be derived for set operation queries: {0}")]
    CountQueryUnsupported(String),

    #[error("unsupported template expression `{0}`")]
    UnsupportedTemplate(String),

    // Planning
    #[error("return type `{0}` cannot be resolved")]
    UnresolvableReturnType(String),

    #[error("operator {operator} is not supported by the relational query creator")]
    UnsupportedOperator { operator: String },

    #[error("query parameter `{0}` is not bound to a method argument")]
    UnboundParameter(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid scroll position: {0}")]
    InvalidScrollPosition(String),
}
