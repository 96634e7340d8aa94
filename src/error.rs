use thiserror::Error;

/// Errors raised while loading or querying geolocation databases.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("invalid {source_kind} database: {reason}")]
    InvalidDatabase {
        source_kind: &'static str,
        reason: String,
    },

    #[error("unknown database source: {0}")]
    UnknownSource(String),

    #[error("unsupported database file type: {0} (expected .xdb or .mmdb)")]
    UnsupportedFile(String),

    #[error("geolocation database I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the rule compiler and evaluator.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("unknown fact field: {0}")]
    UnknownField(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),

    #[error("no rule references fact '{0}'")]
    UnknownFact(String),

    #[error("no rule data loaded")]
    NoRuleData,

    #[error("rule {rule}: {message}")]
    Evaluation { rule: String, message: String },

    #[error("rule execution did not settle after {0} cycles; check that fired rules retract themselves or change the fact")]
    CycleLimit(usize),

    #[error("rule {rule} panicked: {message}")]
    Panicked { rule: String, message: String },
}

/// Errors raised while decoding or rewriting HTTP content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to decompress {coding} body: {source}")]
    Decompress {
        coding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compress {coding} body: {source}")]
    Compress {
        coding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("encoding undetermined: no charset in Content-Type, meta tag or DOCTYPE")]
    CharsetUndetermined,

    #[error("invalid URI after rewrite: {0}")]
    InvalidUri(String),
}

pub type GeoLoadResult<T> = std::result::Result<T, GeoError>;
pub type RuleResult<T> = std::result::Result<T, RuleError>;
pub type ContentResult<T> = std::result::Result<T, ContentError>;
