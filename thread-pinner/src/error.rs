use {
    std::{io, path::PathBuf},
    thiserror::Error,
};

/// A rule record whose fields are out of range.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("pattern cannot be empty")]
    EmptyPattern,

    #[error("nice value {0} is out of range (-20..=19)")]
    InvalidNice(i32),

    #[error("invalid I/O priority: class {class}, data {data}")]
    InvalidIoPriority { class: u8, data: u8 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON rule file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed rule at {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error("invalid rule {index} ({pattern}): {source}")]
    InvalidRule {
        index: usize,
        pattern: String,
        #[source]
        source: RuleError,
    },

    #[error("no valid rules")]
    NoValidRules,

    #[error("no {match_type} rule with pattern {pattern:?}")]
    RuleNotFound { match_type: String, pattern: String },

    #[error("{0}")]
    Unsupported(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
