//! Error types for the sync engine.
//!
//! [`KbError`] separates the categories the orchestrator treats differently:
//! per-file parse failures (logged, file skipped), caller validation errors
//! (surfaced immediately), and systemic storage/IO failures (propagated).

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the knowledge-base core.
#[derive(Error, Debug)]
pub enum KbError {
    // Per-file parse errors
    #[error("malformed frontmatter in {path}: {message}")]
    MalformedFrontmatter { path: String, message: String },

    #[error("frontmatter in {path} is not a mapping")]
    FrontmatterNotMapping { path: String },

    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(PathBuf),

    // Domain errors
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("update of entity {0} affected no rows")]
    UpdateFailed(i64),

    #[error("unique constraint conflict on {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("scan failed: {0}")]
    Scan(String),

    // Wrapped infrastructure errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KbError {
    /// True for errors caused by unparseable note content. The file is
    /// skipped for this pass and retried once it changes.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            KbError::MalformedFrontmatter { .. }
                | KbError::FrontmatterNotMapping { .. }
                | KbError::NotUtf8(_)
        )
    }

    /// True when the storage layer itself is unusable. Such errors abort a
    /// sync instead of being charged to the file being processed.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            KbError::Database(
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Io(_)
            )
        )
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            KbError::MalformedFrontmatter { .. } => "malformed_frontmatter",
            KbError::FrontmatterNotMapping { .. } => "frontmatter_not_mapping",
            KbError::NotUtf8(_) => "not_utf8",
            KbError::EntityNotFound(_) => "entity_not_found",
            KbError::UpdateFailed(_) => "update_failed",
            KbError::Conflict(_) => "conflict",
            KbError::Validation(_) => "validation",
            KbError::Scan(_) => "scan",
            KbError::Database(_) => "database",
            KbError::Io(_) => "io",
            KbError::Yaml(_) => "yaml",
            KbError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, KbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_classified() {
        let err = KbError::MalformedFrontmatter {
            path: "a.md".into(),
            message: "bad".into(),
        };
        assert!(err.is_parse_error());
        assert_eq!(err.kind(), "malformed_frontmatter");

        let err = KbError::Validation("missing".into());
        assert!(!err.is_parse_error());
        assert_eq!(err.to_string(), "validation error: missing");
        assert!(!err.is_systemic());
    }

    #[test]
    fn pool_failures_are_systemic() {
        let err = KbError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_systemic());
        assert_eq!(err.kind(), "database");
        assert!(!KbError::from(sqlx::Error::RowNotFound).is_systemic());
    }
}
