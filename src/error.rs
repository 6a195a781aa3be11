//! Typed failures for the sync pipeline.
//!
//! Plumbing code (config loading, CLI wiring, HTTP clients) uses
//! `anyhow::Result`. The sync orchestrator needs to report *what kind* of
//! failure stopped a file without aborting the batch, so trait errors are
//! converted into a [`SyncError`] at the stage where they happen, and the
//! per-file result carries a serialisable [`SyncFailure`].

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("frontmatter error: {0}")]
    Frontmatter(String),
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("vector index error: {0}")]
    Index(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    NotFound,
    Io,
    Frontmatter,
    Remote,
    Embedding,
    Index,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::Frontmatter(_) => ErrorKind::Frontmatter,
            SyncError::Remote(_) => ErrorKind::Remote,
            SyncError::Embedding(_) => ErrorKind::Embedding,
            SyncError::Index(_) => ErrorKind::Index,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            SyncError::Config(m)
            | SyncError::NotFound(m)
            | SyncError::Io(m)
            | SyncError::Frontmatter(m)
            | SyncError::Remote(m)
            | SyncError::Embedding(m)
            | SyncError::Index(m) => m,
        }
    }

    pub fn remote(err: anyhow::Error) -> Self {
        SyncError::Remote(format!("{:#}", err))
    }

    pub fn embedding(err: anyhow::Error) -> Self {
        SyncError::Embedding(format!("{:#}", err))
    }

    pub fn index(err: anyhow::Error) -> Self {
        SyncError::Index(format!("{:#}", err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

/// Failure attached to a per-file result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SyncError> for SyncFailure {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

impl From<SyncError> for SyncFailure {
    fn from(err: SyncError) -> Self {
        SyncFailure::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_display_includes_kind() {
        let err = SyncError::Remote("HTTP 500".to_string());
        assert_eq!(err.to_string(), "remote store error: HTTP 500");
        assert_eq!(err.kind(), ErrorKind::Remote);
    }

    #[test]
    fn test_remote_keeps_context_chain() {
        let res: anyhow::Result<()> =
            Err(anyhow::anyhow!("connection refused")).context("Failed to create record");
        let err = SyncError::remote(res.unwrap_err());
        assert!(err.message().contains("Failed to create record"));
        assert!(err.message().contains("connection refused"));
    }

    #[test]
    fn test_failure_serializes_snake_case_kind() {
        let failure = SyncFailure::from(SyncError::NotFound("a.md".to_string()));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["message"], "a.md");
    }
}
