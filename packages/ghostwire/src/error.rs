//! Error types and machine-readable error codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use std::time::Duration;

/// Failures of the document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stored document exists but does not parse. Never auto-repaired.
    #[error("document at {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage I/O failed for {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gave up waiting for the store lock after {waited:?} ({operation})")]
    LockTimeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StoreError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Corrupt { .. } => "corrupt_store",
            Self::Persistence { .. } | Self::LockTimeout { .. } | Self::Encode(_) => {
                "persistence_failure"
            }
        }
    }

    #[cfg(test)]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Failures of hub operations invoked by connections or HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// `identify` carried a missing, non-numeric or negative profile id.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid dataset name: {0}")]
    InvalidDataset(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// The highest profile id in the document leaves no room for another.
    #[error("profile ids exhausted")]
    IdSpaceExhausted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HubError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::InvalidDataset(_) => "invalid_dataset",
            Self::DatasetNotFound(_) => "dataset_not_found",
            Self::IdSpaceExhausted => "id_space_exhausted",
            Self::Store(e) => e.error_code(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentity(_) | Self::InvalidDataset(_) => StatusCode::BAD_REQUEST,
            Self::DatasetNotFound(_) => StatusCode::NOT_FOUND,
            Self::IdSpaceExhausted => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.error_code(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let corrupt = StoreError::Corrupt {
            path: "db.json".into(),
            source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        };
        assert_eq!(corrupt.error_code(), "corrupt_store");
        assert!(corrupt.is_corrupt());

        let timeout = StoreError::LockTimeout {
            operation: "read",
            waited: Duration::from_secs(1),
        };
        assert_eq!(timeout.error_code(), "persistence_failure");
        assert!(!timeout.is_corrupt());

        let io = StoreError::Persistence {
            path: "db.json".into(),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(io.error_code(), "persistence_failure");
    }

    #[test]
    fn hub_error_delegates_store_codes() {
        let err = HubError::from(StoreError::LockTimeout {
            operation: "update",
            waited: Duration::from_millis(5),
        });
        assert_eq!(err.error_code(), "persistence_failure");
        assert_eq!(
            HubError::InvalidIdentity("abc".into()).error_code(),
            "invalid_identity"
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            HubError::InvalidDataset("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HubError::DatasetNotFound("x.json".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HubError::IdSpaceExhausted.status_code(),
            StatusCode::CONFLICT
        );
        let store = HubError::from(StoreError::Encode(
            serde_json::from_str::<serde_json::Value>("]").unwrap_err(),
        ));
        assert_eq!(store.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn display_mentions_path() {
        let err = StoreError::Persistence {
            path: "/data/database.json".into(),
            source: std::io::Error::other("boom"),
        };
        let text = err.to_string();
        assert!(text.contains("/data/database.json"));
        assert!(text.contains("boom"));
    }
}
