// ── Core error types ──
//
// User-facing errors from machdash-core. Consumers never see raw HTTP
// status codes or SQLite errors directly; the From impls translate
// lower-layer failures into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Remote errors ────────────────────────────────────────────────
    #[error("Backend unreachable: {reason}")]
    BackendUnreachable { reason: String },

    #[error("Backend error: {message}")]
    Backend {
        message: String,
        /// HTTP status code, if applicable.
        status: Option<u16>,
    },

    #[error("Malformed backend response: {message}")]
    MalformedResponse { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Machine not found: {machine_id}")]
    MachineNotFound { machine_id: String },

    #[error("Metric not found: {metric_id}")]
    MetricNotFound { metric_id: String },

    // ── Cache errors ─────────────────────────────────────────────────
    /// The persistent cache store failed. Read paths treat this as
    /// "no cache" and degrade to remote-only; write paths surface it.
    #[error("Cache store error: {0}")]
    Cache(String),

    #[error("Legacy record corrupt: {0}")]
    LegacyRecordCorrupt(String),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` when the next poll tick or refresh may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable { .. }
                | Self::Backend { .. }
                | Self::MalformedResponse { .. }
        )
    }
}

// ── Conversion from API-layer errors ─────────────────────────────────

impl From<machdash_api::Error> for CoreError {
    fn from(err: machdash_api::Error) -> Self {
        match err {
            machdash_api::Error::Transport(ref e) => {
                if e.is_timeout() || e.is_connect() {
                    CoreError::BackendUnreachable {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Backend {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            machdash_api::Error::Http { status, path } => CoreError::Backend {
                message: format!("HTTP {status} from {path}"),
                status: Some(status),
            },
            machdash_api::Error::Deserialization { message, .. } => {
                CoreError::MalformedResponse { message }
            }
            machdash_api::Error::InvalidEndpoint(msg) => CoreError::Config {
                message: format!("invalid endpoint: {msg}"),
            },
            machdash_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            // The sentinel should be handled at the polling boundary;
            // reaching here means a code path forgot preview mode.
            machdash_api::Error::PreviewSkip => {
                CoreError::Internal("preview-mode request escaped the polling layer".into())
            }
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Cache(err.to_string())
    }
}
