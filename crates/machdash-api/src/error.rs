use thiserror::Error;

/// Top-level error type for the `machdash-api` crate.
///
/// Covers every failure mode of the backend HTTP surface. `machdash-core`
/// maps these into user-facing diagnostics; the polling layer consults
/// [`is_transient`](Error::is_transient) to decide whether the next tick
/// should simply retry.
#[derive(Debug, Error)]
pub enum Error {
    // ── Request construction ────────────────────────────────────────
    /// The endpoint URL could not be built (bad base URL or path).
    /// Never retried — the same inputs will fail the same way.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response status outside 2xx.
    #[error("HTTP {status} from {path}")]
    Http { status: u16, path: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Sentinel ────────────────────────────────────────────────────
    /// Not a failure: the client is in preview mode (no backend
    /// configured) and the request was skipped before touching the
    /// network. Callers use the simulated feed instead.
    #[error("Preview mode: network request skipped")]
    PreviewSkip,
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying on the
    /// next poll tick or long-poll cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Http { .. } | Self::Deserialization { .. } => true,
            Self::InvalidEndpoint(_) | Self::InvalidUrl(_) | Self::PreviewSkip => false,
        }
    }

    /// Returns `true` if this is a "not found" response.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }
}
