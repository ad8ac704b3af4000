// Telemetry backend HTTP client
//
// Wraps `reqwest::Client` with backend-specific URL construction and
// typed GET helpers. The backend speaks plain JSON arrays/objects with
// no envelope, so decoding is a straight serde pass with the raw body
// preserved on failure.

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{
    DistributionDto, LatestReadingDto, MachineDto, MetricDefDto, ReadingPointDto,
};
use crate::transport::TransportConfig;

/// Raw HTTP client for the telemetry backend.
///
/// Holds two `reqwest::Client`s: a short-timeout client for catalog and
/// poll requests, and a long-timeout client for the distribution
/// long-poll. When constructed without a base URL the client is in
/// *preview mode*: every request returns [`Error::PreviewSkip`] without
/// touching the network, and callers fall back to simulated data.
pub struct TelemetryClient {
    http: reqwest::Client,
    long_poll_http: reqwest::Client,
    base_url: Option<Url>,
}

impl TelemetryClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            long_poll_http: transport.build_long_poll_client()?,
            base_url: Some(base_url),
        })
    }

    /// Create a preview-mode client: no backend, every request is skipped.
    pub fn preview() -> Self {
        Self {
            http: reqwest::Client::new(),
            long_poll_http: reqwest::Client::new(),
            base_url: None,
        }
    }

    /// `true` when no backend is configured.
    pub fn is_preview(&self) -> bool {
        self.base_url.is_none()
    }

    /// The configured backend base URL, if any.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    // ── Endpoints ───────────────────────────────────────────────────

    /// `GET /machines` — the machine catalog.
    pub async fn machines(&self) -> Result<Vec<MachineDto>, Error> {
        let url = self.api_url("machines", &[])?;
        self.get(&self.http, url).await
    }

    /// `GET /metrics` — the metric definition catalog.
    pub async fn metric_defs(&self) -> Result<Vec<MetricDefDto>, Error> {
        let url = self.api_url("metrics", &[])?;
        self.get(&self.http, url).await
    }

    /// `GET /latest?machine_id=` — the most recent reading per metric.
    pub async fn latest(&self, machine_id: &str) -> Result<Vec<LatestReadingDto>, Error> {
        let url = self.api_url("latest", &[("machine_id", machine_id)])?;
        self.get(&self.http, url).await
    }

    /// `GET /history` — a bounded window of readings, ascending by
    /// timestamp. `start_ms`/`end_ms` are optional epoch-ms bounds; the
    /// backend caps `limit` at 5000.
    pub async fn history(
        &self,
        machine_id: &str,
        metric_key: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ReadingPointDto>, Error> {
        let limit = limit.to_string();
        let mut params = vec![
            ("machine_id", machine_id),
            ("metric_key", metric_key),
            ("limit", limit.as_str()),
        ];
        let start = start_ms.map(|v| v.to_string());
        let end = end_ms.map(|v| v.to_string());
        if let Some(ref s) = start {
            params.push(("start_ms", s));
        }
        if let Some(ref e) = end {
            params.push(("end_ms", e));
        }
        let url = self.api_url("history", &params)?;
        self.get(&self.http, url).await
    }

    /// `GET /metrics/{id}/distribution` — server-computed zone counts.
    ///
    /// Long-poll: the server may hold the request open, so this goes
    /// through the long-timeout client. A 404 means the backend does not
    /// implement the endpoint; callers should stop polling it and
    /// classify locally.
    pub async fn distribution(&self, metric_id: &str) -> Result<DistributionDto, Error> {
        let url = self.api_url(&format!("metrics/{metric_id}/distribution"), &[])?;
        self.get(&self.long_poll_http, url).await
    }

    // ── URL builders ────────────────────────────────────────────────

    /// Build a full URL for `path` with query `params`, or
    /// [`Error::PreviewSkip`] when no backend is configured.
    fn api_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, Error> {
        let base = self.base_url.as_ref().ok_or(Error::PreviewSkip)?;
        let mut url = base
            .join(path)
            .map_err(|e| Error::InvalidEndpoint(format!("{path}: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    // ── Request helpers ─────────────────────────────────────────────

    /// Send a GET request and decode the JSON body.
    async fn get<T: DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        url: Url,
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let path = url.path().to_owned();
        let resp = http.get(url).send().await.map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                path,
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_client_skips_requests() {
        let client = TelemetryClient::preview();
        assert!(client.is_preview());
        assert!(matches!(
            client.api_url("machines", &[]),
            Err(Error::PreviewSkip)
        ));
    }

    #[test]
    fn api_url_appends_query_params() {
        let base = Url::parse("http://127.0.0.1:8000/").expect("base url");
        let client = TelemetryClient::new(base, &TransportConfig::default()).expect("client");
        let url = client
            .api_url("latest", &[("machine_id", "m-001")])
            .expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/latest?machine_id=m-001");
    }
}
