//! HTTP client for origin storage nodes.

use crate::error::{OriginError, OriginResult};
use depot_core::ObjectId;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{StatusCode, Url};
use std::time::Duration;

/// Talks to origin nodes over their file API.
///
/// Probes and version checks carry the full request timeout. Downloads only
/// bound the wait for response headers here; the body is streamed and the
/// caller bounds each chunk separately.
#[derive(Clone)]
pub struct OriginClient {
    http: reqwest::Client,
    timeout: Duration,
}

/// Parse an endpoint, accepting only http and https.
pub fn parse_endpoint(endpoint: &str) -> OriginResult<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| depot_core::Error::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        scheme => Err(depot_core::Error::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme {scheme:?}"
        ))
        .into()),
    }
}

impl OriginClient {
    pub fn new(timeout: Duration) -> OriginResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| OriginError::request("client", e))?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn file_url(endpoint: &str, object_id: &ObjectId) -> OriginResult<Url> {
        let base = parse_endpoint(endpoint)?;
        let path = format!(
            "{}/api/v1/files/{}",
            base.path().trim_end_matches('/'),
            object_id.as_str()
        );
        let mut url = base;
        url.set_path(&path);
        Ok(url)
    }

    fn version_url(endpoint: &str) -> OriginResult<Url> {
        let base = parse_endpoint(endpoint)?;
        let path = format!("{}/api/v1/version", base.path().trim_end_matches('/'));
        let mut url = base;
        url.set_path(&path);
        Ok(url)
    }

    /// Ask an origin whether it can serve an object.
    pub async fn probe(&self, endpoint: &str, object_id: &ObjectId) -> OriginResult<()> {
        let url = Self::file_url(endpoint, object_id)?;
        let response = self
            .http
            .head(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OriginError::request(endpoint, e))?;
        if !response.status().is_success() {
            return Err(OriginError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Liveness check used to refresh latency statistics.
    pub async fn version(&self, endpoint: &str) -> OriginResult<()> {
        let url = Self::version_url(endpoint)?;
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OriginError::request(endpoint, e))?;
        if !response.status().is_success() {
            return Err(OriginError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Start downloading an object from `offset` onwards.
    ///
    /// A non-zero offset is sent as an open-ended range and the origin must
    /// answer 206 starting at exactly that offset.
    pub async fn download(
        &self,
        endpoint: &str,
        object_id: &ObjectId,
        offset: u64,
    ) -> OriginResult<reqwest::Response> {
        let url = Self::file_url(endpoint, object_id)?;
        let mut request = self.http.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| OriginError::Timeout(endpoint.to_string()))?
            .map_err(|e| OriginError::request(endpoint, e))?;

        let status = response.status();
        let acceptable = if offset == 0 {
            status == StatusCode::OK
        } else {
            status == StatusCode::PARTIAL_CONTENT && range_starts_at(&response, offset)
        };
        if !acceptable {
            return Err(OriginError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Forward a client request to an origin, passing the client's range
    /// header through unchanged.
    ///
    /// Any status is returned to the caller, so the origin's own range
    /// handling reaches the client.
    pub async fn proxy(
        &self,
        endpoint: &str,
        object_id: &ObjectId,
        range: Option<&str>,
    ) -> OriginResult<reqwest::Response> {
        let url = Self::file_url(endpoint, object_id)?;
        let mut request = self.http.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| OriginError::Timeout(endpoint.to_string()))?
            .map_err(|e| OriginError::request(endpoint, e))
    }
}

fn range_starts_at(response: &reqwest::Response, offset: u64) -> bool {
    let Some(value) = response.headers().get(CONTENT_RANGE) else {
        // Some origins omit content-range on 206; trust the status.
        return true;
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("bytes "))
        .and_then(|v| v.split('-').next())
        .and_then(|start| start.trim().parse::<u64>().ok())
        == Some(offset)
}
