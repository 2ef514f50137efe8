//! Manual connection test against a probe URL

use std::time::Duration;

use circlepay_domain::{ConnectivityConfig, Result};
use reqwest::header::CACHE_CONTROL;
use reqwest::Method;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::http::HttpClient;

/// Outcome of [`HttpProbe::test_connection`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// A 2xx response arrived before the timeout.
    pub success: bool,
    pub response_time: Duration,
    pub error: Option<String>,
}

/// Sends `HEAD` requests to check that the backend is reachable.
pub struct HttpProbe {
    http: HttpClient,
    default_url: String,
}

impl HttpProbe {
    /// Probe against `default_url` with a per-probe `timeout`.
    pub fn new(default_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http, default_url: default_url.into() })
    }

    /// Probe configured by `config`, falling back to `api_base_url`.
    pub fn from_config(config: &ConnectivityConfig, api_base_url: &str) -> Result<Self> {
        let url = config.probe_url.clone().unwrap_or_else(|| api_base_url.to_string());
        Self::new(url, config.probe_timeout())
    }

    /// Probe `url`, or the default URL. Failures are reported, never returned.
    pub async fn test_connection(&self, url: Option<&str>) -> ProbeReport {
        let url = url.unwrap_or(&self.default_url);
        let started = Instant::now();

        let request = self.http.request(Method::HEAD, url).header(CACHE_CONTROL, "no-cache");
        let outcome = self.http.send(request).await;
        let response_time = started.elapsed();

        let report = match outcome {
            Ok(response) if response.status().is_success() => {
                ProbeReport { success: true, response_time, error: None }
            }
            Ok(response) => ProbeReport {
                success: false,
                response_time,
                error: Some(format!("HTTP {}", response.status().as_u16())),
            },
            Err(err) => ProbeReport { success: false, response_time, error: Some(err.to_string()) },
        };
        debug!(
            url,
            success = report.success,
            elapsed_ms = report.response_time.as_millis() as u64,
            "connection probe finished"
        );
        report
    }
}
