use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::error::RemoteError;
use super::types::{BuildStatus, SpecPayload, StatusResponse, SubmissionHandle};
use crate::config::TlsConfig;

// Job ids are long numeric tokens; anything shorter is a row count or a
// timestamp fragment.
static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("invalid digit-run regex"));

/// The three operations the orchestrator sequences against the build service.
///
/// All of them are safe to re-issue on a transient failure; the service
/// tolerates duplicate submissions (at-least-once).
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn submit_spec(
        &self,
        token: &str,
        payload: &SpecPayload,
    ) -> Result<SubmissionHandle, RemoteError>;

    async fn poll_build(
        &self,
        token: &str,
        handle: &SubmissionHandle,
    ) -> Result<BuildStatus, RemoteError>;

    async fn download(
        &self,
        token: &str,
        handle: &SubmissionHandle,
    ) -> Result<Vec<u8>, RemoteError>;
}

/// Build a reqwest client honoring the configured TLS trust settings.
///
/// Shared by the build client and the auth endpoint so both present the same
/// trust store.
pub fn http_client(tls: &TlsConfig) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300));

    if tls.skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = &tls.ca_bundle {
        let pem = std::fs::read(path)
            .with_context(|| format!("failed to read CA bundle at {}", path.display()))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .with_context(|| format!("invalid PEM in CA bundle at {}", path.display()))?;
        builder = builder.add_root_certificate(cert);
    }

    builder.build().context("failed to build HTTP client")
}

/// reqwest-backed [`BuildService`] implementation.
pub struct BuildClient {
    http: Client,
    base_url: String,
}

impl BuildClient {
    pub fn new(http: Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Turn a non-success response into [`RemoteError::Status`], reading the
    /// body as the message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BuildService for BuildClient {
    async fn submit_spec(
        &self,
        token: &str,
        payload: &SpecPayload,
    ) -> Result<SubmissionHandle, RemoteError> {
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response.text().await?;

        extract_job_id(location.as_deref(), &body)
            .map(|job_id| SubmissionHandle { job_id })
            .ok_or(RemoteError::MissingJobId)
    }

    async fn poll_build(
        &self,
        token: &str,
        handle: &SubmissionHandle,
    ) -> Result<BuildStatus, RemoteError> {
        let response = self
            .http
            .get(format!("{}/jobs/{}/status", self.base_url, handle.job_id))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let status = response.json::<StatusResponse>().await?;
        Ok(status.into_build_status())
    }

    async fn download(
        &self,
        token: &str,
        handle: &SubmissionHandle,
    ) -> Result<Vec<u8>, RemoteError> {
        let response = self
            .http
            .get(format!("{}/jobs/{}/out", self.base_url, handle.job_id))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Pull a job id out of a submission response: `Location` header first, then
/// well-known JSON fields, then a bare 13–20 digit run anywhere in the body.
fn extract_job_id(location: Option<&str>, body: &str) -> Option<String> {
    if let Some(loc) = location
        && let Some(id) = digit_run(loc)
    {
        return Some(id);
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["jobId", "job_id", "id", "resultId", "result_id"] {
            match value.get(key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
    }

    digit_run(body)
}

fn digit_run(text: &str) -> Option<String> {
    DIGIT_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|s| (13..=20).contains(&s.len()))
        .map(str::to_string)
}
