use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{RunResults, RunState, RunStatus};

pub const BASE_URL_ENV: &str = "PIPECTL_BASE_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Pipeline server location, resolved once at startup and passed down.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: String,
}

impl PipelineConfig {
    /// Explicit flag wins over the environment; the environment wins over
    /// the localhost default.
    pub fn resolve(flag: Option<String>) -> Self {
        let base_url = flag
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// Transport-level failure (connect, timeout, read).
    Transport(String),
    /// Server answered with a non-success status.
    Status { code: u16, body: String },
    /// Body arrived but didn't decode as the expected shape.
    Decode(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "request failed: {e}"),
            Self::Status { code, body } if body.is_empty() => {
                write!(f, "pipeline HTTP {code}")
            }
            Self::Status { code, body } => write!(f, "pipeline HTTP {code}: {body}"),
            Self::Decode(e) => write!(f, "unexpected response body: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// One triggered audit slice. `runId` and `items` are absent when the
/// server has nothing left at the requested offset.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditBatch {
    #[serde(default)]
    pub count: u64,
    #[serde(rename = "runId")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Serialize)]
struct AuditRequest {
    offset: u64,
    limit: u64,
}

#[derive(Deserialize)]
struct StatusResponse {
    run: Option<RunEnvelope>,
}

#[derive(Deserialize)]
struct RunEnvelope {
    status: Option<String>,
    #[serde(default)]
    results: RunResults,
}

#[derive(Serialize)]
struct RegistryRequest<'a> {
    mode: &'static str,
    targets: &'a [serde_json::Value],
}

#[derive(Deserialize)]
struct RegistryResponse {
    #[serde(rename = "runId")]
    run_id: Option<String>,
}

/// Pipeline operations the batch runners drive. Implemented by the HTTP
/// client below and by scripted fakes in tests.
pub(crate) trait PipelineApi {
    /// Trigger an audit slice covering `[offset, offset + limit)`.
    async fn trigger_audit(&self, offset: u64, limit: u64) -> Result<AuditBatch, PipelineError>;

    /// Fetch the current status of a run.
    async fn run_status(&self, run_id: &str) -> Result<RunStatus, PipelineError>;

    /// Submit registry records for processing. Returns the run handle.
    async fn submit_registry(
        &self,
        targets: &[serde_json::Value],
    ) -> Result<String, PipelineError>;
}

/// HTTP client for the pipeline server.
pub struct PipelineClient {
    http: reqwest::Client,
    base_url: String,
}

impl PipelineClient {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }

    fn audit_url(&self) -> String {
        format!("{}/api/admin/batch-audit", self.base_url)
    }

    fn pipeline_url(&self) -> String {
        format!("{}/api/agents/pipeline", self.base_url)
    }
}

async fn status_error(resp: reqwest::Response) -> PipelineError {
    let code = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    PipelineError::Status { code, body }
}

impl PipelineApi for PipelineClient {
    async fn trigger_audit(&self, offset: u64, limit: u64) -> Result<AuditBatch, PipelineError> {
        let resp = self
            .http
            .post(self.audit_url())
            .json(&AuditRequest { offset, limit })
            .send()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        resp.json::<AuditBatch>()
            .await
            .map_err(|e| PipelineError::Decode(e.to_string()))
    }

    async fn run_status(&self, run_id: &str) -> Result<RunStatus, PipelineError> {
        let resp = self
            .http
            .get(self.pipeline_url())
            .query(&[("runId", run_id)])
            .send()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let data: StatusResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Decode(e.to_string()))?;

        let run = data
            .run
            .ok_or_else(|| PipelineError::Decode("response missing `run` key".into()))?;
        let status = run
            .status
            .ok_or_else(|| PipelineError::Decode("run missing `status` key".into()))?;

        Ok(RunStatus {
            state: RunState::from_raw(&status),
            results: run.results,
        })
    }

    async fn submit_registry(
        &self,
        targets: &[serde_json::Value],
    ) -> Result<String, PipelineError> {
        let resp = self
            .http
            .post(self.pipeline_url())
            .json(&RegistryRequest {
                mode: "batch-registry",
                targets,
            })
            .send()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let data: RegistryResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Decode(e.to_string()))?;

        data.run_id
            .ok_or_else(|| PipelineError::Decode("response missing `runId` key".into()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flag_wins_and_trailing_slash_is_trimmed() {
        let config = PipelineConfig::resolve(Some("http://staging:4000/".to_string()));
        assert_eq!(config.base_url, "http://staging:4000");
    }

    #[test]
    fn client_builds_expected_urls() {
        let client = PipelineClient::new(&PipelineConfig {
            base_url: "http://localhost:3000".to_string(),
        });
        assert_eq!(
            client.audit_url(),
            "http://localhost:3000/api/admin/batch-audit"
        );
        assert_eq!(
            client.pipeline_url(),
            "http://localhost:3000/api/agents/pipeline"
        );
    }

    #[test]
    fn audit_batch_tolerates_missing_keys() {
        let batch: AuditBatch = serde_json::from_str(r#"{"count": 0}"#).expect("decode");
        assert_eq!(batch.count, 0);
        assert!(batch.run_id.is_none());
        assert!(batch.items.is_empty());
    }

    #[test]
    fn error_display_includes_status_code_and_body() {
        let err = PipelineError::Status {
            code: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "pipeline HTTP 500: boom");

        let bare = PipelineError::Status {
            code: 404,
            body: String::new(),
        };
        assert_eq!(bare.to_string(), "pipeline HTTP 404");
    }
}
