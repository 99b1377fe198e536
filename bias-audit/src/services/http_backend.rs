//! HTTP client for the scoring backend

use crate::models::measurement::{parse_measurements, parse_moments_lenient};
use crate::models::{AuditSummary, Record, SessionHandle, VariationSample};
use crate::services::backend::{
    AuditBackend, AuditResponse, AuditSubmission, BackendError, PerformanceAssessment,
    PreviewRequest, PreviewTables, SampleRequest, SessionRequest,
};
use async_trait::async_trait;
use bias_audit_common::config::TomlConfig;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("bias-audit/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct CreateSessionResponse {
    session_id: SessionHandle,
}

#[derive(Deserialize)]
struct AssessResponse {
    session_id: SessionHandle,
    #[serde(default)]
    samples: Vec<Value>,
    metric: Option<String>,
    metric_value: Option<f64>,
}

#[derive(Deserialize)]
struct SamplesResponse {
    #[serde(default)]
    samples: Vec<VariationSample>,
}

#[derive(Deserialize)]
struct PreviewResponse {
    #[serde(default)]
    bias_table: Vec<Record>,
    #[serde(default)]
    moments_table: Vec<Record>,
}

#[derive(Deserialize)]
struct ResultsResponse {
    #[serde(rename = "sessionId")]
    session_id: Option<SessionHandle>,
    status: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    moments: Vec<Value>,
    summary: Option<AuditSummary>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// reqwest-backed [`AuditBackend`]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &TomlConfig) -> Result<Self, BackendError> {
        Self::new(
            &config.backend_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_form(request: &SessionRequest) -> Result<Form, BackendError> {
        let mut form = Form::new()
            .part("csv_file", csv_part(&request.dataset.file_name, request.dataset.contents())?)
            .text("model_type", request.model.id.clone())
            .text("ai_prompt", request.prompt.clone().unwrap_or_default())
            .text("rubric", request.rubric.clone().unwrap_or_default());

        if let Some(script) = &request.custom_script {
            form = form.part(
                "custom_model_file",
                file_part(&script.file_name, script.contents(), "text/x-python")?,
            );
        }
        Ok(form)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(message));
        }
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, BackendError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }
}

fn file_part(file_name: &str, contents: &[u8], mime: &str) -> Result<Part, BackendError> {
    Part::bytes(contents.to_vec())
        .file_name(file_name.to_string())
        .mime_str(mime)
        .map_err(|e| BackendError::Parse(e.to_string()))
}

fn csv_part(file_name: &str, contents: &[u8]) -> Result<Part, BackendError> {
    file_part(file_name, contents, "text/csv")
}

fn into_audit_response(
    fallback_handle: Option<&SessionHandle>,
    wire: ResultsResponse,
) -> Result<AuditResponse, BackendError> {
    let session_handle = wire
        .session_id
        .or_else(|| fallback_handle.cloned())
        .ok_or_else(|| BackendError::Parse("response carries no session id".to_string()))?;

    let results = parse_measurements(&wire.results)
        .map_err(|e| BackendError::Parse(e.to_string()))?;
    let moments = parse_moments_lenient(&wire.moments);

    Ok(AuditResponse {
        session_handle,
        status: wire.status,
        results,
        moments,
        summary: wire.summary,
    })
}

#[async_trait]
impl AuditBackend for HttpBackend {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionHandle, BackendError> {
        tracing::debug!(model = %request.model.id, file = %request.dataset.file_name, "Creating backend session");
        let form = Self::session_form(request)?;
        let body: CreateSessionResponse = self
            .json(self.http_client.post(self.url("/api/create_session")).multipart(form))
            .await?;
        Ok(body.session_id)
    }

    async fn assess_performance(
        &self,
        request: &SessionRequest,
    ) -> Result<PerformanceAssessment, BackendError> {
        tracing::debug!(model = %request.model.id, metric = ?request.metric, "Assessing model performance");
        let mut form = Self::session_form(request)?;
        if let Some(metric) = &request.metric {
            form = form.text("metric", metric.clone());
        }
        let body: AssessResponse = self
            .json(self.http_client.post(self.url("/api/assess_performance")).multipart(form))
            .await?;

        Ok(PerformanceAssessment {
            samples: body.samples,
            metric: body.metric,
            metric_value: body.metric_value.filter(|v| v.is_finite()),
            session_handle: body.session_id,
        })
    }

    async fn sample_variations(
        &self,
        request: &SampleRequest,
    ) -> Result<Vec<VariationSample>, BackendError> {
        tracing::debug!(session = %request.session_id, variations = ?request.variation_types, "Sampling variations");
        let body: SamplesResponse = self
            .json(self.http_client.post(self.url("/api/sample-variations")).json(request))
            .await?;
        Ok(body.samples)
    }

    async fn preview_audit(&self, request: &PreviewRequest) -> Result<PreviewTables, BackendError> {
        tracing::debug!(session = %request.session_id, variation = %request.variation, "Requesting audit preview");
        let body: PreviewResponse = self
            .json(self.http_client.post(self.url("/api/preview_audit")).json(request))
            .await?;
        Ok(PreviewTables {
            bias_table: body.bias_table,
            moments_table: body.moments_table,
        })
    }

    async fn run_audit(&self, submission: &AuditSubmission) -> Result<AuditResponse, BackendError> {
        let state = serde_json::to_string(&submission.configuration)
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let mut form = Form::new().text("auditState", state).part(
            "data",
            csv_part(&submission.dataset.file_name, submission.dataset.contents())?,
        );
        if let Some(script) = &submission.custom_script {
            form = form.part(
                "modelScript",
                file_part(&script.file_name, script.contents(), "text/x-python")?,
            );
        }

        tracing::debug!(
            variations = submission.configuration.selected_variations.len(),
            "Submitting audit"
        );
        let body: ResultsResponse = self
            .json(self.http_client.post(self.url("/api/audit")).multipart(form))
            .await?;
        into_audit_response(None, body)
    }

    async fn fetch_results(&self, handle: &SessionHandle) -> Result<AuditResponse, BackendError> {
        let url = self.url(&format!("/api/results/{}", handle));
        tracing::debug!(session = %handle, url = %url, "Fetching audit results");
        let body: ResultsResponse = self.json(self.http_client.get(&url)).await?;
        into_audit_response(Some(handle), body)
    }

    async fn download_results_csv(&self, handle: &SessionHandle) -> Result<Vec<u8>, BackendError> {
        let url = self.url(&format!("/api/download/{}", handle));
        tracing::debug!(session = %handle, url = %url, "Downloading results CSV");
        let bytes = self
            .send(self.http_client.get(&url))
            .await?
            .bytes()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
