//! Collaborator contract for the scoring backend
//!
//! The workflow only sees this trait. [`super::HttpBackend`] talks to the
//! real service; tests substitute scripted implementations.

use crate::models::{
    AuditSummary, BiasMeasure, Dataset, ModelDescriptor, Moment, MomentRow, MeasurementRow,
    OutcomeType, Record, ScriptArtifact, SessionHandle, Variation, VariationSample,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Backend client errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Inputs registering a dataset and model with the backend
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub dataset: Dataset,
    pub model: ModelDescriptor,
    pub prompt: Option<String>,
    pub rubric: Option<String>,
    pub custom_script: Option<ScriptArtifact>,
    /// Metric id; only sent for assessment
    pub metric: Option<String>,
}

/// Result of grading a sample of the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceAssessment {
    /// Graded rows as returned, for display
    pub samples: Vec<Value>,
    pub metric: Option<String>,
    pub metric_value: Option<f64>,
    pub session_handle: SessionHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRequest {
    pub session_id: SessionHandle,
    pub variation_types: Vec<String>,
    pub sample_size: usize,
    pub magnitude: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRequest {
    pub session_id: SessionHandle,
    pub sample_texts: Vec<String>,
    pub variation: String,
    pub magnitude: i64,
}

/// Raw preview tables; columns vary with the measures the backend computed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreviewTables {
    pub bias_table: Vec<Record>,
    pub moments_table: Vec<Record>,
}

/// Model reference as embedded in the audit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub id: String,
    pub name: String,
}

/// Complete audit configuration submitted with the final stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfiguration {
    pub session_id: Option<SessionHandle>,
    #[serde(rename = "selectedLLM")]
    pub selected_llm: Option<ModelSelection>,
    pub ai_prompt: String,
    pub rubric: String,
    pub outcome_type: Option<OutcomeType>,
    pub selected_metric: Option<String>,
    pub use_score_cutoff: bool,
    pub cutoff_score: Option<f64>,
    pub selected_variations: Vec<Variation>,
    pub variation_magnitudes: BTreeMap<String, i64>,
    pub use_additional_measures: bool,
    pub selected_measures: Vec<BiasMeasure>,
    pub use_higher_moments: bool,
    pub selected_moments: Vec<Moment>,
    pub use_grouping: bool,
    pub grouping_variable: Option<String>,
    pub notification_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditSubmission {
    pub configuration: AuditConfiguration,
    pub dataset: Dataset,
    pub custom_script: Option<ScriptArtifact>,
}

/// Audit results as returned by `run_audit` or `fetch_results`
#[derive(Debug, Clone, PartialEq)]
pub struct AuditResponse {
    pub session_handle: SessionHandle,
    pub status: Option<String>,
    pub results: Vec<MeasurementRow>,
    pub moments: Vec<MomentRow>,
    /// Absent when the backend did not compute one
    pub summary: Option<AuditSummary>,
}

/// Scoring backend operations used by the wizard
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Register dataset and model without grading anything
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionHandle, BackendError>;

    /// Grade a sample and compute the selected metric when ground truth exists
    async fn assess_performance(
        &self,
        request: &SessionRequest,
    ) -> Result<PerformanceAssessment, BackendError>;

    async fn sample_variations(
        &self,
        request: &SampleRequest,
    ) -> Result<Vec<VariationSample>, BackendError>;

    async fn preview_audit(&self, request: &PreviewRequest) -> Result<PreviewTables, BackendError>;

    async fn run_audit(&self, submission: &AuditSubmission) -> Result<AuditResponse, BackendError>;

    async fn fetch_results(&self, handle: &SessionHandle) -> Result<AuditResponse, BackendError>;

    /// Backend-rendered CSV of the results
    async fn download_results_csv(&self, handle: &SessionHandle) -> Result<Vec<u8>, BackendError>;
}
