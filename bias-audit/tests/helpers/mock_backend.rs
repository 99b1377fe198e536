//! In-memory scoring backend that counts calls
//!
//! Responses are canned. Individual operations can be made to fail once or
//! to stall for a while so tests can observe in-flight behaviour.

use async_trait::async_trait;
use bias_audit::models::{MeasurementRow, Record, SessionHandle, VariationSample};
use bias_audit::services::{
    AuditBackend, AuditResponse, AuditSubmission, BackendError, PerformanceAssessment,
    PreviewRequest, PreviewTables, SampleRequest, SessionRequest,
};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    CreateSession,
    AssessPerformance,
    SampleVariations,
    PreviewAudit,
    RunAudit,
    FetchResults,
    DownloadCsv,
}

pub struct ScriptedBackend {
    counts: Mutex<BTreeMap<Op, usize>>,
    failures: Mutex<BTreeMap<Op, VecDeque<BackendError>>>,
    delays: BTreeMap<Op, Duration>,
    session_handle: SessionHandle,
    audit_handle: SessionHandle,
    metric_value: Option<f64>,
    rows: Vec<MeasurementRow>,
    pub sample_requests: Mutex<Vec<SampleRequest>>,
    pub submissions: Mutex<Vec<AuditSubmission>>,
    handles_issued: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(BTreeMap::new()),
            delays: BTreeMap::new(),
            session_handle: SessionHandle::new("csv_1"),
            audit_handle: SessionHandle::new("audit_1"),
            metric_value: Some(0.82),
            rows: vec![
                super::measurement_row("spelling", -1.0),
                super::measurement_row("spelling", -2.0),
                super::measurement_row("spelling", -3.0),
            ],
            sample_requests: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            handles_issued: AtomicUsize::new(0),
        }
    }

    pub fn with_rows(mut self, rows: Vec<MeasurementRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_metric_value(mut self, value: Option<f64>) -> Self {
        self.metric_value = value;
        self
    }

    pub fn with_delay(mut self, op: Op, delay: Duration) -> Self {
        self.delays.insert(op, delay);
        self
    }

    /// Queue an error returned by the next call to `op`
    pub fn fail_next(&self, op: Op, error: BackendError) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.counts.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }

    async fn enter(&self, op: Op) -> Result<(), BackendError> {
        *self.counts.lock().unwrap().entry(op).or_default() += 1;
        if let Some(delay) = self.delays.get(&op) {
            tokio::time::sleep(*delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Each assessment issues a fresh handle, like the real service does
    fn next_handle(&self) -> SessionHandle {
        let n = self.handles_issued.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.session_handle.clone()
        } else {
            SessionHandle::new(format!("csv_{}", n + 1))
        }
    }

    fn response(&self, handle: &SessionHandle) -> AuditResponse {
        AuditResponse {
            session_handle: handle.clone(),
            status: Some("completed".to_string()),
            results: self.rows.clone(),
            moments: Vec::new(),
            summary: None,
        }
    }
}

#[async_trait]
impl AuditBackend for ScriptedBackend {
    async fn create_session(&self, _request: &SessionRequest) -> Result<SessionHandle, BackendError> {
        self.enter(Op::CreateSession).await?;
        Ok(self.next_handle())
    }

    async fn assess_performance(
        &self,
        request: &SessionRequest,
    ) -> Result<PerformanceAssessment, BackendError> {
        self.enter(Op::AssessPerformance).await?;
        Ok(PerformanceAssessment {
            samples: vec![json!({"text": "The cat sat.", "grade": 1})],
            metric: request.metric.clone(),
            metric_value: self.metric_value,
            session_handle: self.next_handle(),
        })
    }

    async fn sample_variations(
        &self,
        request: &SampleRequest,
    ) -> Result<Vec<VariationSample>, BackendError> {
        self.enter(Op::SampleVariations).await?;
        self.sample_requests.lock().unwrap().push(request.clone());
        Ok((0..request.sample_size as u64)
            .map(|row_index| VariationSample {
                row_index,
                original_text: "The cat sat.".to_string(),
                variations: request
                    .variation_types
                    .iter()
                    .map(|v| (v.clone(), format!("The cat sat ({})", v)))
                    .collect(),
            })
            .collect())
    }

    async fn preview_audit(&self, request: &PreviewRequest) -> Result<PreviewTables, BackendError> {
        self.enter(Op::PreviewAudit).await?;
        let row: Record = BTreeMap::from([
            ("variation".to_string(), json!(request.variation)),
            ("magnitude".to_string(), json!(request.magnitude)),
            ("bias_0".to_string(), json!(-1.0)),
        ]);
        Ok(PreviewTables {
            bias_table: vec![row],
            moments_table: Vec::new(),
        })
    }

    async fn run_audit(&self, submission: &AuditSubmission) -> Result<AuditResponse, BackendError> {
        self.enter(Op::RunAudit).await?;
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(self.response(&self.audit_handle))
    }

    async fn fetch_results(&self, handle: &SessionHandle) -> Result<AuditResponse, BackendError> {
        self.enter(Op::FetchResults).await?;
        Ok(self.response(handle))
    }

    async fn download_results_csv(&self, _handle: &SessionHandle) -> Result<Vec<u8>, BackendError> {
        self.enter(Op::DownloadCsv).await?;
        Ok(b"variation,bias_0\nspelling,-1\n".to_vec())
    }
}
