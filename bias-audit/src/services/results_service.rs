//! Result retrieval for completed audits
//!
//! Every operation here requires a completed-audit handle. Dataset-only
//! handles are rejected locally before any request is made.

use crate::error::{GateFailure, StageError};
use crate::models::{find_variation, AuditResults, SessionHandle};
use crate::results::{self, ProjectedTable, TableProjector};
use crate::services::backend::{AuditBackend, PreviewRequest, PreviewTables};
use std::sync::Arc;

pub struct ResultsService<B: AuditBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: AuditBackend + ?Sized> ResultsService<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub async fn fetch_results(&self, handle: &SessionHandle) -> Result<AuditResults, StageError> {
        handle.require_completed_audit()?;
        tracing::info!(session = %handle, "Fetching audit results");
        let response = self.backend.fetch_results(handle).await?;
        Ok(results::assemble(response))
    }

    pub async fn download_results_csv(&self, handle: &SessionHandle) -> Result<Vec<u8>, StageError> {
        handle.require_completed_audit()?;
        tracing::info!(session = %handle, "Downloading audit results");
        Ok(self.backend.download_results_csv(handle).await?)
    }

    /// Score a handful of texts under one variation without a full audit
    ///
    /// The magnitude is clamped to the variation's range.
    pub async fn preview_audit(
        &self,
        handle: &SessionHandle,
        sample_texts: Vec<String>,
        variation: &str,
        magnitude: i64,
    ) -> Result<PreviewTables, StageError> {
        handle.require_completed_audit()?;
        let descriptor = find_variation(variation)
            .ok_or_else(|| GateFailure::UnknownVariation(variation.to_string()))?;

        let request = PreviewRequest {
            session_id: handle.clone(),
            sample_texts,
            variation: descriptor.id.clone(),
            magnitude: descriptor.magnitude_range.clamp(magnitude),
        };
        tracing::info!(
            session = %handle,
            variation = %request.variation,
            magnitude = request.magnitude,
            texts = request.sample_texts.len(),
            "Requesting audit preview"
        );
        Ok(self.backend.preview_audit(&request).await?)
    }
}

impl PreviewTables {
    /// Project both preview tables with the same selection
    pub fn project(&self, projector: &TableProjector) -> (ProjectedTable, ProjectedTable) {
        (
            projector.project_measurements(&self.bias_table),
            projector.project_moments(&self.moments_table),
        )
    }
}
