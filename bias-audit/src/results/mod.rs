//! Result post-processing: projection, density curves, aggregation, export

pub mod export;
pub mod kde;
pub mod moments;
pub mod projector;
pub mod report;
pub mod summary;

pub use kde::{Kde, KdeCurve};
pub use projector::{ProjectedTable, TableProjector, TableSelection};
pub use report::AuditReport;

use crate::models::{AuditResults, AuditSummary};
use crate::services::backend::AuditResponse;

/// Turn a backend response into complete results
///
/// Moments and summary are derived locally when the backend left them out.
pub fn assemble(response: AuditResponse) -> AuditResults {
    let moments = if response.moments.is_empty() && !response.results.is_empty() {
        tracing::debug!(rows = response.results.len(), "Deriving moments locally");
        moments::compute_moments(&response.results)
    } else {
        response.moments
    };
    let summary = response
        .summary
        .unwrap_or_else(|| AuditSummary::from_rows(&response.results));

    AuditResults {
        audit_handle: response.session_handle,
        rows: response.results,
        moments,
        summary,
    }
}
