//! Display-ready report for a completed audit

use crate::models::{AuditResults, AuditSummary, BiasMeasure, MeasurementRow, Record, SessionHandle};
use crate::results::kde::Kde;
use crate::results::projector::{ProjectedTable, TableProjector, TableSelection};
use std::collections::BTreeMap;

/// Projected tables plus one density curve per variation
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub audit_handle: SessionHandle,
    pub summary: AuditSummary,
    pub measurements: ProjectedTable,
    pub moments: ProjectedTable,
    /// Variation id to `(x, density)` points of its primary bias distribution
    pub distributions: BTreeMap<String, Vec<(f64, f64)>>,
}

impl AuditReport {
    pub fn build(results: &AuditResults, selection: TableSelection, kde: &Kde) -> Self {
        let projector = TableProjector::new(selection);

        let measurement_records: Vec<Record> = results.rows.iter().map(|r| r.to_record()).collect();
        let moment_records: Vec<Record> = results.moments.iter().map(|m| m.to_record()).collect();

        let samples = samples_by_variation(&results.rows, BiasMeasure::PRIMARY);
        let distributions = kde
            .curves(&samples)
            .into_iter()
            .map(|(variation, curve)| (variation, curve.collect()))
            .collect();

        Self {
            audit_handle: results.audit_handle.clone(),
            summary: results.summary.clone(),
            measurements: projector.project_measurements(&measurement_records),
            moments: projector.project_moments(&moment_records),
            distributions,
        }
    }
}

/// Values of one bias measure grouped by variation id
pub fn samples_by_variation(rows: &[MeasurementRow], measure: BiasMeasure) -> BTreeMap<String, Vec<f64>> {
    let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let Some(value) = row.bias(measure) {
            samples.entry(row.variation.clone()).or_default().push(value);
        }
    }
    samples
}
