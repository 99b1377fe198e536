//! Headline numbers for a completed audit

use crate::models::{AuditSummary, BiasMeasure, MeasurementRow};
use std::collections::BTreeSet;

/// Label counted for rows without a group
const DEFAULT_GROUP: &str = "default";

impl AuditSummary {
    /// Summarize measurement rows the same way the backend does
    ///
    /// Average grade change is the mean of `bias_0`; the maximum bias is the
    /// largest absolute `bias_1`, or 0 when no row reports it.
    pub fn from_rows(rows: &[MeasurementRow]) -> Self {
        if rows.is_empty() {
            return Self::default();
        }

        let total_variations = rows
            .iter()
            .map(|r| r.variation.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let average_grade_change = rows.iter().map(|r| r.bias_0).sum::<f64>() / rows.len() as f64;

        let max_bias_measure = rows
            .iter()
            .filter_map(|r| r.bias(BiasMeasure::Bias1))
            .filter(|v| v.is_finite())
            .map(f64::abs)
            .fold(0.0, f64::max);

        let groups_analyzed = rows
            .iter()
            .map(|r| r.group.as_deref().unwrap_or(DEFAULT_GROUP))
            .collect::<BTreeSet<_>>()
            .len();

        Self {
            total_variations,
            average_grade_change,
            max_bias_measure,
            groups_analyzed,
        }
    }
}
