//! Column projection for measurement and moment tables
//!
//! Backend tables are heterogeneous: which bias and moment columns appear
//! depends on what was computed. The projector derives the ordered column
//! list for display or export from the user's selections and whatever
//! columns are actually present. Data is never recomputed or dropped from
//! the rows themselves; missing columns are simply left out.

use crate::models::catalog::moment_column;
use crate::models::{AuditResults, BiasMeasure, MeasuresState, Moment, Record};
use serde_json::Value;
use std::collections::BTreeSet;

/// Leading columns shown in this order when present
pub const STRUCTURAL_COLUMNS: [&str; 7] = [
    "index",
    "variation",
    "magnitude",
    "original_grade",
    "perturbed_grade",
    "difference",
    "group",
];

/// Which bias measures and moments are in scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    /// Primary measure first, then extras in selection order
    pub measures: Vec<BiasMeasure>,
    /// Mean first, then any higher moments selected
    pub moments: Vec<Moment>,
}

impl Default for TableSelection {
    fn default() -> Self {
        Self {
            measures: vec![BiasMeasure::PRIMARY],
            moments: vec![Moment::Mean],
        }
    }
}

impl TableSelection {
    /// Build a selection, forcing the primary measure and the mean to lead
    pub fn new(extra_measures: &[BiasMeasure], higher_moments: &[Moment]) -> Self {
        let mut selection = Self::default();
        for m in extra_measures {
            if !selection.measures.contains(m) {
                selection.measures.push(*m);
            }
        }
        for m in [Moment::Variance, Moment::Skewness] {
            if higher_moments.contains(&m) {
                selection.moments.push(m);
            }
        }
        selection
    }

    pub fn from_measures(measures: &MeasuresState) -> Self {
        Self {
            measures: measures.measures_in_scope(),
            moments: measures.moments_in_scope(),
        }
    }

    /// Everything the backend actually computed for a finished audit
    pub fn from_results(results: &AuditResults) -> Self {
        let row_measures = results.rows.iter().flat_map(|r| r.additional.keys());
        let moment_measures = results.moments.iter().flat_map(|m| m.stats.keys());
        let present: BTreeSet<BiasMeasure> = row_measures.chain(moment_measures).copied().collect();

        let higher: Vec<Moment> = [Moment::Variance, Moment::Skewness]
            .into_iter()
            .filter(|&moment| {
                results
                    .moments
                    .iter()
                    .flat_map(|m| m.stats.values())
                    .any(|stats| stats.get(moment).is_some())
            })
            .collect();

        let extras: Vec<BiasMeasure> = present.into_iter().collect();
        Self::new(&extras, &higher)
    }
}

/// Rows paired with the ordered columns to render
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ProjectedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableProjector {
    selection: TableSelection,
}

impl TableProjector {
    pub fn new(selection: TableSelection) -> Self {
        Self { selection }
    }

    pub fn selection(&self) -> &TableSelection {
        &self.selection
    }

    /// Column order for a measurement table whose rows carry `available`
    pub fn measurement_columns<'a, I>(&self, available: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: BTreeSet<&str> = available.into_iter().collect();
        let mut columns = structural(&present);
        for measure in &self.selection.measures {
            push_if_present(&mut columns, &present, measure.id());
        }
        columns
    }

    /// Column order for a moment table whose rows carry `available`
    pub fn moment_columns<'a, I>(&self, available: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: BTreeSet<&str> = available.into_iter().collect();
        let mut columns = structural(&present);
        for measure in &self.selection.measures {
            for moment in &self.selection.moments {
                push_if_present(&mut columns, &present, &moment_column(*measure, *moment));
            }
        }
        columns
    }

    pub fn project_measurements(&self, records: &[Record]) -> ProjectedTable {
        let columns = self.measurement_columns(union_keys(records));
        project(columns, records)
    }

    pub fn project_moments(&self, records: &[Record]) -> ProjectedTable {
        let columns = self.moment_columns(union_keys(records));
        project(columns, records)
    }
}

fn structural(present: &BTreeSet<&str>) -> Vec<String> {
    STRUCTURAL_COLUMNS
        .iter()
        .filter(|c| present.contains(*c))
        .map(|c| c.to_string())
        .collect()
}

fn push_if_present(columns: &mut Vec<String>, present: &BTreeSet<&str>, column: &str) {
    if present.contains(column) && !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
}

/// Every key seen in any row; rows may disagree on optional columns
fn union_keys(records: &[Record]) -> impl Iterator<Item = &str> {
    records
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect::<BTreeSet<_>>()
        .into_iter()
}

fn project(columns: Vec<String>, records: &[Record]) -> ProjectedTable {
    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    ProjectedTable { columns, rows }
}
