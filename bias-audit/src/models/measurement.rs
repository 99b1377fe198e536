//! Measurement and moment rows returned by the bias-measure calculator
//!
//! The backend reports rows in two shapes: flat snake_case records for
//! preview tables (`original_grade`, `bias_1`, ...) and camelCase records with
//! a nested `biasMeasures` object for audit results. Both parse into the same
//! typed rows; [`MeasurementRow::to_record`] flattens them back for projection.

use crate::models::catalog::{moment_column, parse_moment_column, BiasMeasure, Moment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Flat table row keyed by column name
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("Row is not a JSON object")]
    NotAnObject,

    #[error("Row is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Column '{column}' has unexpected value {value}")]
    BadValue { column: String, value: String },
}

/// One audited (text, variation, magnitude) observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub index: Option<u64>,
    pub variation: String,
    pub magnitude: i64,
    pub original_grade: f64,
    pub perturbed_grade: f64,
    pub difference: f64,
    /// Primary bias measure; always present
    pub bias_0: f64,
    /// Additional measures reported by the backend
    pub additional: BTreeMap<BiasMeasure, f64>,
    pub group: Option<String>,
    pub original_text: Option<String>,
    pub perturbed_text: Option<String>,
}

impl MeasurementRow {
    pub fn bias(&self, measure: BiasMeasure) -> Option<f64> {
        match measure {
            BiasMeasure::Bias0 => Some(self.bias_0),
            other => self.additional.get(&other).copied(),
        }
    }

    /// Parse a backend row in either the flat or the nested shape
    pub fn from_value(value: &Value) -> Result<Self, RowError> {
        let obj = value.as_object().ok_or(RowError::NotAnObject)?;

        let variation = obj
            .get("variation")
            .and_then(Value::as_str)
            .ok_or(RowError::MissingColumn("variation"))?
            .to_string();
        let magnitude = obj
            .get("magnitude")
            .ok_or(RowError::MissingColumn("magnitude"))
            .and_then(|v| as_magnitude("magnitude", v))?;

        let original_grade = number_field(obj, &["original_grade", "originalGrade"])?
            .ok_or(RowError::MissingColumn("original_grade"))?;
        let perturbed_grade = number_field(obj, &["perturbed_grade", "perturbedGrade"])?
            .ok_or(RowError::MissingColumn("perturbed_grade"))?;
        let difference =
            number_field(obj, &["difference"])?.unwrap_or(perturbed_grade - original_grade);

        let nested = obj.get("biasMeasures").and_then(Value::as_object);
        let mut bias_0 = None;
        let mut additional = BTreeMap::new();
        for measure in BiasMeasure::ALL {
            let value = match nested {
                Some(map) => number_field(map, &[measure.id()])?,
                None => None,
            };
            let value = match value {
                Some(v) => Some(v),
                None => number_field(obj, &[measure.id()])?,
            };
            match (measure, value) {
                (BiasMeasure::Bias0, v) => bias_0 = v,
                (m, Some(v)) => {
                    additional.insert(m, v);
                }
                (_, None) => {}
            }
        }

        let index = match obj.get("index").or_else(|| obj.get("row_index")) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| bad_value("index", v))?),
        };

        Ok(Self {
            index,
            variation,
            magnitude,
            original_grade,
            perturbed_grade,
            difference,
            bias_0: bias_0.unwrap_or(difference),
            additional,
            group: obj.get("group").and_then(label),
            original_text: string_field(obj, "original_text"),
            perturbed_text: string_field(obj, "perturbed_text"),
        })
    }

    /// Flatten into a table row using the snake_case column names
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        if let Some(index) = self.index {
            record.insert("index".to_string(), Value::from(index));
        }
        record.insert("variation".to_string(), Value::from(self.variation.clone()));
        record.insert("magnitude".to_string(), Value::from(self.magnitude));
        record.insert("original_grade".to_string(), number(self.original_grade));
        record.insert("perturbed_grade".to_string(), number(self.perturbed_grade));
        record.insert("difference".to_string(), number(self.difference));
        record.insert(BiasMeasure::Bias0.id().to_string(), number(self.bias_0));
        for (measure, value) in &self.additional {
            record.insert(measure.id().to_string(), number(*value));
        }
        if let Some(group) = &self.group {
            record.insert("group".to_string(), Value::from(group.clone()));
        }
        if let Some(text) = &self.original_text {
            record.insert("original_text".to_string(), Value::from(text.clone()));
        }
        if let Some(text) = &self.perturbed_text {
            record.insert("perturbed_text".to_string(), Value::from(text.clone()));
        }
        record
    }
}

/// Per-measure aggregate statistics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MomentStats {
    pub mean: f64,
    pub variance: Option<f64>,
    pub skewness: Option<f64>,
}

impl MomentStats {
    pub fn get(&self, moment: Moment) -> Option<f64> {
        match moment {
            Moment::Mean => Some(self.mean),
            Moment::Variance => self.variance,
            Moment::Skewness => self.skewness,
        }
    }
}

/// Aggregate statistics keyed by (variation, magnitude[, group])
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentRow {
    pub variation: String,
    pub magnitude: i64,
    pub group: Option<String>,
    pub stats: BTreeMap<BiasMeasure, MomentStats>,
}

impl MomentRow {
    pub fn stat(&self, measure: BiasMeasure, moment: Moment) -> Option<f64> {
        self.stats.get(&measure).and_then(|s| s.get(moment))
    }

    /// Parse a moment row with `<measure>_<suffix>` columns
    ///
    /// Measures without a mean column are skipped. Unrecognized columns are
    /// ignored.
    pub fn from_value(value: &Value) -> Result<Self, RowError> {
        let obj = value.as_object().ok_or(RowError::NotAnObject)?;

        let variation = obj
            .get("variation")
            .and_then(Value::as_str)
            .ok_or(RowError::MissingColumn("variation"))?
            .to_string();
        let magnitude = obj
            .get("magnitude")
            .ok_or(RowError::MissingColumn("magnitude"))
            .and_then(|v| as_magnitude("magnitude", v))?;

        let mut partial: BTreeMap<BiasMeasure, BTreeMap<Moment, f64>> = BTreeMap::new();
        for (column, value) in obj {
            let Some((measure, moment)) = parse_moment_column(column) else {
                continue;
            };
            if let Some(v) = finite(value) {
                partial.entry(measure).or_default().insert(moment, v);
            }
        }

        let stats = partial
            .into_iter()
            .filter_map(|(measure, moments)| {
                let mean = *moments.get(&Moment::Mean)?;
                Some((
                    measure,
                    MomentStats {
                        mean,
                        variance: moments.get(&Moment::Variance).copied(),
                        skewness: moments.get(&Moment::Skewness).copied(),
                    },
                ))
            })
            .collect();

        Ok(Self {
            variation,
            magnitude,
            group: obj.get("group").and_then(label),
            stats,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("variation".to_string(), Value::from(self.variation.clone()));
        record.insert("magnitude".to_string(), Value::from(self.magnitude));
        if let Some(group) = &self.group {
            record.insert("group".to_string(), Value::from(group.clone()));
        }
        for (measure, stats) in &self.stats {
            for moment in Moment::ALL {
                if let Some(v) = stats.get(moment) {
                    record.insert(moment_column(*measure, moment), number(v));
                }
            }
        }
        record
    }
}

/// Headline numbers for a completed audit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total_variations: usize,
    pub average_grade_change: f64,
    pub max_bias_measure: f64,
    pub groups_analyzed: usize,
}

/// One dataset row with its perturbed renderings, shown for user review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationSample {
    pub row_index: u64,
    #[serde(rename = "original")]
    pub original_text: String,
    /// Variation id to perturbed text
    pub variations: BTreeMap<String, String>,
}

/// Parse every row, stopping at the first malformed one
pub fn parse_measurements(values: &[Value]) -> Result<Vec<MeasurementRow>, RowError> {
    values.iter().map(MeasurementRow::from_value).collect()
}

/// Parse moment rows, skipping malformed ones
///
/// Moments are derivable locally, so a partial table is better than none.
pub fn parse_moments_lenient(values: &[Value]) -> Vec<MomentRow> {
    values
        .iter()
        .filter_map(|value| match MomentRow::from_value(value) {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed moment row");
                None
            }
        })
        .collect()
}

fn number_field(obj: &Map<String, Value>, keys: &[&str]) -> Result<Option<f64>, RowError> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(v) => {
                return v
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| bad_value(key, v));
            }
        }
    }
    Ok(None)
}

fn as_magnitude(column: &str, value: &Value) -> Result<i64, RowError> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() => Ok(f.round() as i64),
        _ => Err(bad_value(column, value)),
    }
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

fn label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// JSON has no NaN; non-finite values become null
fn number(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn bad_value(column: &str, value: &Value) -> RowError {
    RowError::BadValue {
        column: column.to_string(),
        value: value.to_string(),
    }
}
