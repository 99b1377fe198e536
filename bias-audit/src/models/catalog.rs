//! Selectable options offered by the wizard
//!
//! Grading models, performance metrics, text variations, bias measures and
//! statistical moments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of outcome the grading model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeType {
    Binary,
    Continuous,
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeType::Binary => write!(f, "binary"),
            OutcomeType::Continuous => write!(f, "continuous"),
        }
    }
}

/// Artifact a model needs before it can grade anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelArtifact {
    /// Hosted LLM driven by a grading prompt (rubric optional)
    Prompt,
    /// User-supplied Python grading script
    CustomScript,
}

/// Grading model descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Artifact required before assessment, if any
    pub requires: Option<ModelArtifact>,
}

impl ModelDescriptor {
    pub fn is_custom(&self) -> bool {
        self.requires == Some(ModelArtifact::CustomScript)
    }
}

/// Performance metric offered for ground-truth datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: String,
    pub name: String,
    pub description: String,
    pub applicable_types: Vec<OutcomeType>,
}

impl PerformanceMetric {
    pub fn applies_to(&self, outcome: OutcomeType) -> bool {
        self.applicable_types.contains(&outcome)
    }
}

/// Inclusive magnitude range declared by a variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct MagnitudeRange {
    pub min: i64,
    pub max: i64,
}

impl MagnitudeRange {
    pub fn new(min: i64, max: i64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.min, self.max)
    }
}

impl From<[i64; 2]> for MagnitudeRange {
    fn from(pair: [i64; 2]) -> Self {
        MagnitudeRange::new(pair[0], pair[1])
    }
}

impl From<MagnitudeRange> for [i64; 2] {
    fn from(range: MagnitudeRange) -> Self {
        [range.min, range.max]
    }
}

/// Linguistic perturbation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub name: String,
    pub description: String,
    pub magnitude_range: MagnitudeRange,
    pub default_magnitude: i64,
}

impl Variation {
    /// Default magnitude, pulled into range if the declaration disagrees
    pub fn default_magnitude(&self) -> i64 {
        self.magnitude_range.clamp(self.default_magnitude)
    }
}

/// Bias measure computed by the backend for every observation
///
/// `bias_0` is the primary measure (raw grade difference) and is always
/// reported. The others are optional extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BiasMeasure {
    #[serde(rename = "bias_0")]
    Bias0,
    #[serde(rename = "bias_1")]
    Bias1,
    #[serde(rename = "bias_2")]
    Bias2,
    #[serde(rename = "bias_3")]
    Bias3,
}

impl BiasMeasure {
    pub const PRIMARY: BiasMeasure = BiasMeasure::Bias0;

    pub const ALL: [BiasMeasure; 4] = [
        BiasMeasure::Bias0,
        BiasMeasure::Bias1,
        BiasMeasure::Bias2,
        BiasMeasure::Bias3,
    ];

    /// Measures the user may add on top of the primary one
    pub const ADDITIONAL: [BiasMeasure; 3] =
        [BiasMeasure::Bias1, BiasMeasure::Bias2, BiasMeasure::Bias3];

    pub fn id(&self) -> &'static str {
        match self {
            BiasMeasure::Bias0 => "bias_0",
            BiasMeasure::Bias1 => "bias_1",
            BiasMeasure::Bias2 => "bias_2",
            BiasMeasure::Bias3 => "bias_3",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        BiasMeasure::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn description(&self) -> &'static str {
        match self {
            BiasMeasure::Bias0 => "Raw grade difference",
            BiasMeasure::Bias1 => "Normalized bias measure",
            BiasMeasure::Bias2 => "Feature-weighted bias measure",
            BiasMeasure::Bias3 => "Grade-adjusted bias measure",
        }
    }
}

impl fmt::Display for BiasMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Statistical moment of a bias measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Moment {
    Mean,
    Variance,
    Skewness,
}

impl Moment {
    pub const ALL: [Moment; 3] = [Moment::Mean, Moment::Variance, Moment::Skewness];

    /// User-facing identifier
    pub fn id(&self) -> &'static str {
        match self {
            Moment::Mean => "mean",
            Moment::Variance => "variance",
            Moment::Skewness => "skewness",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Moment::ALL.into_iter().find(|m| m.id() == id)
    }

    /// Suffix used in moment table column names
    pub fn column_suffix(&self) -> &'static str {
        match self {
            Moment::Mean => "mean",
            Moment::Variance => "var",
            Moment::Skewness => "skew",
        }
    }

    pub fn from_column_suffix(suffix: &str) -> Option<Self> {
        Moment::ALL.into_iter().find(|m| m.column_suffix() == suffix)
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Moment table column for a measure, e.g. `bias_1_var`
pub fn moment_column(measure: BiasMeasure, moment: Moment) -> String {
    format!("{}_{}", measure.id(), moment.column_suffix())
}

/// Split a moment table column back into measure and moment
pub fn parse_moment_column(column: &str) -> Option<(BiasMeasure, Moment)> {
    let (measure, suffix) = column.rsplit_once('_')?;
    Some((BiasMeasure::from_id(measure)?, Moment::from_column_suffix(suffix)?))
}

/// Models the backend knows how to drive
pub fn available_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "gpt-4.1".to_string(),
            name: "GPT-4.1".to_string(),
            description: "OpenAI GPT-4.1 model for text analysis".to_string(),
            requires: Some(ModelArtifact::Prompt),
        },
        ModelDescriptor {
            id: "gpt-4o".to_string(),
            name: "GPT-4o".to_string(),
            description: "OpenAI GPT-4o model for text analysis".to_string(),
            requires: Some(ModelArtifact::Prompt),
        },
        ModelDescriptor {
            id: "custom".to_string(),
            name: "Custom Model".to_string(),
            description: "Upload your own Python model for custom grading".to_string(),
            requires: Some(ModelArtifact::CustomScript),
        },
    ]
}

pub fn find_model(id: &str) -> Option<ModelDescriptor> {
    available_models().into_iter().find(|m| m.id == id)
}

/// Metrics offered when the dataset carries ground truth
pub fn available_metrics() -> Vec<PerformanceMetric> {
    fn metric(id: &str, name: &str, description: &str, outcome: OutcomeType) -> PerformanceMetric {
        PerformanceMetric {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            applicable_types: vec![outcome],
        }
    }

    vec![
        metric("accuracy", "Accuracy", "Fraction of correct predictions", OutcomeType::Binary),
        metric(
            "precision",
            "Precision",
            "True positives / (True positives + False positives)",
            OutcomeType::Binary,
        ),
        metric(
            "recall",
            "Recall",
            "True positives / (True positives + False negatives)",
            OutcomeType::Binary,
        ),
        metric("f1", "F1 Score", "Harmonic mean of precision and recall", OutcomeType::Binary),
        metric(
            "mse",
            "Mean Squared Error",
            "Average squared difference between predictions and actual values",
            OutcomeType::Continuous,
        ),
        metric(
            "mae",
            "Mean Absolute Error",
            "Average absolute difference between predictions and actual values",
            OutcomeType::Continuous,
        ),
        metric("r2", "R² Score", "Coefficient of determination", OutcomeType::Continuous),
    ]
}

pub fn find_metric(id: &str) -> Option<PerformanceMetric> {
    available_metrics().into_iter().find(|m| m.id == id)
}

/// Variations the text-variation generator supports
pub fn available_variations() -> Vec<Variation> {
    fn variation(id: &str, name: &str, description: &str) -> Variation {
        Variation {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            magnitude_range: MagnitudeRange::new(10, 100),
            default_magnitude: 50,
        }
    }

    vec![
        variation("spelling", "Spelling Errors", "Introduce spelling mistakes in the text"),
        variation("noun_transfer", "Noun Transfer", "Translate nouns to Spanish"),
        variation("cognates", "Cognates", "Use cognate words from Spanish"),
        variation("pio", "PIO", "Phonetically Induced Orthography"),
        variation("spanglish", "Spanglish", "Mix Spanish and English phrases"),
    ]
}

pub fn find_variation(id: &str) -> Option<Variation> {
    available_variations().into_iter().find(|v| v.id == id)
}
