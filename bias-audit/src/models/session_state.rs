//! Accumulated configuration for one audit run
//!
//! Each stage owns one sub-record. The controller holds the only mutable
//! copy; stages see clones and hand back partial updates.

use crate::models::catalog::{
    BiasMeasure, Moment, ModelDescriptor, OutcomeType, PerformanceMetric, Variation,
};
use crate::models::dataset::{Dataset, ScriptArtifact};
use crate::models::handle::SessionHandle;
use crate::models::measurement::{AuditSummary, MeasurementRow, MomentRow, VariationSample};
use crate::services::backend::{AuditConfiguration, AuditSubmission, ModelSelection, SessionRequest};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metric value at or above which the initial performance is satisfactory
///
/// Applied to every metric, including error metrics such as mse where lower
/// is better. The flag is only reported to the user and never gates Setup.
pub const SATISFACTORY_PERFORMANCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub setup: SetupState,
    pub filtering: FilteringState,
    pub validation: ValidationState,
    pub measures: MeasuresState,
    pub magnitudes: MagnitudesState,
    pub grouping: GroupingState,
    pub results: Option<AuditResults>,
}

/// Stage 1: dataset, model and initial performance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetupState {
    pub dataset: Option<Dataset>,
    pub model: Option<ModelDescriptor>,
    pub prompt: Option<String>,
    pub rubric: Option<String>,
    pub custom_script: Option<ScriptArtifact>,
    pub outcome_type: Option<OutcomeType>,
    pub metric: Option<PerformanceMetric>,

    /// Metric value from the performance assessment, when one was computed
    pub initial_performance: Option<f64>,
    /// Informational; see [`SATISFACTORY_PERFORMANCE`]
    pub performance_satisfactory: Option<bool>,
    pub performance_assessed: bool,
    pub assessment_skipped: bool,
    /// Rows graded during assessment, kept for display only
    pub assessment_samples: Vec<Value>,

    /// Set once, then stable for the rest of the run
    pub session_handle: Option<SessionHandle>,
}

impl SetupState {
    pub fn has_ground_truth(&self) -> bool {
        self.dataset
            .as_ref()
            .map(Dataset::has_ground_truth)
            .unwrap_or(false)
    }

    /// Drop assessment results that no longer describe the current inputs
    pub fn clear_assessment(&mut self) {
        self.initial_performance = None;
        self.performance_satisfactory = None;
        self.performance_assessed = false;
        self.assessment_skipped = false;
        self.assessment_samples.clear();
    }

    pub fn record_assessment(&mut self, metric_value: Option<f64>, samples: Vec<Value>) {
        self.initial_performance = metric_value;
        self.performance_satisfactory = metric_value.map(|v| v >= SATISFACTORY_PERFORMANCE);
        self.performance_assessed = true;
        self.assessment_skipped = false;
        self.assessment_samples = samples;
    }
}

/// Stage 2: score cutoff and variation selection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilteringState {
    pub use_score_cutoff: Option<bool>,
    pub cutoff_score: Option<f64>,
    pub selected_variations: Vec<Variation>,
}

impl FilteringState {
    /// Cutoff actually applied; the score is ignored unless enabled
    pub fn effective_cutoff(&self) -> Option<f64> {
        match self.use_score_cutoff {
            Some(true) => self.cutoff_score,
            _ => None,
        }
    }

    pub fn variation_ids(&self) -> Vec<String> {
        self.selected_variations.iter().map(|v| v.id.clone()).collect()
    }
}

/// Which handle and variation set the cached samples were drawn for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleKey {
    pub handle: SessionHandle,
    pub variation_ids: Vec<String>,
}

/// Stage 3: user review of sampled variations
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationState {
    pub variations_accepted: Option<bool>,
    pub samples: Vec<VariationSample>,
    pub sampled_for: Option<SampleKey>,
}

impl ValidationState {
    pub fn has_samples_for(&self, key: &SampleKey) -> bool {
        self.sampled_for.as_ref() == Some(key) && !self.samples.is_empty()
    }
}

/// Stage 4: bias measures and moments
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasuresState {
    pub use_additional_measures: Option<bool>,
    pub selected_measures: Vec<BiasMeasure>,
    pub use_higher_moments: bool,
    pub selected_moments: Vec<Moment>,
}

impl MeasuresState {
    /// Primary measure first, then extra measures in selection order
    pub fn measures_in_scope(&self) -> Vec<BiasMeasure> {
        let mut measures = vec![BiasMeasure::PRIMARY];
        if self.use_additional_measures == Some(true) {
            for m in &self.selected_measures {
                if !measures.contains(m) {
                    measures.push(*m);
                }
            }
        }
        measures
    }

    /// Mean always, then variance and skewness when selected
    pub fn moments_in_scope(&self) -> Vec<Moment> {
        let mut moments = vec![Moment::Mean];
        if self.use_higher_moments {
            for m in [Moment::Variance, Moment::Skewness] {
                if self.selected_moments.contains(&m) {
                    moments.push(m);
                }
            }
        }
        moments
    }
}

/// Stage 5: chosen magnitude per variation id
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MagnitudesState {
    pub values: BTreeMap<String, i64>,
}

/// Stage 6: grouping and notification
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupingState {
    pub use_grouping: Option<bool>,
    pub grouping_column: Option<String>,
    pub notification_email: Option<String>,
}

impl GroupingState {
    pub fn effective_column(&self) -> Option<&str> {
        match self.use_grouping {
            Some(true) => self.grouping_column.as_deref(),
            _ => None,
        }
    }
}

/// Completed audit payload
#[derive(Debug, Clone, PartialEq)]
pub struct AuditResults {
    pub audit_handle: SessionHandle,
    pub rows: Vec<MeasurementRow>,
    pub moments: Vec<MomentRow>,
    pub summary: AuditSummary,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Magnitude per selected variation, defaulted and clamped to range
    pub fn resolved_magnitudes(&self) -> BTreeMap<String, i64> {
        self.filtering
            .selected_variations
            .iter()
            .map(|v| {
                let chosen = self
                    .magnitudes
                    .values
                    .get(&v.id)
                    .copied()
                    .unwrap_or_else(|| v.default_magnitude());
                (v.id.clone(), v.magnitude_range.clamp(chosen))
            })
            .collect()
    }

    /// Inputs for session creation or performance assessment
    pub fn session_request(&self) -> Option<SessionRequest> {
        let setup = &self.setup;
        Some(SessionRequest {
            dataset: setup.dataset.clone()?,
            model: setup.model.clone()?,
            prompt: setup.prompt.clone(),
            rubric: setup.rubric.clone(),
            custom_script: setup.custom_script.clone(),
            metric: setup.metric.as_ref().map(|m| m.id.clone()),
        })
    }

    /// Full audit configuration as the backend expects it
    pub fn audit_configuration(&self) -> AuditConfiguration {
        let setup = &self.setup;
        let measures = &self.measures;
        let use_cutoff = self.filtering.use_score_cutoff == Some(true);
        let use_grouping = self.grouping.use_grouping == Some(true);

        AuditConfiguration {
            session_id: setup.session_handle.clone(),
            selected_llm: setup.model.as_ref().map(|m| ModelSelection {
                id: m.id.clone(),
                name: m.name.clone(),
            }),
            ai_prompt: setup.prompt.clone().unwrap_or_default(),
            rubric: setup.rubric.clone().unwrap_or_default(),
            outcome_type: setup.outcome_type,
            selected_metric: setup.metric.as_ref().map(|m| m.id.clone()),
            use_score_cutoff: use_cutoff,
            cutoff_score: self.filtering.effective_cutoff(),
            selected_variations: self.filtering.selected_variations.clone(),
            variation_magnitudes: self.resolved_magnitudes(),
            use_additional_measures: measures.use_additional_measures == Some(true),
            selected_measures: measures
                .measures_in_scope()
                .into_iter()
                .filter(|m| *m != BiasMeasure::PRIMARY)
                .collect(),
            use_higher_moments: measures.use_higher_moments,
            selected_moments: measures.moments_in_scope(),
            use_grouping,
            grouping_variable: self.grouping.effective_column().map(str::to_string),
            notification_email: self.grouping.notification_email.clone(),
        }
    }

    pub fn audit_submission(&self) -> Option<AuditSubmission> {
        Some(AuditSubmission {
            configuration: self.audit_configuration(),
            dataset: self.setup.dataset.clone()?,
            custom_script: self.setup.custom_script.clone(),
        })
    }
}
