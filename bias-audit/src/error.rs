//! Error types for the audit wizard
//!
//! Errors are scoped to the stage that produced them. Gate failures are
//! ordinary values describing which field blocks progress; they are recorded
//! on the controller and never escape it as panics.

use crate::models::SessionHandle;
use crate::services::BackendError;
use crate::workflow::{DataDependency, Stage};
use thiserror::Error;

/// Why a stage gate refused to let the wizard move forward
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateFailure {
    #[error("Please upload a CSV dataset")]
    MissingDataset,

    #[error("Please select a grading model")]
    MissingModel,

    #[error("Unknown grading model '{0}'")]
    UnknownModel(String),

    #[error("Unknown performance metric '{0}'")]
    UnknownMetric(String),

    #[error("Model '{0}' requires a grading prompt")]
    MissingPrompt(String),

    #[error("Model '{0}' requires a custom grading script")]
    MissingCustomScript(String),

    #[error("Dataset has a ground-truth column; please select an outcome type")]
    MissingOutcomeType,

    #[error("Dataset has a ground-truth column; please select a performance metric")]
    MissingMetric,

    #[error("Metric '{metric}' does not apply to {outcome} outcomes")]
    MetricNotApplicable { metric: String, outcome: String },

    #[error("Assess model performance or explicitly skip the assessment")]
    AssessmentPending,

    #[error("Dataset, model and grading artifacts are fixed once the backend session exists; restart the audit to change them")]
    SetupLocked,

    #[error("Choose whether to apply a score cutoff")]
    CutoffChoiceMissing,

    #[error("Score cutoff is enabled but no cutoff score was given")]
    MissingCutoffScore,

    #[error("Cutoff score must be a finite number, got {0}")]
    InvalidCutoffScore(f64),

    #[error("Select at least one variation")]
    NoVariationsSelected,

    #[error("Unknown variation '{0}'")]
    UnknownVariation(String),

    #[error("Confirm whether the sampled variations are valid")]
    ValidationChoiceMissing,

    #[error("Choose whether to use additional bias measures")]
    MeasuresChoiceMissing,

    #[error("Skewness can only be selected together with variance")]
    SkewnessWithoutVariance,

    #[error("Choose whether to group results")]
    GroupingChoiceMissing,

    #[error("Grouping is enabled but no grouping column was given")]
    MissingGroupingColumn,

    #[error("Grouping column '{0}' is not present in the dataset")]
    UnknownGroupingColumn(String),

    #[error("'{0}' is not a valid notification address")]
    InvalidNotificationAddress(String),
}

/// Stage-scoped error
///
/// Every variant is attached to the stage that produced it and cleared on
/// that stage's next successful action.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// Input validation: the stage gate rejected the merged state
    #[error("{0}")]
    Gate(GateFailure),

    /// Collaborator call failed; retry by repeating the same stage action
    #[error("Backend call failed: {0}")]
    Collaborator(#[from] BackendError),

    /// A dataset-only handle was used where a completed audit is required
    #[error("Session '{0}' only identifies an uploaded dataset, not a completed audit. Please restart the audit flow and run it to completion.")]
    SessionMismatch(SessionHandle),

    /// A stage was entered before the data it depends on exists
    #[error("Stage requires {0}, which an earlier stage has not produced")]
    MissingDependency(DataDependency),

    /// A call from this stage is still outstanding
    #[error("{0} is waiting for the backend; try again when it finishes")]
    Busy(Stage),

    /// The action targets a stage other than the current one
    #[error("Action belongs to {got}, but the wizard is at {expected}")]
    WrongStage { expected: Stage, got: Stage },

    /// The run was reset or re-keyed while a call was outstanding
    #[error("Result discarded: the audit session changed while the request was in flight")]
    Stale,
}

impl From<GateFailure> for StageError {
    fn from(reason: GateFailure) -> Self {
        StageError::Gate(reason)
    }
}

impl StageError {
    /// Whether repeating the same action may succeed without user edits
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageError::Collaborator(_) | StageError::Busy(_) | StageError::Stale
        )
    }
}
