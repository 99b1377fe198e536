//! Data models for the audit wizard

pub mod catalog;
pub mod dataset;
pub mod handle;
pub mod measurement;
pub mod session_state;

pub use catalog::{
    available_metrics, available_models, available_variations, find_metric, find_model,
    find_variation, BiasMeasure, MagnitudeRange, Moment, ModelArtifact, ModelDescriptor,
    OutcomeType, PerformanceMetric, Variation,
};
pub use dataset::{Dataset, DatasetError, ScriptArtifact};
pub use handle::{HandleKind, SessionHandle};
pub use measurement::{
    AuditSummary, MeasurementRow, MomentRow, MomentStats, Record, RowError, VariationSample,
};
pub use session_state::{
    AuditResults, FilteringState, GroupingState, MagnitudesState, MeasuresState, SampleKey,
    SessionState, SetupState, ValidationState,
};
