//! Wizard plan files
//!
//! A plan is a TOML document answering every stage up front, so the wizard
//! can run unattended from the command line. Paths are resolved relative to
//! the plan file.

use crate::error::StageError;
use crate::models::{
    AuditResults, BiasMeasure, Dataset, DatasetError, Moment, OutcomeType, ScriptArtifact,
};
use crate::services::AuditBackend;
use crate::workflow::{
    Advance, FilteringUpdate, GroupingUpdate, MeasuresUpdate, SetupUpdate, Stage, StageOutput,
    ValidationUpdate, WorkflowController,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid plan: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Artifact(#[from] DatasetError),

    #[error("{stage} failed: {source}")]
    Stage { stage: Stage, source: StageError },

    #[error("Plan ended before the audit was submitted (stopped at {0})")]
    Incomplete(Stage),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupPlan {
    pub dataset: PathBuf,
    pub model: String,
    pub prompt: Option<String>,
    pub rubric: Option<String>,
    pub script: Option<PathBuf>,
    pub outcome_type: Option<OutcomeType>,
    pub metric: Option<String>,
    /// Run the performance assessment instead of skipping it
    #[serde(default)]
    pub assess: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilteringPlan {
    pub use_score_cutoff: Option<bool>,
    pub cutoff_score: Option<f64>,
    #[serde(default)]
    pub variations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationPlan {
    pub accept: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasuresPlan {
    pub use_additional_measures: Option<bool>,
    #[serde(default)]
    pub selected_measures: Vec<BiasMeasure>,
    #[serde(default)]
    pub use_higher_moments: bool,
    #[serde(default)]
    pub selected_moments: Vec<Moment>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupingPlan {
    pub use_grouping: Option<bool>,
    pub grouping_column: Option<String>,
    pub notification_email: Option<String>,
}

/// Answers for all six stages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WizardPlan {
    pub setup: SetupPlan,
    #[serde(default)]
    pub filtering: FilteringPlan,
    #[serde(default)]
    pub validation: ValidationPlan,
    #[serde(default)]
    pub measures: MeasuresPlan,
    /// Variation id to magnitude; unset variations use their default
    #[serde(default)]
    pub magnitudes: BTreeMap<String, i64>,
    #[serde(default)]
    pub grouping: GroupingPlan,

    #[serde(skip)]
    base_dir: PathBuf,
}

impl WizardPlan {
    pub fn from_toml_str(content: &str) -> Result<Self, PlanError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut plan = Self::from_toml_str(&content)?;
        plan.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(plan)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Setup answers with the dataset and script read from disk
    pub fn setup_update(&self) -> Result<SetupUpdate, PlanError> {
        let setup = &self.setup;
        let custom_script = match &setup.script {
            Some(path) => Some(ScriptArtifact::from_path(&self.resolve(path))?),
            None => None,
        };
        Ok(SetupUpdate {
            dataset: Some(Dataset::from_path(&self.resolve(&setup.dataset))?),
            model: Some(setup.model.clone()),
            prompt: setup.prompt.clone(),
            rubric: setup.rubric.clone(),
            custom_script,
            outcome_type: setup.outcome_type,
            metric: setup.metric.clone(),
            skip_assessment: None,
        })
    }

    /// Stage outputs for every stage after Setup, in order
    pub fn later_outputs(&self) -> Vec<StageOutput> {
        vec![
            StageOutput::Filtering(FilteringUpdate {
                use_score_cutoff: self.filtering.use_score_cutoff,
                cutoff_score: self.filtering.cutoff_score,
                variations: Some(self.filtering.variations.clone()),
            }),
            StageOutput::Validation(ValidationUpdate {
                variations_accepted: self.validation.accept,
            }),
            StageOutput::Measures(MeasuresUpdate {
                use_additional_measures: self.measures.use_additional_measures,
                selected_measures: Some(self.measures.selected_measures.clone()),
                use_higher_moments: Some(self.measures.use_higher_moments),
                selected_moments: Some(self.measures.selected_moments.clone()),
            }),
            StageOutput::Magnitudes {
                magnitudes: self.magnitudes.clone(),
            },
            StageOutput::Grouping(GroupingUpdate {
                use_grouping: self.grouping.use_grouping,
                grouping_column: self.grouping.grouping_column.clone(),
                notification_email: self.grouping.notification_email.clone(),
            }),
        ]
    }

    /// Drive a fresh controller through every stage
    pub async fn execute<B: AuditBackend + ?Sized>(
        &self,
        controller: &WorkflowController<B>,
    ) -> Result<AuditResults, PlanError> {
        let stage_failed = |stage: Stage| move |source: StageError| PlanError::Stage { stage, source };

        controller
            .edit(StageOutput::Setup(self.setup_update()?))
            .map_err(stage_failed(Stage::Setup))?;
        if self.setup.assess {
            controller
                .assess_performance()
                .await
                .map_err(stage_failed(Stage::Setup))?;
        } else {
            controller.skip_assessment().map_err(stage_failed(Stage::Setup))?;
        }
        controller
            .advance(StageOutput::empty(Stage::Setup))
            .await
            .map_err(stage_failed(Stage::Setup))?;

        for output in self.later_outputs() {
            let stage = output.stage();
            match controller.advance(output).await.map_err(stage_failed(stage))? {
                Advance::Entered(next) => tracing::debug!(stage = %next, "Plan entered stage"),
                Advance::Completed(results) => return Ok(results),
            }
        }
        Err(PlanError::Incomplete(controller.current_stage()))
    }
}
