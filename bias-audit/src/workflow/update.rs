//! Partial updates returned by stages and merged into the session
//!
//! Every field is optional: `None` leaves the current value alone, `Some`
//! overwrites it. Merging only enforces invariants that hold regardless of
//! stage completion (catalog membership, clamping, setup lock); completion is
//! the validators' job.

use crate::error::GateFailure;
use crate::models::{
    find_metric, find_model, find_variation, BiasMeasure, Dataset, Moment, OutcomeType,
    ScriptArtifact, SessionState, Variation,
};
use crate::workflow::Stage;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetupUpdate {
    pub dataset: Option<Dataset>,
    /// Catalog model id
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub rubric: Option<String>,
    pub custom_script: Option<ScriptArtifact>,
    pub outcome_type: Option<OutcomeType>,
    /// Catalog metric id
    pub metric: Option<String>,
    pub skip_assessment: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilteringUpdate {
    pub use_score_cutoff: Option<bool>,
    pub cutoff_score: Option<f64>,
    /// Catalog variation ids, in display order
    pub variations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationUpdate {
    pub variations_accepted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasuresUpdate {
    pub use_additional_measures: Option<bool>,
    pub selected_measures: Option<Vec<BiasMeasure>>,
    pub use_higher_moments: Option<bool>,
    pub selected_moments: Option<Vec<Moment>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupingUpdate {
    pub use_grouping: Option<bool>,
    pub grouping_column: Option<String>,
    pub notification_email: Option<String>,
}

/// Output of one stage, tagged by the stage that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Setup(SetupUpdate),
    Filtering(FilteringUpdate),
    Validation(ValidationUpdate),
    Measures(MeasuresUpdate),
    Magnitudes { magnitudes: BTreeMap<String, i64> },
    Grouping(GroupingUpdate),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Setup(_) => Stage::Setup,
            StageOutput::Filtering(_) => Stage::Filtering,
            StageOutput::Validation(_) => Stage::Validation,
            StageOutput::Measures(_) => Stage::Measures,
            StageOutput::Magnitudes { .. } => Stage::Magnitudes,
            StageOutput::Grouping(_) => Stage::Grouping,
        }
    }

    /// An update that changes nothing, used to re-run a stage gate
    pub fn empty(stage: Stage) -> Self {
        match stage {
            Stage::Setup => StageOutput::Setup(SetupUpdate::default()),
            Stage::Filtering => StageOutput::Filtering(FilteringUpdate::default()),
            Stage::Validation => StageOutput::Validation(ValidationUpdate::default()),
            Stage::Measures => StageOutput::Measures(MeasuresUpdate::default()),
            Stage::Magnitudes => StageOutput::Magnitudes {
                magnitudes: BTreeMap::new(),
            },
            Stage::Grouping => StageOutput::Grouping(GroupingUpdate::default()),
        }
    }
}

impl SessionState {
    /// Merge a stage output in place
    ///
    /// On error the state may be partially updated; callers merge into a
    /// scratch copy and discard it on failure.
    pub fn merge(&mut self, output: StageOutput) -> Result<(), GateFailure> {
        match output {
            StageOutput::Setup(update) => self.merge_setup(update),
            StageOutput::Filtering(update) => self.merge_filtering(update),
            StageOutput::Validation(update) => {
                if let Some(accepted) = update.variations_accepted {
                    self.validation.variations_accepted = Some(accepted);
                }
                Ok(())
            }
            StageOutput::Measures(update) => {
                self.merge_measures(update);
                Ok(())
            }
            StageOutput::Magnitudes { magnitudes } => {
                self.merge_magnitudes(magnitudes);
                Ok(())
            }
            StageOutput::Grouping(update) => {
                self.merge_grouping(update);
                Ok(())
            }
        }
    }

    fn merge_setup(&mut self, update: SetupUpdate) -> Result<(), GateFailure> {
        let model = match update.model {
            Some(id) => Some(find_model(&id).ok_or(GateFailure::UnknownModel(id))?),
            None => None,
        };
        let metric = match update.metric {
            Some(id) => Some(find_metric(&id).ok_or(GateFailure::UnknownMetric(id))?),
            None => None,
        };

        let prompt = update.prompt.map(non_blank);
        let rubric = update.rubric.map(non_blank);

        let setup = &mut self.setup;
        let model_switched = matches!(
            (&model, &setup.model),
            (Some(new), Some(old)) if new.id != old.id
        ) || (model.is_some() && setup.model.is_none());

        let inputs_changed = model_switched
            || changes(&update.dataset, &setup.dataset)
            || text_changes(&prompt, &setup.prompt)
            || text_changes(&rubric, &setup.rubric)
            || changes(&update.custom_script, &setup.custom_script);

        if inputs_changed && setup.session_handle.is_some() {
            return Err(GateFailure::SetupLocked);
        }

        if model_switched {
            setup.outcome_type = None;
            setup.metric = None;
            setup.prompt = None;
            setup.rubric = None;
            setup.custom_script = None;
        }

        let grading_changed = inputs_changed
            || changes(&update.outcome_type, &setup.outcome_type)
            || match (&metric, &setup.metric) {
                (Some(new), Some(old)) => new.id != old.id,
                (Some(_), None) => true,
                _ => false,
            };
        if grading_changed {
            setup.clear_assessment();
        }

        if let Some(dataset) = update.dataset {
            setup.dataset = Some(dataset);
        }
        if let Some(model) = model {
            setup.model = Some(model);
        }
        if let Some(prompt) = prompt {
            setup.prompt = prompt;
        }
        if let Some(rubric) = rubric {
            setup.rubric = rubric;
        }
        if let Some(script) = update.custom_script {
            setup.custom_script = Some(script);
        }
        if let Some(outcome) = update.outcome_type {
            setup.outcome_type = Some(outcome);
        }
        if let Some(metric) = metric {
            setup.metric = Some(metric);
        }
        if let Some(skip) = update.skip_assessment {
            setup.assessment_skipped = skip;
        }
        Ok(())
    }

    fn merge_filtering(&mut self, update: FilteringUpdate) -> Result<(), GateFailure> {
        if let Some(ids) = update.variations {
            let mut selected = Vec::with_capacity(ids.len());
            for id in ids {
                if selected.iter().any(|v: &Variation| v.id == id) {
                    continue;
                }
                selected.push(find_variation(&id).ok_or(GateFailure::UnknownVariation(id))?);
            }
            self.filtering.selected_variations = selected;
        }
        if let Some(use_cutoff) = update.use_score_cutoff {
            self.filtering.use_score_cutoff = Some(use_cutoff);
        }
        if let Some(score) = update.cutoff_score {
            self.filtering.cutoff_score = Some(score);
        }
        Ok(())
    }

    fn merge_measures(&mut self, update: MeasuresUpdate) {
        let measures = &mut self.measures;
        if let Some(use_additional) = update.use_additional_measures {
            measures.use_additional_measures = Some(use_additional);
        }
        if let Some(selected) = update.selected_measures {
            measures.selected_measures = dedup(
                selected
                    .into_iter()
                    .filter(|m| *m != BiasMeasure::PRIMARY),
            );
        }
        if let Some(use_higher) = update.use_higher_moments {
            measures.use_higher_moments = use_higher;
        }
        if let Some(selected) = update.selected_moments {
            measures.selected_moments = dedup(selected.into_iter());
        }
    }

    fn merge_magnitudes(&mut self, magnitudes: BTreeMap<String, i64>) {
        for (id, value) in magnitudes {
            let Some(variation) = self
                .filtering
                .selected_variations
                .iter()
                .find(|v| v.id == id)
            else {
                tracing::debug!(variation = %id, "Ignoring magnitude for unselected variation");
                continue;
            };
            let clamped = variation.magnitude_range.clamp(value);
            self.magnitudes.values.insert(id, clamped);
        }
    }

    fn merge_grouping(&mut self, update: GroupingUpdate) {
        let grouping = &mut self.grouping;
        if let Some(column) = update.grouping_column {
            grouping.grouping_column = non_blank(column);
        }
        if let Some(use_grouping) = update.use_grouping {
            grouping.use_grouping = Some(use_grouping);
            if !use_grouping {
                grouping.grouping_column = None;
            }
        }
        if let Some(email) = update.notification_email {
            grouping.notification_email = non_blank(email);
        }
    }
}

fn changes<T: PartialEq>(update: &Option<T>, current: &Option<T>) -> bool {
    match update {
        Some(new) => current.as_ref() != Some(new),
        None => false,
    }
}

/// Like [`changes`] for trimmed text, where blank clears the field
fn text_changes(update: &Option<Option<String>>, current: &Option<String>) -> bool {
    matches!(update, Some(new) if new != current)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn dedup<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionHandle;

    fn dataset() -> Dataset {
        Dataset::from_csv_bytes("d.csv", b"text,true_grade\nhi,1\n".to_vec()).unwrap()
    }

    #[test]
    fn test_model_switch_clears_dependent_fields() {
        let mut state = SessionState::new();
        state
            .merge(StageOutput::Setup(SetupUpdate {
                model: Some("gpt-4o".into()),
                prompt: Some("Grade 1-5".into()),
                outcome_type: Some(OutcomeType::Binary),
                metric: Some("accuracy".into()),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(state.setup.prompt.as_deref(), Some("Grade 1-5"));

        state
            .merge(StageOutput::Setup(SetupUpdate {
                model: Some("custom".into()),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(state.setup.prompt, None);
        assert_eq!(state.setup.outcome_type, None);
        assert_eq!(state.setup.metric, None);
    }

    #[test]
    fn test_setup_locked_once_handle_exists() {
        let mut state = SessionState::new();
        state.setup.dataset = Some(dataset());
        state.setup.model = find_model("gpt-4o");
        state.setup.session_handle = Some(SessionHandle::new("csv_1"));

        let err = state
            .merge(StageOutput::Setup(SetupUpdate {
                model: Some("gpt-4.1".into()),
                ..Default::default()
            }))
            .unwrap_err();
        assert_eq!(err, GateFailure::SetupLocked);

        // Same model again is not a change
        state
            .merge(StageOutput::Setup(SetupUpdate {
                model: Some("gpt-4o".into()),
                skip_assessment: Some(true),
                ..Default::default()
            }))
            .unwrap();
        assert!(state.setup.assessment_skipped);
    }

    #[test]
    fn test_input_change_clears_assessment() {
        let mut state = SessionState::new();
        state.setup.record_assessment(Some(0.9), Vec::new());
        state
            .merge(StageOutput::Setup(SetupUpdate {
                dataset: Some(dataset()),
                ..Default::default()
            }))
            .unwrap();
        assert!(!state.setup.performance_assessed);
        assert_eq!(state.setup.initial_performance, None);
    }

    #[test]
    fn test_unknown_ids_rejected() {
        let mut state = SessionState::new();
        assert_eq!(
            state.merge(StageOutput::Filtering(FilteringUpdate {
                variations: Some(vec!["spelling".into(), "klingon".into()]),
                ..Default::default()
            })),
            Err(GateFailure::UnknownVariation("klingon".into()))
        );
        assert_eq!(
            state.merge(StageOutput::Setup(SetupUpdate {
                metric: Some("auc".into()),
                ..Default::default()
            })),
            Err(GateFailure::UnknownMetric("auc".into()))
        );
    }

    #[test]
    fn test_variations_deduplicated_in_order() {
        let mut state = SessionState::new();
        state
            .merge(StageOutput::Filtering(FilteringUpdate {
                variations: Some(vec!["pio".into(), "spelling".into(), "pio".into()]),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(state.filtering.variation_ids(), vec!["pio", "spelling"]);
    }

    #[test]
    fn test_magnitudes_clamped_and_filtered() {
        let mut state = SessionState::new();
        state.filtering.selected_variations = vec![find_variation("spelling").unwrap()];
        state
            .merge(StageOutput::Magnitudes {
                magnitudes: BTreeMap::from([
                    ("spelling".to_string(), 3),
                    ("pio".to_string(), 40),
                ]),
            })
            .unwrap();
        assert_eq!(state.magnitudes.values.get("spelling"), Some(&10));
        assert!(!state.magnitudes.values.contains_key("pio"));
    }

    #[test]
    fn test_disabling_grouping_clears_column() {
        let mut state = SessionState::new();
        state
            .merge(StageOutput::Grouping(GroupingUpdate {
                use_grouping: Some(true),
                grouping_column: Some(" school ".into()),
                notification_email: Some("   ".into()),
            }))
            .unwrap();
        assert_eq!(state.grouping.grouping_column.as_deref(), Some("school"));
        assert_eq!(state.grouping.notification_email, None);

        state
            .merge(StageOutput::Grouping(GroupingUpdate {
                use_grouping: Some(false),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(state.grouping.grouping_column, None);
    }

    #[test]
    fn test_primary_measure_not_stored_as_additional() {
        let mut state = SessionState::new();
        state
            .merge(StageOutput::Measures(MeasuresUpdate {
                use_additional_measures: Some(true),
                selected_measures: Some(vec![BiasMeasure::Bias0, BiasMeasure::Bias2]),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(state.measures.selected_measures, vec![BiasMeasure::Bias2]);
    }
}
