//! Stage gates
//!
//! One pure predicate per stage. Each returns the first field that blocks
//! forward navigation; none of them touch the network or mutate state.

use crate::error::GateFailure;
use crate::models::{Moment, ModelArtifact, SessionState};
use crate::workflow::Stage;

/// Run the gate for `stage` against `state`
pub fn validate(stage: Stage, state: &SessionState) -> Result<(), GateFailure> {
    match stage {
        Stage::Setup => validate_setup(state),
        Stage::Filtering => validate_filtering(state),
        Stage::Validation => validate_validation(state),
        Stage::Measures => validate_measures(state),
        Stage::Magnitudes => validate_magnitudes(state),
        Stage::Grouping => validate_grouping(state),
    }
}

/// Setup inputs sufficient to talk to the backend
///
/// The full setup gate minus the assessment requirement. Assessment and
/// skipping are only offered once this passes.
pub fn setup_inputs_ready(state: &SessionState) -> Result<(), GateFailure> {
    let setup = &state.setup;
    let dataset = setup.dataset.as_ref().ok_or(GateFailure::MissingDataset)?;
    let model = setup.model.as_ref().ok_or(GateFailure::MissingModel)?;

    match model.requires {
        Some(ModelArtifact::Prompt) => {
            let has_prompt = setup
                .prompt
                .as_deref()
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false);
            if !has_prompt {
                return Err(GateFailure::MissingPrompt(model.id.clone()));
            }
        }
        Some(ModelArtifact::CustomScript) => {
            if setup.custom_script.is_none() {
                return Err(GateFailure::MissingCustomScript(model.id.clone()));
            }
        }
        None => {}
    }

    if dataset.has_ground_truth() {
        setup.outcome_type.ok_or(GateFailure::MissingOutcomeType)?;
        setup.metric.as_ref().ok_or(GateFailure::MissingMetric)?;
    }

    // Applicability is checked whenever both are present
    if let (Some(outcome), Some(metric)) = (setup.outcome_type, setup.metric.as_ref()) {
        if !metric.applies_to(outcome) {
            return Err(GateFailure::MetricNotApplicable {
                metric: metric.id.clone(),
                outcome: outcome.to_string(),
            });
        }
    }

    Ok(())
}

pub fn validate_setup(state: &SessionState) -> Result<(), GateFailure> {
    setup_inputs_ready(state)?;
    let setup = &state.setup;
    if !(setup.performance_assessed || setup.assessment_skipped) {
        return Err(GateFailure::AssessmentPending);
    }
    Ok(())
}

pub fn validate_filtering(state: &SessionState) -> Result<(), GateFailure> {
    let filtering = &state.filtering;
    let use_cutoff = filtering
        .use_score_cutoff
        .ok_or(GateFailure::CutoffChoiceMissing)?;

    if use_cutoff {
        let score = filtering
            .cutoff_score
            .ok_or(GateFailure::MissingCutoffScore)?;
        if !score.is_finite() {
            return Err(GateFailure::InvalidCutoffScore(score));
        }
    }

    if filtering.selected_variations.is_empty() {
        return Err(GateFailure::NoVariationsSelected);
    }
    Ok(())
}

/// Any explicit answer passes; a rejection is kept on the state
pub fn validate_validation(state: &SessionState) -> Result<(), GateFailure> {
    state
        .validation
        .variations_accepted
        .map(|_| ())
        .ok_or(GateFailure::ValidationChoiceMissing)
}

pub fn validate_measures(state: &SessionState) -> Result<(), GateFailure> {
    let measures = &state.measures;
    measures
        .use_additional_measures
        .ok_or(GateFailure::MeasuresChoiceMissing)?;

    if measures.use_higher_moments
        && measures.selected_moments.contains(&Moment::Skewness)
        && !measures.selected_moments.contains(&Moment::Variance)
    {
        return Err(GateFailure::SkewnessWithoutVariance);
    }
    Ok(())
}

/// Every selected variation resolves to a magnitude, so only selection matters
pub fn validate_magnitudes(state: &SessionState) -> Result<(), GateFailure> {
    if state.filtering.selected_variations.is_empty() {
        return Err(GateFailure::NoVariationsSelected);
    }
    Ok(())
}

pub fn validate_grouping(state: &SessionState) -> Result<(), GateFailure> {
    let grouping = &state.grouping;
    let use_grouping = grouping
        .use_grouping
        .ok_or(GateFailure::GroupingChoiceMissing)?;

    if use_grouping {
        let column = grouping
            .grouping_column
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(GateFailure::MissingGroupingColumn)?;
        if let Some(dataset) = &state.setup.dataset {
            if !dataset.has_column(column) {
                return Err(GateFailure::UnknownGroupingColumn(column.to_string()));
            }
        }
    }

    if let Some(address) = &grouping.notification_email {
        if !looks_like_address(address) {
            return Err(GateFailure::InvalidNotificationAddress(address.clone()));
        }
    }
    Ok(())
}

fn looks_like_address(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !address.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty())
            .unwrap_or(false)
}
