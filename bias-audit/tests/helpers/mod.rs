//! Test Helper Utilities
//!
//! Shared fixtures for bias-audit integration tests

#![allow(dead_code)]

pub mod mock_backend;

pub use mock_backend::{Op, ScriptedBackend};

use bias_audit::models::{BiasMeasure, Dataset, MeasurementRow};
use bias_audit::workflow::{
    Advance, FilteringUpdate, GroupingUpdate, MeasuresUpdate, SetupUpdate, Stage, StageOutput,
    ValidationUpdate, WorkflowController, WorkflowSettings,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Essays without a `true_grade` column
pub fn dataset_without_ground_truth() -> Dataset {
    Dataset::from_csv_bytes(
        "essays.csv",
        b"text,school\nThe cat sat.,north\nA dog ran.,south\n".to_vec(),
    )
    .unwrap()
}

/// Essays carrying a `true_grade` column
pub fn dataset_with_ground_truth() -> Dataset {
    Dataset::from_csv_bytes(
        "graded.csv",
        b"text,true_grade,school\nThe cat sat.,1,north\nA dog ran.,0,south\n".to_vec(),
    )
    .unwrap()
}

pub fn prompt_setup(dataset: Dataset) -> SetupUpdate {
    SetupUpdate {
        dataset: Some(dataset),
        model: Some("gpt-4o".to_string()),
        prompt: Some("Grade the essay from 1 to 5".to_string()),
        ..Default::default()
    }
}

pub fn filtering(variations: &[&str]) -> StageOutput {
    StageOutput::Filtering(FilteringUpdate {
        use_score_cutoff: Some(false),
        cutoff_score: None,
        variations: Some(variations.iter().map(|v| v.to_string()).collect()),
    })
}

pub fn accept() -> StageOutput {
    StageOutput::Validation(ValidationUpdate {
        variations_accepted: Some(true),
    })
}

pub fn primary_only() -> StageOutput {
    StageOutput::Measures(MeasuresUpdate {
        use_additional_measures: Some(false),
        ..Default::default()
    })
}

pub fn default_magnitudes() -> StageOutput {
    StageOutput::Magnitudes {
        magnitudes: BTreeMap::new(),
    }
}

pub fn no_grouping() -> StageOutput {
    StageOutput::Grouping(GroupingUpdate {
        use_grouping: Some(false),
        ..Default::default()
    })
}

pub fn measurement_row(variation: &str, bias_0: f64) -> MeasurementRow {
    MeasurementRow {
        index: Some(0),
        variation: variation.to_string(),
        magnitude: 50,
        original_grade: 4.0,
        perturbed_grade: 4.0 + bias_0,
        difference: bias_0,
        bias_0,
        additional: BTreeMap::from([(BiasMeasure::Bias1, bias_0.abs() / 2.0)]),
        group: None,
        original_text: None,
        perturbed_text: None,
    }
}

pub fn controller(backend: &Arc<ScriptedBackend>) -> WorkflowController<ScriptedBackend> {
    WorkflowController::new(Arc::clone(backend), WorkflowSettings::default())
}

/// Drive a fresh controller with valid answers until `target` is current
pub async fn advance_to(controller: &WorkflowController<ScriptedBackend>, target: Stage) {
    if target == Stage::Setup {
        return;
    }
    controller
        .edit(StageOutput::Setup(prompt_setup(dataset_without_ground_truth())))
        .unwrap();
    controller.skip_assessment().unwrap();

    let outputs = [
        StageOutput::empty(Stage::Setup),
        filtering(&["spelling"]),
        accept(),
        primary_only(),
        default_magnitudes(),
    ];
    for output in outputs {
        match controller.advance(output).await.unwrap() {
            Advance::Entered(stage) if stage == target => return,
            Advance::Entered(_) => {}
            Advance::Completed(_) => panic!("audit completed before reaching {}", target),
        }
    }
    panic!("never reached {}", target);
}

/// Poll until the controller reports an outstanding call
pub async fn wait_until_busy(controller: &WorkflowController<ScriptedBackend>) {
    for _ in 0..200 {
        if controller.is_busy() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("controller never became busy");
}
