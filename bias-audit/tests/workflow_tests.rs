//! Workflow controller integration tests
//!
//! Drive the six-stage wizard against the scripted backend.

mod helpers;

use bias_audit::error::{GateFailure, StageError};
use bias_audit::events::WizardEvent;
use bias_audit::models::{BiasMeasure, Moment, OutcomeType, SessionHandle};
use bias_audit::services::{BackendError, ResultsService};
use bias_audit::workflow::{
    validators, Advance, FilteringUpdate, GroupingUpdate, MeasuresUpdate, SetupUpdate, Stage,
    StageOutput, ValidationUpdate,
};
use bias_audit::WizardPlan;
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

// no ground truth means no outcome type or metric is required

#[tokio::test]
async fn setup_without_ground_truth_needs_no_metric() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);

    controller
        .edit(StageOutput::Setup(prompt_setup(dataset_without_ground_truth())))
        .unwrap();
    assert!(validators::setup_inputs_ready(&controller.snapshot()).is_ok());

    let err = controller.advance(StageOutput::empty(Stage::Setup)).await.unwrap_err();
    assert_eq!(err, StageError::Gate(GateFailure::AssessmentPending));

    controller.skip_assessment().unwrap();
    let advanced = controller.advance(StageOutput::empty(Stage::Setup)).await.unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Filtering));
    assert_eq!(backend.calls(Op::CreateSession), 1);
    assert_eq!(
        controller.snapshot().setup.session_handle,
        Some(SessionHandle::new("csv_1"))
    );
}

#[tokio::test]
async fn setup_with_ground_truth_requires_outcome_and_metric() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);

    controller
        .edit(StageOutput::Setup(prompt_setup(dataset_with_ground_truth())))
        .unwrap();
    assert_eq!(
        controller.skip_assessment(),
        Err(StageError::Gate(GateFailure::MissingOutcomeType))
    );

    controller
        .edit(StageOutput::Setup(SetupUpdate {
            outcome_type: Some(OutcomeType::Continuous),
            metric: Some("accuracy".to_string()),
            ..Default::default()
        }))
        .unwrap();
    assert!(matches!(
        controller.skip_assessment(),
        Err(StageError::Gate(GateFailure::MetricNotApplicable { .. }))
    ));

    controller
        .edit(StageOutput::Setup(SetupUpdate {
            outcome_type: Some(OutcomeType::Binary),
            ..Default::default()
        }))
        .unwrap();
    controller.skip_assessment().unwrap();
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn assessment_records_metric_and_keeps_first_handle() {
    let backend = Arc::new(ScriptedBackend::new().with_metric_value(Some(0.65)));
    let controller = controller(&backend);

    controller
        .edit(StageOutput::Setup(SetupUpdate {
            outcome_type: Some(OutcomeType::Binary),
            metric: Some("f1".to_string()),
            ..prompt_setup(dataset_with_ground_truth())
        }))
        .unwrap();

    let assessment = controller.assess_performance().await.unwrap();
    assert_eq!(assessment.metric.as_deref(), Some("f1"));

    let setup = controller.snapshot().setup;
    assert_eq!(setup.initial_performance, Some(0.65));
    assert_eq!(setup.performance_satisfactory, Some(false));
    assert!(setup.performance_assessed);
    assert_eq!(setup.session_handle, Some(SessionHandle::new("csv_1")));

    // A second assessment issues a new handle that must not replace the first
    controller.assess_performance().await.unwrap();
    assert_eq!(
        controller.snapshot().setup.session_handle,
        Some(SessionHandle::new("csv_1"))
    );

    // Below the threshold, yet Setup still completes
    controller.advance(StageOutput::empty(Stage::Setup)).await.unwrap();
    assert_eq!(backend.calls(Op::CreateSession), 0);
    assert_eq!(backend.calls(Op::AssessPerformance), 2);
}

#[tokio::test]
async fn setup_is_locked_once_a_session_exists() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Filtering).await;
    controller.retreat();

    let err = controller
        .edit(StageOutput::Setup(SetupUpdate {
            prompt: Some("A different prompt".to_string()),
            ..Default::default()
        }))
        .unwrap_err();
    assert_eq!(err, StageError::Gate(GateFailure::SetupLocked));
}

// a cutoff score is only required when the cutoff is enabled

#[tokio::test]
async fn cutoff_score_required_only_when_enabled() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Filtering).await;

    controller.edit(filtering(&["spelling", "pio"])).unwrap();
    assert!(validators::validate_filtering(&controller.snapshot()).is_ok());
    let before = controller.snapshot();

    let err = controller
        .advance(StageOutput::Filtering(FilteringUpdate {
            use_score_cutoff: Some(true),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(err, StageError::Gate(GateFailure::MissingCutoffScore));
    assert_eq!(controller.current_stage(), Stage::Filtering);
    assert_eq!(controller.snapshot(), before);

    let advanced = controller
        .advance(StageOutput::Filtering(FilteringUpdate {
            use_score_cutoff: Some(true),
            cutoff_score: Some(75.0),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Validation));
    assert_eq!(controller.snapshot().filtering.effective_cutoff(), Some(75.0));
}

#[tokio::test]
async fn rejected_gate_leaves_state_untouched() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    let mut events = controller.subscribe();
    let before = controller.snapshot();

    let err = controller
        .advance(StageOutput::Setup(SetupUpdate {
            model: Some("gpt-4o".to_string()),
            ..Default::default()
        }))
        .await
        .unwrap_err();

    assert_eq!(err, StageError::Gate(GateFailure::MissingDataset));
    assert_eq!(controller.snapshot(), before);
    assert_eq!(controller.current_stage(), Stage::Setup);
    assert_eq!(controller.stage_error(Stage::Setup), Some(err.clone()));
    assert_eq!(controller.last_rejection(), Some(err));
    assert_eq!(backend.total_calls(), 0);

    match events.try_recv().unwrap() {
        WizardEvent::StageRejected { stage, .. } => assert_eq!(stage, Stage::Setup),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn unknown_variation_is_rejected() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Filtering).await;

    let err = controller.advance(filtering(&["typos"])).await.unwrap_err();
    assert_eq!(
        err,
        StageError::Gate(GateFailure::UnknownVariation("typos".to_string()))
    );
    assert!(controller.snapshot().filtering.selected_variations.is_empty());
}

#[tokio::test]
async fn entering_validation_samples_variations_once() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Validation).await;

    assert_eq!(backend.calls(Op::SampleVariations), 1);
    let request = backend.sample_requests.lock().unwrap()[0].clone();
    assert_eq!(request.session_id, SessionHandle::new("csv_1"));
    assert_eq!(request.variation_types, vec!["spelling".to_string()]);
    assert_eq!(request.sample_size, 5);
    assert_eq!(request.magnitude, 50);
    assert_eq!(controller.snapshot().validation.samples.len(), 5);

    // Cached for the same handle and selection
    controller.sample_variations(false).await.unwrap();
    assert_eq!(backend.calls(Op::SampleVariations), 1);

    controller.edit(accept()).unwrap();
    controller.sample_variations(true).await.unwrap();
    assert_eq!(backend.calls(Op::SampleVariations), 2);
    assert_eq!(controller.snapshot().validation.variations_accepted, None);
}

#[tokio::test]
async fn sampling_failure_is_recorded_and_retryable() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.fail_next(Op::SampleVariations, BackendError::Network("connection reset".to_string()));
    let controller = controller(&backend);

    advance_to(&controller, Stage::Validation).await;
    assert_eq!(controller.current_stage(), Stage::Validation);
    let recorded = controller.stage_error(Stage::Validation).unwrap();
    assert!(matches!(recorded, StageError::Collaborator(BackendError::Network(_))));
    assert!(recorded.is_retryable());
    assert!(controller.snapshot().validation.samples.is_empty());

    let samples = controller.sample_variations(false).await.unwrap();
    assert_eq!(samples.len(), 5);
    assert_eq!(controller.stage_error(Stage::Validation), None);
}

#[tokio::test]
async fn rejected_variations_still_advance() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Validation).await;

    let err = controller
        .advance(StageOutput::empty(Stage::Validation))
        .await
        .unwrap_err();
    assert_eq!(err, StageError::Gate(GateFailure::ValidationChoiceMissing));

    let advanced = controller
        .advance(StageOutput::Validation(ValidationUpdate {
            variations_accepted: Some(false),
        }))
        .await
        .unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Measures));
    assert_eq!(controller.snapshot().validation.variations_accepted, Some(false));
}

#[tokio::test]
async fn retreat_then_advance_restores_stage() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Measures).await;

    assert_eq!(controller.retreat(), Stage::Validation);
    assert_eq!(controller.snapshot().validation.variations_accepted, Some(true));
    assert_eq!(controller.retreat(), Stage::Filtering);
    assert_eq!(controller.snapshot().validation.variations_accepted, None);

    let advanced = controller.advance(StageOutput::empty(Stage::Filtering)).await.unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Validation));
    // Same handle and selection: no new sampling round
    assert_eq!(backend.calls(Op::SampleVariations), 1);

    controller.advance(accept()).await.unwrap();
    assert_eq!(controller.current_stage(), Stage::Measures);
    assert_eq!(backend.calls(Op::CreateSession), 1);
}

#[tokio::test]
async fn resending_untrimmed_setup_after_retreat_is_accepted() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    let raw_setup = || {
        StageOutput::Setup(SetupUpdate {
            prompt: Some("Grade the essay from 1 to 5\n".to_string()),
            rubric: Some(String::new()),
            skip_assessment: Some(true),
            ..prompt_setup(dataset_without_ground_truth())
        })
    };

    let advanced = controller.advance(raw_setup()).await.unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Filtering));
    let before = controller.snapshot().setup;
    assert_eq!(before.prompt.as_deref(), Some("Grade the essay from 1 to 5"));
    assert_eq!(before.rubric, None);

    assert_eq!(controller.retreat(), Stage::Setup);
    let advanced = controller.advance(raw_setup()).await.unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Filtering));
    assert_eq!(controller.snapshot().setup, before);
    assert_eq!(backend.calls(Op::CreateSession), 1);
}

#[tokio::test]
async fn retreat_during_automatic_sampling_reports_current_stage() {
    let backend = Arc::new(
        ScriptedBackend::new().with_delay(Op::SampleVariations, Duration::from_millis(200)),
    );
    let controller = controller(&backend);
    advance_to(&controller, Stage::Filtering).await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.advance(filtering(&["spelling"])).await })
    };
    wait_until_busy(&controller).await;

    assert_eq!(controller.retreat(), Stage::Filtering);
    assert_eq!(pending.await.unwrap(), Ok(Advance::Entered(Stage::Filtering)));
    assert_eq!(controller.current_stage(), Stage::Filtering);
    assert!(controller.snapshot().validation.samples.is_empty());
}

#[tokio::test]
async fn retreat_at_first_stage_is_a_no_op() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    assert_eq!(controller.retreat(), Stage::Setup);
    assert_eq!(controller.current_stage(), Stage::Setup);
}

#[tokio::test]
async fn actions_for_other_stages_are_refused() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);

    let err = controller.advance(accept()).await.unwrap_err();
    assert_eq!(
        err,
        StageError::WrongStage {
            expected: Stage::Setup,
            got: Stage::Validation
        }
    );
    assert!(matches!(
        controller.sample_variations(false).await,
        Err(StageError::WrongStage { .. })
    ));
}

#[tokio::test]
async fn skewness_requires_variance() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Measures).await;

    let err = controller
        .advance(StageOutput::Measures(MeasuresUpdate {
            use_additional_measures: Some(false),
            selected_measures: None,
            use_higher_moments: Some(true),
            selected_moments: Some(vec![Moment::Skewness]),
        }))
        .await
        .unwrap_err();
    assert_eq!(err, StageError::Gate(GateFailure::SkewnessWithoutVariance));
}

#[tokio::test]
async fn grouping_column_must_exist_in_dataset() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Grouping).await;

    let err = controller
        .advance(StageOutput::Grouping(GroupingUpdate {
            use_grouping: Some(true),
            grouping_column: Some("district".to_string()),
            notification_email: None,
        }))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StageError::Gate(GateFailure::UnknownGroupingColumn("district".to_string()))
    );
    assert_eq!(backend.calls(Op::RunAudit), 0);

    let done = controller
        .advance(StageOutput::Grouping(GroupingUpdate {
            use_grouping: Some(true),
            grouping_column: Some("school".to_string()),
            notification_email: Some("auditor@example.org".to_string()),
        }))
        .await
        .unwrap();
    assert!(matches!(done, Advance::Completed(_)));

    let submission = backend.submissions.lock().unwrap()[0].clone();
    assert!(submission.configuration.use_grouping);
    assert_eq!(submission.configuration.grouping_variable.as_deref(), Some("school"));
    assert_eq!(submission.configuration.variation_magnitudes["spelling"], 50);
}

// moments are derived for each variation and magnitude

#[tokio::test]
async fn completed_audit_derives_moments() {
    let rows = vec![
        measurement_row("spelling", -5.0),
        measurement_row("spelling", -7.0),
        measurement_row("spelling", -9.0),
    ];
    let backend = Arc::new(ScriptedBackend::new().with_rows(rows));
    let controller = controller(&backend);
    advance_to(&controller, Stage::Grouping).await;

    let Advance::Completed(results) = controller.advance(no_grouping()).await.unwrap() else {
        panic!("audit did not complete");
    };
    assert_eq!(results.audit_handle, SessionHandle::new("audit_1"));
    assert_eq!(results.rows.len(), 3);
    assert_eq!(results.moments.len(), 1);

    let moments = &results.moments[0];
    assert_eq!(moments.variation, "spelling");
    assert_eq!(moments.stat(BiasMeasure::Bias0, Moment::Mean), Some(-7.0));
    assert!(controller.is_finished());
    assert_eq!(results.summary.total_variations, 1);
    assert_eq!(results.summary.average_grade_change, -7.0);
}

#[tokio::test]
async fn repeated_submission_returns_cached_results() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    advance_to(&controller, Stage::Grouping).await;

    let first = controller.advance(no_grouping()).await.unwrap();
    let second = controller.advance(no_grouping()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.calls(Op::RunAudit), 1);
}

#[tokio::test]
async fn duplicate_submission_while_busy_is_refused() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Op::RunAudit, Duration::from_millis(200)));
    let controller = controller(&backend);
    advance_to(&controller, Stage::Grouping).await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.advance(no_grouping()).await })
    };
    wait_until_busy(&controller).await;

    assert_eq!(
        controller.advance(no_grouping()).await,
        Err(StageError::Busy(Stage::Grouping))
    );
    assert_eq!(
        controller.edit(no_grouping()),
        Err(StageError::Busy(Stage::Grouping))
    );

    let done = pending.await.unwrap().unwrap();
    assert!(matches!(done, Advance::Completed(_)));
    assert_eq!(backend.calls(Op::RunAudit), 1);
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn collaborator_failure_does_not_advance() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.fail_next(
        Op::CreateSession,
        BackendError::Api {
            status: 500,
            message: "grader unavailable".to_string(),
        },
    );
    let controller = controller(&backend);
    controller
        .edit(StageOutput::Setup(prompt_setup(dataset_without_ground_truth())))
        .unwrap();
    controller.skip_assessment().unwrap();

    let err = controller.advance(StageOutput::empty(Stage::Setup)).await.unwrap_err();
    assert!(matches!(err, StageError::Collaborator(BackendError::Api { status: 500, .. })));
    assert_eq!(controller.current_stage(), Stage::Setup);
    assert_eq!(controller.snapshot().setup.session_handle, None);
    assert!(!controller.is_busy());

    let advanced = controller.advance(StageOutput::empty(Stage::Setup)).await.unwrap();
    assert_eq!(advanced, Advance::Entered(Stage::Filtering));
    assert_eq!(controller.stage_error(Stage::Setup), None);
    assert_eq!(backend.calls(Op::CreateSession), 2);
}

#[tokio::test]
async fn result_arriving_after_reset_is_discarded() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Op::CreateSession, Duration::from_millis(200)));
    let controller = controller(&backend);
    let mut events = controller.subscribe();
    controller
        .edit(StageOutput::Setup(prompt_setup(dataset_without_ground_truth())))
        .unwrap();
    controller.skip_assessment().unwrap();
    let first_run = controller.run_id();

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.advance(StageOutput::empty(Stage::Setup)).await })
    };
    wait_until_busy(&controller).await;
    controller.reset();

    assert_eq!(pending.await.unwrap(), Err(StageError::Stale));
    assert_ne!(controller.run_id(), first_run);
    assert_eq!(controller.current_stage(), Stage::Setup);
    assert!(controller.snapshot().setup.dataset.is_none());
    assert!(controller.snapshot().setup.session_handle.is_none());
    assert!(!controller.is_busy());

    let mut saw_reset = false;
    let mut saw_stale = false;
    while let Ok(event) = events.try_recv() {
        match event {
            WizardEvent::RunReset { previous_run_id, .. } => saw_reset = previous_run_id == first_run,
            WizardEvent::StaleResultDiscarded { .. } => saw_stale = true,
            _ => {}
        }
    }
    assert!(saw_reset);
    assert!(saw_stale);
}

#[tokio::test]
async fn retreat_abandons_pending_submission() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Op::RunAudit, Duration::from_millis(200)));
    let controller = controller(&backend);
    advance_to(&controller, Stage::Grouping).await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.advance(no_grouping()).await })
    };
    wait_until_busy(&controller).await;

    assert_eq!(controller.retreat(), Stage::Magnitudes);
    assert!(!controller.is_busy());
    assert_eq!(pending.await.unwrap(), Err(StageError::Stale));
    assert!(controller.results().is_none());
    assert!(!controller.is_finished());
    assert_eq!(controller.current_stage(), Stage::Magnitudes);
}

#[tokio::test]
async fn stage_entered_events_carry_snapshots() {
    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    let mut events = controller.subscribe();
    advance_to(&controller, Stage::Filtering).await;

    let mut entered = None;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id(), controller.run_id());
        if let WizardEvent::StageEntered { stage, snapshot, .. } = event {
            entered = Some((stage, snapshot));
        }
    }
    let (stage, snapshot) = entered.unwrap();
    assert_eq!(stage, Stage::Filtering);
    assert_eq!(snapshot.setup.session_handle, Some(SessionHandle::new("csv_1")));
}

// dataset-only handles never reach the network for result calls

#[tokio::test]
async fn dataset_handle_rejected_for_results_calls() {
    let backend = Arc::new(ScriptedBackend::new());
    let service = ResultsService::new(Arc::clone(&backend));
    let handle = SessionHandle::new("csv_1");

    let texts = vec!["The cat sat.".to_string(); 5];
    assert_eq!(
        service.preview_audit(&handle, texts, "spelling", 50).await,
        Err(StageError::SessionMismatch(handle.clone()))
    );
    assert!(matches!(
        service.fetch_results(&handle).await,
        Err(StageError::SessionMismatch(_))
    ));
    assert!(matches!(
        service.download_results_csv(&handle).await,
        Err(StageError::SessionMismatch(_))
    ));
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn preview_clamps_magnitude_for_audit_handle() {
    let backend = Arc::new(ScriptedBackend::new());
    let service = ResultsService::new(Arc::clone(&backend));
    let handle = SessionHandle::new("audit_1");

    let tables = service
        .preview_audit(&handle, vec!["The cat sat.".to_string(); 5], "pio", 500)
        .await
        .unwrap();
    assert_eq!(tables.bias_table[0]["magnitude"], 100);

    assert_eq!(
        service.preview_audit(&handle, Vec::new(), "typos", 50).await,
        Err(StageError::Gate(GateFailure::UnknownVariation("typos".to_string())))
    );
    assert_eq!(backend.calls(Op::PreviewAudit), 1);

    let results = service.fetch_results(&handle).await.unwrap();
    assert_eq!(results.audit_handle, handle);
    assert_eq!(results.moments.len(), 1);
}

#[tokio::test]
async fn plan_runs_all_stages() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("essays.csv"), "text,school\nThe cat sat.,north\n").unwrap();
    let plan_path = dir.path().join("plan.toml");
    std::fs::write(
        &plan_path,
        r#"
        [setup]
        dataset = "essays.csv"
        model = "gpt-4.1"
        prompt = "Grade the essay"

        [filtering]
        use_score_cutoff = false
        variations = ["spelling", "cognates"]

        [validation]
        accept = true

        [measures]
        use_additional_measures = false

        [magnitudes]
        cognates = 5

        [grouping]
        use_grouping = true
        grouping_column = "school"
        "#,
    )
    .unwrap();

    let backend = Arc::new(ScriptedBackend::new());
    let controller = controller(&backend);
    let plan = WizardPlan::load(&plan_path).unwrap();
    let results = plan.execute(&controller).await.unwrap();

    assert_eq!(results.audit_handle, SessionHandle::new("audit_1"));
    let submission = backend.submissions.lock().unwrap()[0].clone();
    assert_eq!(submission.configuration.variation_magnitudes["cognates"], 10);
    assert_eq!(submission.configuration.variation_magnitudes["spelling"], 50);
    assert_eq!(backend.calls(Op::AssessPerformance), 0);
    assert_eq!(backend.calls(Op::CreateSession), 1);
}
