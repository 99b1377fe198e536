//! Workflow controller
//!
//! Owns the single mutable [`SessionState`] and sequences the six stages.
//! Stages hand in [`StageOutput`] values; the controller merges them into a
//! scratch copy, runs the stage gate, performs the stage's backend calls and
//! only then commits.
//!
//! The state lock is never held across an await. While a backend call is
//! outstanding the issuing stage is marked busy, which blocks edits and
//! repeated advances from that stage. Every continuation re-checks the run
//! epoch and session handle before applying its result; a reset or a retreat
//! in the meantime turns the result stale and it is dropped.

use crate::error::StageError;
use crate::events::{CollaboratorCall, WizardEvent, WizardEventBus, EVENT_CAPACITY};
use crate::models::{AuditResults, SampleKey, SessionHandle, SessionState, VariationSample};
use crate::results;
use crate::services::backend::{
    AuditBackend, BackendError, PerformanceAssessment, SampleRequest,
};
use crate::workflow::update::StageOutput;
use crate::workflow::validators;
use crate::workflow::{DataDependency, Stage};
use bias_audit_common::config::TomlConfig;
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use uuid::Uuid;

/// Tunables for automatic backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Rows drawn when sampling variations for review
    pub sample_size: usize,
    /// Magnitude used when sampling variations for review
    pub sample_magnitude: i64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            sample_size: 5,
            sample_magnitude: 50,
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            sample_size: config.sample_size,
            sample_magnitude: config.sample_magnitude,
        }
    }
}

/// Outcome of a successful [`WorkflowController::advance`]
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Moved to the given stage
    Entered(Stage),
    /// Final stage submitted; the audit finished
    Completed(AuditResults),
}

struct Inner {
    state: SessionState,
    stage: Stage,
    /// Bumped whenever in-flight results must no longer apply
    epoch: u64,
    run_id: Uuid,
    busy: Option<Stage>,
    errors: BTreeMap<Stage, StageError>,
    last_rejection: Option<StageError>,
    finished: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: SessionState::new(),
            stage: Stage::FIRST,
            epoch: 0,
            run_id: Uuid::new_v4(),
            busy: None,
            errors: BTreeMap::new(),
            last_rejection: None,
            finished: false,
        }
    }
}

/// Identifies the run a backend call was issued for
#[derive(Debug, Clone)]
struct Ticket {
    epoch: u64,
    run_id: Uuid,
    handle: Option<SessionHandle>,
}

/// Clears the busy flag when the call's scope ends, unless the run moved on
///
/// Must not be dropped while the state lock is held; use
/// [`BusyGuard::release`] instead.
struct BusyGuard {
    inner: Arc<Mutex<Inner>>,
    epoch: u64,
    armed: bool,
}

impl BusyGuard {
    /// Clear the busy flag through an already-held lock
    fn release(mut self, inner: &mut Inner) {
        if inner.epoch == self.epoch {
            inner.busy = None;
        }
        self.armed = false;
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.epoch == self.epoch {
            inner.busy = None;
        }
    }
}

/// Stage-gated audit wizard
pub struct WorkflowController<B: AuditBackend + ?Sized> {
    backend: Arc<B>,
    inner: Arc<Mutex<Inner>>,
    events: WizardEventBus,
    settings: WorkflowSettings,
}

impl<B: AuditBackend + ?Sized> Clone for WorkflowController<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
            settings: self.settings,
        }
    }
}

impl<B: AuditBackend + ?Sized> WorkflowController<B> {
    pub fn new(backend: Arc<B>, settings: WorkflowSettings) -> Self {
        Self::with_event_bus(backend, settings, WizardEventBus::new(EVENT_CAPACITY))
    }

    pub fn with_event_bus(backend: Arc<B>, settings: WorkflowSettings, events: WizardEventBus) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner::new())),
            events,
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WizardEvent> {
        self.events.subscribe()
    }

    pub fn current_stage(&self) -> Stage {
        self.lock().stage
    }

    pub fn run_id(&self) -> Uuid {
        self.lock().run_id
    }

    /// Read-only copy of the accumulated state
    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn stage_error(&self, stage: Stage) -> Option<StageError> {
        self.lock().errors.get(&stage).cloned()
    }

    pub fn errors(&self) -> BTreeMap<Stage, StageError> {
        self.lock().errors.clone()
    }

    /// Reason the most recent advance or edit was refused
    pub fn last_rejection(&self) -> Option<StageError> {
        self.lock().last_rejection.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn results(&self) -> Option<AuditResults> {
        self.lock().state.results.clone()
    }

    /// Merge an update into the current stage without moving forward
    pub fn edit(&self, output: StageOutput) -> Result<(), StageError> {
        let stage = output.stage();
        let mut inner = self.lock();
        Self::check_current(&inner, stage)?;

        let mut draft = inner.state.clone();
        if let Err(reason) = draft.merge(output) {
            return Err(self.reject(&mut inner, stage, reason.into()));
        }

        inner.state = draft;
        inner.errors.remove(&stage);
        inner.last_rejection = None;
        tracing::debug!(stage = %stage, "Stage inputs updated");
        Ok(())
    }

    /// Merge `output`, gate the current stage and move to the next one
    ///
    /// A failed gate leaves state and stage index untouched apart from the
    /// recorded rejection. Setup creates the backend session if none exists;
    /// Grouping submits the audit. Entering Validation samples variations
    /// unless samples for the same handle and selection are cached; a
    /// sampling failure is recorded on Validation and does not fail the
    /// advance. The returned stage is the one current once sampling settles.
    pub async fn advance(&self, output: StageOutput) -> Result<Advance, StageError> {
        let stage = output.stage();

        let (guard, ticket, mut draft) = {
            let mut inner = self.lock();
            Self::check_current(&inner, stage)?;

            if inner.finished {
                if let Some(results) = &inner.state.results {
                    tracing::debug!("Audit already completed; ignoring repeated submission");
                    return Ok(Advance::Completed(results.clone()));
                }
            }

            let mut draft = inner.state.clone();
            let gate = draft
                .merge(output)
                .and_then(|_| validators::validate(stage, &draft));
            if let Err(reason) = gate {
                return Err(self.reject(&mut inner, stage, reason.into()));
            }

            let guard = self.mark_busy(&mut inner, stage);
            (guard, Self::ticket(&inner), draft)
        };

        let side_effect = match stage {
            Stage::Setup => self.ensure_session(&ticket, &mut draft).await,
            Stage::Grouping => self.submit_audit(&ticket, &mut draft).await,
            _ => Ok(()),
        };

        let entered = {
            let mut inner = self.lock();
            self.check_fresh(&inner, &ticket, stage, None)?;

            if let Err(err) = side_effect {
                return Err(self.reject(&mut inner, stage, err));
            }

            if let Some(next) = stage.next() {
                if let Some(missing) = next
                    .dependencies()
                    .iter()
                    .find(|dep| !dep.is_satisfied(&draft))
                {
                    return Err(self.reject(&mut inner, stage, StageError::MissingDependency(*missing)));
                }
            }

            inner.state = draft;
            inner.errors.remove(&stage);
            inner.last_rejection = None;

            match stage.next() {
                Some(next) => {
                    inner.stage = next;
                    tracing::info!(from = %stage, to = %next, "Stage advanced");
                    self.emit_entered(&inner, next);
                    Advance::Entered(next)
                }
                None => {
                    inner.finished = true;
                    let results = inner
                        .state
                        .results
                        .clone()
                        .ok_or(StageError::MissingDependency(DataDependency::SessionHandle))?;
                    tracing::info!(
                        session = %results.audit_handle,
                        rows = results.rows.len(),
                        "Audit completed"
                    );
                    self.events.emit_lossy(WizardEvent::AuditCompleted {
                        run_id: inner.run_id,
                        audit_handle: results.audit_handle.clone(),
                        rows: results.rows.len(),
                        timestamp: Utc::now(),
                    });
                    Advance::Completed(results)
                }
            }
        };
        drop(guard);

        if entered == Advance::Entered(Stage::Validation) {
            if let Err(err) = self.sample_variations(false).await {
                tracing::warn!(error = %err, "Automatic variation sampling failed");
            }
            // A retreat during sampling moves the wizard back
            return Ok(Advance::Entered(self.current_stage()));
        }
        Ok(entered)
    }

    /// Step back one stage, keeping collected data
    ///
    /// Returning to Filtering withdraws the Validation acceptance. Any call
    /// still in flight is abandoned and its result discarded.
    pub fn retreat(&self) -> Stage {
        let mut inner = self.lock();
        let Some(previous) = inner.stage.previous() else {
            return inner.stage;
        };

        if let Some(busy) = inner.busy.take() {
            inner.epoch += 1;
            tracing::warn!(stage = %busy, "Navigated away from a pending backend call");
        }

        if previous == Stage::Filtering {
            inner.state.validation.variations_accepted = None;
        }
        inner.finished = false;
        inner.stage = previous;
        tracing::info!(to = %previous, "Stage retreated");
        self.emit_entered(&inner, previous);
        previous
    }

    /// Abandon the run and start over with empty state
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous_run_id = inner.run_id;
        let epoch = inner.epoch + 1;
        *inner = Inner::new();
        inner.epoch = epoch;

        tracing::info!(previous_run = %previous_run_id, run = %inner.run_id, "Audit run reset");
        self.events.emit_lossy(WizardEvent::RunReset {
            previous_run_id,
            run_id: inner.run_id,
            timestamp: Utc::now(),
        });
    }

    /// Grade a sample with the selected model and record the metric
    ///
    /// The first handle the backend issues becomes the run's session handle.
    /// A later assessment never replaces it.
    pub async fn assess_performance(&self) -> Result<PerformanceAssessment, StageError> {
        let stage = Stage::Setup;
        let (guard, ticket, request) = {
            let mut inner = self.lock();
            Self::check_current(&inner, stage)?;
            if let Err(reason) = validators::setup_inputs_ready(&inner.state) {
                return Err(self.reject(&mut inner, stage, reason.into()));
            }
            let request = inner
                .state
                .session_request()
                .ok_or(StageError::MissingDependency(DataDependency::Dataset))?;
            let guard = self.mark_busy(&mut inner, stage);
            (guard, Self::ticket(&inner), request)
        };

        let result = self
            .observe(&ticket, stage, CollaboratorCall::AssessPerformance, self.backend.assess_performance(&request))
            .await;

        let mut inner = self.lock();
        self.check_fresh(&inner, &ticket, stage, Some(CollaboratorCall::AssessPerformance))?;
        guard.release(&mut inner);

        let assessment = match result {
            Ok(assessment) => assessment,
            Err(e) => return Err(self.reject(&mut inner, stage, e.into())),
        };

        let setup = &mut inner.state.setup;
        match &setup.session_handle {
            None => setup.session_handle = Some(assessment.session_handle.clone()),
            Some(existing) if *existing != assessment.session_handle => {
                tracing::warn!(
                    session = %existing,
                    discarded = %assessment.session_handle,
                    "Assessment returned a different session handle; keeping the original"
                );
            }
            Some(_) => {}
        }
        setup.record_assessment(assessment.metric_value, assessment.samples.clone());

        tracing::info!(
            metric = ?assessment.metric,
            value = ?assessment.metric_value,
            satisfactory = ?setup.performance_satisfactory,
            "Performance assessed"
        );
        inner.errors.remove(&stage);
        Ok(assessment)
    }

    /// Proceed without a performance assessment
    pub fn skip_assessment(&self) -> Result<(), StageError> {
        let stage = Stage::Setup;
        let mut inner = self.lock();
        Self::check_current(&inner, stage)?;
        if let Err(reason) = validators::setup_inputs_ready(&inner.state) {
            return Err(self.reject(&mut inner, stage, reason.into()));
        }

        let setup = &mut inner.state.setup;
        setup.clear_assessment();
        setup.assessment_skipped = true;
        inner.errors.remove(&stage);
        tracing::info!("Performance assessment skipped");
        Ok(())
    }

    /// Fetch perturbed renderings of a few dataset rows for review
    ///
    /// Cached samples for the same handle and variation selection are reused
    /// unless `force` is set. Forced resampling withdraws any earlier
    /// acceptance.
    pub async fn sample_variations(&self, force: bool) -> Result<Vec<VariationSample>, StageError> {
        let stage = Stage::Validation;
        let (guard, ticket, key) = {
            let mut inner = self.lock();
            Self::check_current(&inner, stage)?;

            let key = match Self::sample_key(&inner.state) {
                Ok(key) => key,
                Err(missing) => {
                    return Err(self.reject(&mut inner, stage, StageError::MissingDependency(missing)))
                }
            };
            if !force && inner.state.validation.has_samples_for(&key) {
                tracing::debug!(session = %key.handle, "Reusing cached variation samples");
                return Ok(inner.state.validation.samples.clone());
            }

            let guard = self.mark_busy(&mut inner, stage);
            (guard, Self::ticket(&inner), key)
        };

        let request = SampleRequest {
            session_id: key.handle.clone(),
            variation_types: key.variation_ids.clone(),
            sample_size: self.settings.sample_size,
            magnitude: self.settings.sample_magnitude,
        };
        let result = self
            .observe(&ticket, stage, CollaboratorCall::SampleVariations, self.backend.sample_variations(&request))
            .await;

        let mut inner = self.lock();
        self.check_fresh(&inner, &ticket, stage, Some(CollaboratorCall::SampleVariations))?;
        guard.release(&mut inner);

        let samples = match result {
            Ok(samples) => samples,
            Err(e) => return Err(self.reject(&mut inner, stage, e.into())),
        };

        let validation = &mut inner.state.validation;
        validation.samples = samples.clone();
        validation.sampled_for = Some(key);
        if force {
            validation.variations_accepted = None;
        }
        inner.errors.remove(&stage);
        tracing::info!(rows = samples.len(), "Variation samples received");
        Ok(samples)
    }

    fn sample_key(state: &SessionState) -> Result<SampleKey, DataDependency> {
        let handle = state
            .setup
            .session_handle
            .clone()
            .ok_or(DataDependency::SessionHandle)?;
        let variation_ids = state.filtering.variation_ids();
        if variation_ids.is_empty() {
            return Err(DataDependency::SelectedVariations);
        }
        Ok(SampleKey {
            handle,
            variation_ids,
        })
    }

    async fn ensure_session(&self, ticket: &Ticket, draft: &mut SessionState) -> Result<(), StageError> {
        if draft.setup.session_handle.is_some() {
            return Ok(());
        }
        let request = draft
            .session_request()
            .ok_or(StageError::MissingDependency(DataDependency::Dataset))?;
        let handle = self
            .observe(ticket, Stage::Setup, CollaboratorCall::CreateSession, self.backend.create_session(&request))
            .await?;
        tracing::info!(session = %handle, "Backend session created");
        draft.setup.session_handle = Some(handle);
        Ok(())
    }

    async fn submit_audit(&self, ticket: &Ticket, draft: &mut SessionState) -> Result<(), StageError> {
        let submission = draft
            .audit_submission()
            .ok_or(StageError::MissingDependency(DataDependency::Dataset))?;
        let response = self
            .observe(ticket, Stage::Grouping, CollaboratorCall::RunAudit, self.backend.run_audit(&submission))
            .await?;
        draft.results = Some(results::assemble(response));
        Ok(())
    }

    /// Time a backend call and bracket it with start/finish events
    async fn observe<T>(
        &self,
        ticket: &Ticket,
        stage: Stage,
        call: CollaboratorCall,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        self.events.emit_lossy(WizardEvent::CollaboratorCallStarted {
            run_id: ticket.run_id,
            stage,
            call,
            timestamp: Utc::now(),
        });
        let started = Instant::now();
        let result = fut.await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => tracing::debug!(stage = %stage, call = %call, duration_ms, "Backend call finished"),
            Err(e) => tracing::error!(stage = %stage, call = %call, duration_ms, error = %e, "Backend call failed"),
        }
        self.events.emit_lossy(WizardEvent::CollaboratorCallFinished {
            run_id: ticket.run_id,
            stage,
            call,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });
        result
    }

    fn check_current(inner: &Inner, stage: Stage) -> Result<(), StageError> {
        if inner.stage != stage {
            return Err(StageError::WrongStage {
                expected: inner.stage,
                got: stage,
            });
        }
        if let Some(busy) = inner.busy {
            return Err(StageError::Busy(busy));
        }
        Ok(())
    }

    fn check_fresh(
        &self,
        inner: &Inner,
        ticket: &Ticket,
        stage: Stage,
        call: Option<CollaboratorCall>,
    ) -> Result<(), StageError> {
        if inner.epoch == ticket.epoch && inner.state.setup.session_handle == ticket.handle {
            return Ok(());
        }
        tracing::warn!(stage = %stage, "Discarding result for a superseded audit session");
        if let Some(call) = call.or(Self::call_for(stage)) {
            self.events.emit_lossy(WizardEvent::StaleResultDiscarded {
                run_id: ticket.run_id,
                stage,
                call,
                timestamp: Utc::now(),
            });
        }
        Err(StageError::Stale)
    }

    fn call_for(stage: Stage) -> Option<CollaboratorCall> {
        match stage {
            Stage::Setup => Some(CollaboratorCall::CreateSession),
            Stage::Grouping => Some(CollaboratorCall::RunAudit),
            _ => None,
        }
    }

    fn ticket(inner: &Inner) -> Ticket {
        Ticket {
            epoch: inner.epoch,
            run_id: inner.run_id,
            handle: inner.state.setup.session_handle.clone(),
        }
    }

    fn mark_busy(&self, inner: &mut Inner, stage: Stage) -> BusyGuard {
        inner.busy = Some(stage);
        BusyGuard {
            inner: Arc::clone(&self.inner),
            epoch: inner.epoch,
            armed: true,
        }
    }

    /// Attach an error to its stage and announce it
    fn reject(&self, inner: &mut Inner, stage: Stage, error: StageError) -> StageError {
        match &error {
            StageError::Gate(reason) => {
                tracing::warn!(stage = %stage, reason = %reason, "Stage gate rejected")
            }
            other => tracing::error!(stage = %stage, error = %other, "Stage action failed"),
        }
        inner.errors.insert(stage, error.clone());
        inner.last_rejection = Some(error.clone());
        self.events.emit_lossy(WizardEvent::StageRejected {
            run_id: inner.run_id,
            stage,
            error: error.clone(),
            timestamp: Utc::now(),
        });
        error
    }

    fn emit_entered(&self, inner: &Inner, stage: Stage) {
        self.events.emit_lossy(WizardEvent::StageEntered {
            run_id: inner.run_id,
            stage,
            snapshot: Arc::new(inner.state.clone()),
            timestamp: Utc::now(),
        });
    }
}
