//! Wizard events broadcast by the workflow controller

use crate::error::StageError;
use crate::models::{SessionHandle, SessionState};
use crate::workflow::Stage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub type WizardEventBus = bias_audit_common::events::EventBus<WizardEvent>;

/// Default broadcast capacity for a wizard run
pub const EVENT_CAPACITY: usize = 64;

/// Backend operation a stage issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorCall {
    CreateSession,
    AssessPerformance,
    SampleVariations,
    RunAudit,
}

impl std::fmt::Display for CollaboratorCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollaboratorCall::CreateSession => "create_session",
            CollaboratorCall::AssessPerformance => "assess_performance",
            CollaboratorCall::SampleVariations => "sample_variations",
            CollaboratorCall::RunAudit => "run_audit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum WizardEvent {
    /// A stage was entered; carries the merged state it reads from
    StageEntered {
        run_id: Uuid,
        stage: Stage,
        snapshot: Arc<SessionState>,
        timestamp: DateTime<Utc>,
    },

    StageRejected {
        run_id: Uuid,
        stage: Stage,
        error: StageError,
        timestamp: DateTime<Utc>,
    },

    CollaboratorCallStarted {
        run_id: Uuid,
        stage: Stage,
        call: CollaboratorCall,
        timestamp: DateTime<Utc>,
    },

    CollaboratorCallFinished {
        run_id: Uuid,
        stage: Stage,
        call: CollaboratorCall,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A call completed after the run it belonged to was reset or re-keyed
    StaleResultDiscarded {
        run_id: Uuid,
        stage: Stage,
        call: CollaboratorCall,
        timestamp: DateTime<Utc>,
    },

    AuditCompleted {
        run_id: Uuid,
        audit_handle: SessionHandle,
        rows: usize,
        timestamp: DateTime<Utc>,
    },

    RunReset {
        previous_run_id: Uuid,
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl WizardEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            WizardEvent::StageEntered { run_id, .. }
            | WizardEvent::StageRejected { run_id, .. }
            | WizardEvent::CollaboratorCallStarted { run_id, .. }
            | WizardEvent::CollaboratorCallFinished { run_id, .. }
            | WizardEvent::StaleResultDiscarded { run_id, .. }
            | WizardEvent::AuditCompleted { run_id, .. }
            | WizardEvent::RunReset { run_id, .. } => *run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            WizardEvent::StageEntered { .. } => "StageEntered",
            WizardEvent::StageRejected { .. } => "StageRejected",
            WizardEvent::CollaboratorCallStarted { .. } => "CollaboratorCallStarted",
            WizardEvent::CollaboratorCallFinished { .. } => "CollaboratorCallFinished",
            WizardEvent::StaleResultDiscarded { .. } => "StaleResultDiscarded",
            WizardEvent::AuditCompleted { .. } => "AuditCompleted",
            WizardEvent::RunReset { .. } => "RunReset",
        }
    }
}
