//! bias-audit library
//!
//! A six-stage wizard that configures, validates and submits a bias audit of
//! an automated essay-grading model, then post-processes the results.
//!
//! - [`workflow`]: stage sequencing, gates and the controller
//! - [`services`]: the scoring backend contract and its HTTP client
//! - [`results`]: column projection, density curves, moments and export
//! - [`plan`]: unattended runs driven by a TOML answer file

pub mod error;
pub mod events;
pub mod models;
pub mod plan;
pub mod results;
pub mod services;
pub mod workflow;

pub use error::{GateFailure, StageError};
pub use events::{WizardEvent, WizardEventBus};
pub use models::{AuditResults, SessionHandle, SessionState};
pub use plan::WizardPlan;
pub use services::{AuditBackend, BackendError, HttpBackend, ResultsService};
pub use workflow::{Advance, Stage, StageOutput, WorkflowController, WorkflowSettings};
