//! Stage-gated audit workflow

pub mod controller;
pub mod stage;
pub mod update;
pub mod validators;

pub use controller::{Advance, WorkflowController, WorkflowSettings};
pub use stage::{DataDependency, Stage};
pub use update::{
    FilteringUpdate, GroupingUpdate, MeasuresUpdate, SetupUpdate, StageOutput, ValidationUpdate,
};
