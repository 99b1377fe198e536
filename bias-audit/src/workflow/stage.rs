//! Wizard stages and their inter-stage data dependencies

use crate::models::SessionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six ordered wizard stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Dataset, model and performance assessment
    Setup,
    /// Score cutoff and variation selection
    Filtering,
    /// Review of sampled variations
    Validation,
    /// Bias measures and moments
    Measures,
    /// Per-variation magnitudes
    Magnitudes,
    /// Grouping, notification and submission
    Grouping,
}

impl Stage {
    pub const FIRST: Stage = Stage::Setup;
    pub const LAST: Stage = Stage::Grouping;

    pub fn all() -> [Stage; 6] {
        [
            Stage::Setup,
            Stage::Filtering,
            Stage::Validation,
            Stage::Measures,
            Stage::Magnitudes,
            Stage::Grouping,
        ]
    }

    /// Zero-based position
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// One-based position as shown to the user
    pub fn number(&self) -> usize {
        self.index() + 1
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::all().get(self.index() + 1).copied()
    }

    pub fn previous(&self) -> Option<Stage> {
        self.index().checked_sub(1).map(|i| Stage::all()[i])
    }

    pub fn title(&self) -> &'static str {
        match self {
            Stage::Setup => "Setup",
            Stage::Filtering => "Data Filtering",
            Stage::Validation => "Variation Validation",
            Stage::Measures => "Bias Measures",
            Stage::Magnitudes => "Magnitudes",
            Stage::Grouping => "Grouping",
        }
    }

    /// Data this stage needs from earlier stages before it can be entered
    pub fn dependencies(&self) -> &'static [DataDependency] {
        match self {
            Stage::Validation => &[DataDependency::SessionHandle, DataDependency::SelectedVariations],
            Stage::Magnitudes => &[DataDependency::SelectedVariations],
            Stage::Grouping => &[DataDependency::Dataset, DataDependency::SessionHandle],
            _ => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.title())
    }
}

/// Piece of state produced by one stage and consumed by a later one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDependency {
    SessionHandle,
    Dataset,
    SelectedVariations,
}

impl DataDependency {
    pub fn is_satisfied(&self, state: &SessionState) -> bool {
        match self {
            DataDependency::SessionHandle => state.setup.session_handle.is_some(),
            DataDependency::Dataset => state.setup.dataset.is_some(),
            DataDependency::SelectedVariations => !state.filtering.selected_variations.is_empty(),
        }
    }
}

impl fmt::Display for DataDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataDependency::SessionHandle => write!(f, "a backend session handle"),
            DataDependency::Dataset => write!(f, "an uploaded dataset"),
            DataDependency::SelectedVariations => write!(f, "at least one selected variation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_bounds() {
        assert_eq!(Stage::Setup.previous(), None);
        assert_eq!(Stage::Grouping.next(), None);
        assert_eq!(Stage::Filtering.next(), Some(Stage::Validation));
        assert_eq!(Stage::Validation.previous(), Some(Stage::Filtering));
        assert_eq!(Stage::Magnitudes.number(), 5);
    }

    #[test]
    fn test_validation_depends_on_handle() {
        let mut state = SessionState::new();
        let deps = Stage::Validation.dependencies();
        assert!(deps.contains(&DataDependency::SessionHandle));
        assert!(!DataDependency::SessionHandle.is_satisfied(&state));

        state.setup.session_handle = Some("csv_1".into());
        assert!(DataDependency::SessionHandle.is_satisfied(&state));
    }
}
