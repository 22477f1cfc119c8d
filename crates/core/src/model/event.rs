use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::flow::Pace;
use crate::model::{ActivityId, StepData};

/// What the completing page asks the engine to do with the position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "page", rename_all = "snake_case")]
pub enum TransitionRequest {
    /// Move on: a matching branch rule, otherwise the next page.
    #[default]
    Advance,
    /// Return to the previous page. Overrides every other flag.
    Back,
    /// Skip to a given page (clamped into the unit).
    JumpTo(u32),
}

/// Payload a page emits through `on_step_complete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Page that emitted the event. Events from any other page are stale.
    pub page: u32,
    #[serde(default)]
    pub request: TransitionRequest,
    /// Set by the final page to mark the whole unit as done.
    #[serde(default)]
    pub completes_unit: bool,
    /// Ask branch rules to take the alternate path.
    #[serde(default)]
    pub alternate_branch: bool,
    /// Activity on this page that is now fully complete.
    #[serde(default)]
    pub activity: Option<ActivityId>,
    /// Page-specific named flags such as `skippedSurvey` or `gameCompleted`.
    #[serde(default)]
    pub signals: BTreeSet<String>,
    /// Overrides the delay of a sequential advance.
    #[serde(default)]
    pub pace: Option<Pace>,
    /// Facts to merge into the session's step data before moving.
    #[serde(default)]
    pub step_data: StepData,
}

impl TransitionEvent {
    #[must_use]
    pub fn advance(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn back(page: u32) -> Self {
        Self {
            page,
            request: TransitionRequest::Back,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn jump(page: u32, target: u32) -> Self {
        Self {
            page,
            request: TransitionRequest::JumpTo(target),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completing(mut self) -> Self {
        self.completes_unit = true;
        self
    }

    #[must_use]
    pub fn alternate(mut self) -> Self {
        self.alternate_branch = true;
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signals.insert(signal.into());
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity: impl Into<ActivityId>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    #[must_use]
    pub fn paced(mut self, pace: Pace) -> Self {
        self.pace = Some(pace);
        self
    }

    #[must_use]
    pub fn with_step_data(mut self, patch: StepData) -> Self {
        self.step_data.merge(patch);
        self
    }

    #[must_use]
    pub fn has_signal(&self, signal: &str) -> bool {
        self.signals.contains(signal)
    }
}
