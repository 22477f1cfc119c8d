use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ActivityId, ModuleId, UnitId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("a unit must have at least one page")]
    NoPages,

    #[error("current page {current} is outside 1..={total}")]
    PageOutOfRange { current: u32, total: u32 },

    #[error("last_updated is before started_at")]
    InvalidTimeRange,
}

//
// ─── PATCH ─────────────────────────────────────────────────────────────────────
//

/// Field-wise overwrite applied by the progress store.
///
/// `None` leaves the field as it is. Collections are replaced, not merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressPatch {
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub completed: Option<bool>,
    pub completed_activities: Option<BTreeSet<ActivityId>>,
}

impl ProgressPatch {
    #[must_use]
    pub fn page(current_page: u32) -> Self {
        Self {
            current_page: Some(current_page),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_total_pages(mut self, total_pages: u32) -> Self {
        self.total_pages = Some(total_pages);
        self
    }

    #[must_use]
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    #[must_use]
    pub fn with_activities(mut self, activities: BTreeSet<ActivityId>) -> Self {
        self.completed_activities = Some(activities);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Where a learner stands in one unit.
///
/// Invariant: `1 <= current_page <= total_pages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitProgress {
    module_id: ModuleId,
    unit_id: UnitId,
    current_page: u32,
    total_pages: u32,
    completed: bool,
    completed_activities: BTreeSet<ActivityId>,
    started_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl UnitProgress {
    /// Fresh progress positioned on the first page.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NoPages` if `total_pages` is zero.
    pub fn new(
        module_id: ModuleId,
        unit_id: UnitId,
        total_pages: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if total_pages == 0 {
            return Err(ProgressError::NoPages);
        }
        Ok(Self {
            module_id,
            unit_id,
            current_page: 1,
            total_pages,
            completed: false,
            completed_activities: BTreeSet::new(),
            started_at: now,
            last_updated: now,
        })
    }

    /// Rehydrate progress from storage, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the persisted values are inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        module_id: ModuleId,
        unit_id: UnitId,
        current_page: u32,
        total_pages: u32,
        completed: bool,
        completed_activities: BTreeSet<ActivityId>,
        started_at: DateTime<Utc>,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if total_pages == 0 {
            return Err(ProgressError::NoPages);
        }
        if current_page == 0 || current_page > total_pages {
            return Err(ProgressError::PageOutOfRange {
                current: current_page,
                total: total_pages,
            });
        }
        if last_updated < started_at {
            return Err(ProgressError::InvalidTimeRange);
        }
        Ok(Self {
            module_id,
            unit_id,
            current_page,
            total_pages,
            completed,
            completed_activities,
            started_at,
            last_updated,
        })
    }

    /// Apply a patch, clamping the page into range and stamping `last_updated`.
    ///
    /// A zero `total_pages` in the patch is ignored.
    pub fn apply(&mut self, patch: ProgressPatch, now: DateTime<Utc>) {
        if let Some(total) = patch.total_pages.filter(|total| *total > 0) {
            self.total_pages = total;
        }
        if let Some(page) = patch.current_page {
            self.current_page = page;
        }
        self.current_page = self.current_page.clamp(1, self.total_pages);
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(activities) = patch.completed_activities {
            self.completed_activities = activities;
        }
        self.last_updated = now.max(self.started_at);
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    #[must_use]
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn is_on_last_page(&self) -> bool {
        self.current_page == self.total_pages
    }

    #[must_use]
    pub fn completed_activities(&self) -> &BTreeSet<ActivityId> {
        &self.completed_activities
    }

    #[must_use]
    pub fn has_completed_activity(&self, activity: &ActivityId) -> bool {
        self.completed_activities.contains(activity)
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}
