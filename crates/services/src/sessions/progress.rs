use unitflow_core::model::UnitId;

/// Read-only view of session progress for progress bars and headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    /// Persisted position; may run ahead of `active_page` during a delay.
    pub current_page: u32,
    /// Page currently rendered.
    pub active_page: u32,
    pub total_pages: u32,
    pub completed: bool,
    pub percent: u8,
}

impl SessionProgress {
    #[must_use]
    pub fn new(current_page: u32, active_page: u32, total_pages: u32, completed: bool) -> Self {
        let percent = if completed {
            100
        } else {
            let total = u64::from(total_pages.max(1));
            let done = u64::from(current_page.saturating_sub(1));
            u8::try_from(done * 100 / total).unwrap_or(100)
        };
        Self {
            current_page,
            active_page,
            total_pages,
            completed,
            percent,
        }
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.current_page == self.active_page
    }
}

/// One unit of a module as seen from the catalog plus stored progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOverview {
    pub unit_id: UnitId,
    pub title: String,
    pub total_pages: u32,
    /// `None` when the unit was never started.
    pub current_page: Option<u32>,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_counts_pages_left_behind() {
        assert_eq!(SessionProgress::new(1, 1, 4, false).percent, 0);
        assert_eq!(SessionProgress::new(3, 2, 4, false).percent, 50);
        assert_eq!(SessionProgress::new(4, 4, 4, false).percent, 75);
        assert_eq!(SessionProgress::new(4, 4, 4, true).percent, 100);
    }

    #[test]
    fn settled_when_render_caught_up() {
        assert!(!SessionProgress::new(3, 2, 4, false).is_settled());
        assert!(SessionProgress::new(2, 2, 4, false).is_settled());
    }
}
