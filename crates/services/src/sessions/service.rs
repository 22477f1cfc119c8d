use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use storage::ProgressStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use unitflow_core::model::{
    ModuleId, PageDescriptor, ProgressPatch, StepData, TransitionEvent, UnitId, UnitProgress,
};
use unitflow_core::{DelayPolicy, FlowController, PageRegistry, Transition};

use super::progress::SessionProgress;
use crate::error::SessionError;
use crate::scheduler::AutoAdvanceScheduler;

//
// ─── COMPLETION OUTCOME ────────────────────────────────────────────────────────
//

/// What happened to a completion event handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCompletion {
    pub transition: Transition,
    /// `false` only when a storage write failed; the in-memory state still moved.
    pub persisted: bool,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One learner walking one unit.
///
/// Every decision is written through the progress store before the delayed
/// navigation is armed, so a reload mid-delay resumes on the new page. The
/// page-facing methods never fail; storage problems are logged and the
/// session carries on from memory.
pub struct UnitSession {
    module_id: ModuleId,
    unit_id: UnitId,
    pages: Vec<PageDescriptor>,
    flow: FlowController,
    store: ProgressStore,
    scheduler: AutoAdvanceScheduler,
    progress: UnitProgress,
    step_data: StepData,
    active: Arc<watch::Sender<u32>>,
}

impl UnitSession {
    /// Open a unit, restoring stored progress or creating it on first visit.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Registry` if the unit is not in the catalog and
    /// `SessionError::ModuleMismatch` if it belongs to another module.
    pub async fn open(
        module_id: ModuleId,
        unit_id: UnitId,
        registry: &PageRegistry,
        store: ProgressStore,
        delays: DelayPolicy,
    ) -> Result<Self, SessionError> {
        let unit = registry.unit(unit_id)?;
        if unit.module_id != module_id {
            return Err(SessionError::ModuleMismatch {
                unit: unit_id,
                requested: module_id,
                actual: unit.module_id,
            });
        }
        let total_pages = unit.total_pages();
        let flow = FlowController::new(total_pages, unit.rules.clone(), delays);

        let progress = match store.load(module_id, unit_id).await {
            Some(existing) => reconcile(&store, existing, total_pages).await,
            None => create(&store, module_id, unit_id, total_pages).await?,
        };
        let step_data = store.load_step_data(unit_id).await;
        let (active, _) = watch::channel(progress.current_page());

        info!(
            module = %module_id,
            unit = %unit_id,
            page = progress.current_page(),
            total_pages,
            "unit session opened"
        );

        Ok(Self {
            module_id,
            unit_id,
            pages: unit.pages.clone(),
            flow,
            store,
            scheduler: AutoAdvanceScheduler::new(),
            progress,
            step_data,
            active: Arc::new(active),
        })
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Page the presentation layer should render now.
    #[must_use]
    pub fn current_page(&self) -> &PageDescriptor {
        let index = usize::try_from(self.active_page().saturating_sub(1)).unwrap_or(0);
        &self.pages[index.min(self.pages.len() - 1)]
    }

    #[must_use]
    pub fn active_page(&self) -> u32 {
        *self.active.borrow()
    }

    /// Receiver that observes every navigation, including delayed ones.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.active.subscribe()
    }

    /// Last persisted progress record.
    #[must_use]
    pub fn unit_progress(&self) -> &UnitProgress {
        &self.progress
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress::new(
            self.progress.current_page(),
            self.active_page(),
            self.progress.total_pages(),
            self.progress.is_completed(),
        )
    }

    #[must_use]
    pub fn step_data(&self) -> &StepData {
        &self.step_data
    }

    #[must_use]
    pub fn has_pending_navigation(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Handle a page's completion event.
    ///
    /// The event's step data is merged first, then the transition and the
    /// progress record are persisted, then navigation is scheduled.
    pub async fn on_page_complete(&mut self, event: TransitionEvent) -> PageCompletion {
        self.apply(event, None).await
    }

    /// Navigation chrome request to show page `page` right away.
    pub async fn jump_to_page(&mut self, page: u32) -> PageCompletion {
        let event = TransitionEvent::jump(self.active_page(), page);
        self.apply(event, Some(Duration::ZERO)).await
    }

    /// Merge facts recorded by the active page. Returns `false` if the write failed.
    pub async fn merge_step_data(&mut self, patch: StepData) -> bool {
        self.write_step_data(patch).await
    }

    /// Throw away all progress and step data for this unit and start over.
    ///
    /// Returns `false` if storage could not be cleared or rewritten.
    pub async fn restart(&mut self) -> bool {
        self.scheduler.cancel();
        let mut persisted = true;
        if let Err(err) = self.store.reset(self.module_id, self.unit_id).await {
            error!(unit = %self.unit_id, error = %err, "failed to clear unit progress");
            persisted = false;
        }
        self.step_data = StepData::new();
        self.progress = match create(&self.store, self.module_id, self.unit_id, self.flow.total_pages()).await {
            Ok(progress) => progress,
            Err(err) => {
                error!(unit = %self.unit_id, error = %err, "failed to recreate unit progress");
                return false;
            }
        };
        self.active.send_replace(1);
        info!(unit = %self.unit_id, "unit restarted");
        persisted
    }

    async fn apply(&mut self, event: TransitionEvent, delay: Option<Duration>) -> PageCompletion {
        let active = self.active_page();
        let merged = self.step_data.merged_with(&event.step_data);
        let mut transition = self.flow.next(active, &event, &merged);
        if transition.is_stale() {
            return PageCompletion {
                transition,
                persisted: true,
            };
        }
        if let Some(delay) = delay {
            transition.delay = delay;
        }

        let mut persisted = true;
        if !event.step_data.is_empty() {
            persisted &= self.write_step_data(event.step_data).await;
        }

        let was_completed = self.progress.is_completed();
        let mut activities = self.progress.completed_activities().clone();
        if let Some(activity) = event.activity {
            activities.insert(activity);
        }
        let patch = ProgressPatch::page(transition.target)
            .with_total_pages(self.flow.total_pages())
            .with_completed(was_completed || transition.completes_unit)
            .with_activities(activities);
        persisted &= self.persist(patch).await;

        if transition.completes_unit && !was_completed {
            info!(module = %self.module_id, unit = %self.unit_id, "unit completed");
        }

        self.navigate(active, transition.target, transition.delay);
        PageCompletion {
            transition,
            persisted,
        }
    }

    fn navigate(&mut self, active: u32, target: u32, delay: Duration) {
        if target == active {
            if self.scheduler.cancel() {
                debug!(page = active, "pending navigation dropped, staying on page");
            }
            return;
        }
        let sender = Arc::clone(&self.active);
        let _handle = self.scheduler.arm(delay, move || {
            sender.send_replace(target);
        });
        debug!(from = active, to = target, delay_ms = delay.as_millis(), "navigation scheduled");
    }

    async fn persist(&mut self, patch: ProgressPatch) -> bool {
        match self.store.save(self.module_id, self.unit_id, patch.clone()).await {
            Ok(progress) => {
                self.progress = progress;
                true
            }
            Err(err) => {
                error!(unit = %self.unit_id, error = %err, "failed to persist unit progress");
                self.progress.apply(patch, self.store.clock().now());
                false
            }
        }
    }

    async fn write_step_data(&mut self, patch: StepData) -> bool {
        self.step_data.merge(patch);
        match self
            .store
            .save_step_data(self.unit_id, self.step_data.clone())
            .await
        {
            Ok(stored) => {
                self.step_data = stored;
                true
            }
            Err(err) => {
                error!(unit = %self.unit_id, error = %err, "failed to persist step data");
                false
            }
        }
    }
}

async fn create(
    store: &ProgressStore,
    module_id: ModuleId,
    unit_id: UnitId,
    total_pages: u32,
) -> Result<UnitProgress, SessionError> {
    let patch = ProgressPatch::page(1).with_total_pages(total_pages);
    match store.save(module_id, unit_id, patch).await {
        Ok(progress) => {
            info!(module = %module_id, unit = %unit_id, "unit progress created");
            Ok(progress)
        }
        Err(err) => {
            error!(unit = %unit_id, error = %err, "failed to persist new unit progress");
            Ok(UnitProgress::new(module_id, unit_id, total_pages, store.clock().now())?)
        }
    }
}

async fn reconcile(store: &ProgressStore, progress: UnitProgress, total_pages: u32) -> UnitProgress {
    if progress.total_pages() == total_pages {
        return progress;
    }
    warn!(
        unit = %progress.unit_id(),
        recorded = progress.total_pages(),
        registry = total_pages,
        "page count changed since progress was recorded, clamping"
    );
    let patch = ProgressPatch::page(progress.current_page()).with_total_pages(total_pages);
    match store
        .save(progress.module_id(), progress.unit_id(), patch.clone())
        .await
    {
        Ok(updated) => updated,
        Err(err) => {
            error!(unit = %progress.unit_id(), error = %err, "failed to persist reconciled progress");
            let mut fallback = progress;
            fallback.apply(patch, store.clock().now());
            fallback
        }
    }
}

impl fmt::Debug for UnitSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitSession")
            .field("module_id", &self.module_id)
            .field("unit_id", &self.unit_id)
            .field("pages_len", &self.pages.len())
            .field("current_page", &self.progress.current_page())
            .field("active_page", &self.active_page())
            .field("completed", &self.progress.is_completed())
            .field("step_data_len", &self.step_data.len())
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
