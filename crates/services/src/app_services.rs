use std::sync::Arc;

use storage::ProgressStore;
use storage::repository::Storage;
use unitflow_core::model::{ModuleId, UnitId};
use unitflow_core::{DelayPolicy, PageRegistry};

use crate::Clock;
use crate::config::EngineConfig;
use crate::error::{AppServicesError, SessionError};
use crate::sessions::{UnitOverview, UnitSession};

/// Wires catalog, storage, and delay policy together and hands out sessions.
#[derive(Clone)]
pub struct AppServices {
    registry: Arc<PageRegistry>,
    progress: ProgressStore,
    delays: DelayPolicy,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        config: &EngineConfig,
        clock: Clock,
        registry: PageRegistry,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.database_url).await?;
        Ok(Self::from_storage(&storage, clock, registry, config.delays))
    }

    /// Build services over volatile storage.
    #[must_use]
    pub fn in_memory(clock: Clock, registry: PageRegistry, delays: DelayPolicy) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, registry, delays)
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        clock: Clock,
        registry: PageRegistry,
        delays: DelayPolicy,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            progress: ProgressStore::new(Arc::clone(&storage.kv), clock),
            delays,
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<PageRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn progress_store(&self) -> ProgressStore {
        self.progress.clone()
    }

    /// Open (or resume) a unit session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the unit is unknown or belongs to another module.
    pub async fn open_unit(
        &self,
        module_id: ModuleId,
        unit_id: UnitId,
    ) -> Result<UnitSession, SessionError> {
        UnitSession::open(
            module_id,
            unit_id,
            &self.registry,
            self.progress.clone(),
            self.delays,
        )
        .await
    }

    /// Every catalog unit of a module with its stored progress, if any.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if stored progress cannot be listed.
    pub async fn module_overview(
        &self,
        module_id: ModuleId,
    ) -> Result<Vec<UnitOverview>, SessionError> {
        let stored = self.progress.list_module(module_id).await?;
        Ok(self
            .registry
            .units_in_module(module_id)
            .map(|unit| {
                let progress = stored.iter().find(|p| p.unit_id() == unit.unit_id);
                UnitOverview {
                    unit_id: unit.unit_id,
                    title: unit.title.clone(),
                    total_pages: unit.total_pages(),
                    current_page: progress.map(|p| p.current_page()),
                    completed: progress.is_some_and(|p| p.is_completed()),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitflow_core::UnitDefinition;
    use unitflow_core::model::TransitionEvent;
    use unitflow_core::time::fixed_clock;

    fn catalog() -> PageRegistry {
        let module = ModuleId::new(1);
        PageRegistry::new()
            .with_unit(
                UnitDefinition::new(module, UnitId::new(1), "Greetings")
                    .page("Hello", "greetings/hello")
                    .page("Goodbye", "greetings/goodbye"),
            )
            .and_then(|r| {
                r.with_unit(
                    UnitDefinition::new(module, UnitId::new(2), "Numbers")
                        .page("One", "numbers/one")
                        .page("Two", "numbers/two")
                        .page("Three", "numbers/three"),
                )
            })
            .unwrap()
    }

    #[tokio::test]
    async fn overview_reports_started_and_untouched_units() {
        let services = AppServices::in_memory(fixed_clock(), catalog(), DelayPolicy::immediate());
        let mut session = services.open_unit(ModuleId::new(1), UnitId::new(2)).await.unwrap();
        session.on_page_complete(TransitionEvent::advance(1)).await;

        let overview = services.module_overview(ModuleId::new(1)).await.unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].current_page, None);
        assert_eq!(overview[1].current_page, Some(2));
        assert_eq!(overview[1].total_pages, 3);
        assert!(!overview[1].completed);
    }

    #[tokio::test]
    async fn sessions_share_the_store() {
        let services = AppServices::in_memory(fixed_clock(), catalog(), DelayPolicy::immediate());
        let mut first = services.open_unit(ModuleId::new(1), UnitId::new(1)).await.unwrap();
        first.on_page_complete(TransitionEvent::advance(1)).await;
        drop(first);

        let resumed = services.open_unit(ModuleId::new(1), UnitId::new(1)).await.unwrap();
        assert_eq!(resumed.current_page().title, "Goodbye");
    }

    #[tokio::test]
    async fn sqlite_services_bootstrap() {
        let config = EngineConfig {
            database_url: "sqlite:file:memdb_services?mode=memory&cache=shared".into(),
            delays: DelayPolicy::immediate(),
        };
        let services = AppServices::new_sqlite(&config, fixed_clock(), catalog())
            .await
            .unwrap();
        let session = services.open_unit(ModuleId::new(1), UnitId::new(1)).await.unwrap();
        assert_eq!(session.active_page(), 1);
    }
}
