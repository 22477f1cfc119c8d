//! Progress and step-data persistence on top of a [`KeyValueStore`].
//!
//! Records are JSON documents. Anything unreadable is treated as "never
//! started" so a corrupt blob can never take a session down.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use unitflow_core::Clock;
use unitflow_core::model::{
    ActivityId, ModuleId, ProgressError, ProgressPatch, StepData, UnitId, UnitProgress,
};

use crate::repository::{KeyValueStore, StorageError};

/// Storage key of a unit's progress record.
#[must_use]
pub fn progress_key(module_id: ModuleId, unit_id: UnitId) -> String {
    format!("module-{module_id}-unit-{unit_id}-progress")
}

/// Storage key of a unit's step data.
#[must_use]
pub fn step_data_key(unit_id: UnitId) -> String {
    format!("unit-{unit_id}-step-data")
}

/// Persisted shape of [`UnitProgress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub module_id: ModuleId,
    pub unit_id: UnitId,
    pub current_page: u32,
    pub total_pages: u32,
    pub completed_activities: Vec<ActivityId>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed: bool,
}

impl ProgressRecord {
    #[must_use]
    pub fn from_progress(progress: &UnitProgress) -> Self {
        Self {
            module_id: progress.module_id(),
            unit_id: progress.unit_id(),
            current_page: progress.current_page(),
            total_pages: progress.total_pages(),
            completed_activities: progress.completed_activities().iter().cloned().collect(),
            started_at: progress.started_at(),
            last_updated: progress.last_updated(),
            completed: progress.is_completed(),
        }
    }

    /// # Errors
    ///
    /// Returns `ProgressError` if the record violates a progress invariant.
    pub fn into_progress(self) -> Result<UnitProgress, ProgressError> {
        UnitProgress::from_persisted(
            self.module_id,
            self.unit_id,
            self.current_page,
            self.total_pages,
            self.completed,
            self.completed_activities.into_iter().collect::<BTreeSet<_>>(),
            self.started_at,
            self.last_updated,
        )
    }
}

/// Load/save contract for one learner's unit progress and step data.
#[derive(Clone)]
pub struct ProgressStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
}

impl ProgressStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Clock) -> Self {
        Self { kv, clock }
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Persisted progress, or `None` if the unit was never started.
    ///
    /// Backend failures and corrupt records also yield `None`.
    pub async fn load(&self, module_id: ModuleId, unit_id: UnitId) -> Option<UnitProgress> {
        match self.try_load(module_id, unit_id).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(
                    key = %progress_key(module_id, unit_id),
                    error = %err,
                    "progress backend unavailable, treating as not started"
                );
                None
            }
        }
    }

    /// Like [`ProgressStore::load`], but a backend read failure is an error.
    ///
    /// Corrupt or mismatched records still read as `Ok(None)`.
    async fn try_load(
        &self,
        module_id: ModuleId,
        unit_id: UnitId,
    ) -> Result<Option<UnitProgress>, StorageError> {
        let key = progress_key(module_id, unit_id);
        let Some(bytes) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let record: ProgressRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(%key, error = %err, "corrupt progress record, treating as not started");
                return Ok(None);
            }
        };
        if record.module_id != module_id || record.unit_id != unit_id {
            warn!(%key, "progress record belongs to another unit, treating as not started");
            return Ok(None);
        }
        match record.into_progress() {
            Ok(progress) => Ok(Some(progress)),
            Err(err) => {
                warn!(%key, error = %err, "invalid progress record, treating as not started");
                Ok(None)
            }
        }
    }

    /// Merge `patch` into the stored record, creating it if absent.
    ///
    /// A new record takes `total_pages` from the patch (one if missing) and
    /// starts on page one before the patch is applied. Nothing is written when
    /// the existing record cannot be read, so `started_at` survives a flaky
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read, encoded, or written.
    pub async fn save(
        &self,
        module_id: ModuleId,
        unit_id: UnitId,
        patch: ProgressPatch,
    ) -> Result<UnitProgress, StorageError> {
        let now = self.clock.now();
        let mut progress = match self.try_load(module_id, unit_id).await? {
            Some(existing) => existing,
            None => UnitProgress::new(module_id, unit_id, patch.total_pages.unwrap_or(1).max(1), now)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        };
        progress.apply(patch, now);
        self.write_progress(&progress).await?;
        Ok(progress)
    }

    /// Write a whole record, replacing whatever is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be encoded or written.
    pub async fn write_progress(&self, progress: &UnitProgress) -> Result<(), StorageError> {
        let key = progress_key(progress.module_id(), progress.unit_id());
        let bytes = serde_json::to_vec(&ProgressRecord::from_progress(progress))
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.kv.set(&key, &bytes).await
    }

    /// Step data for a unit; empty when missing or unreadable.
    pub async fn load_step_data(&self, unit_id: UnitId) -> StepData {
        self.try_load_step_data(unit_id).await.unwrap_or_else(|err| {
            warn!(
                key = %step_data_key(unit_id),
                error = %err,
                "step data backend unavailable, starting empty"
            );
            StepData::new()
        })
    }

    async fn try_load_step_data(&self, unit_id: UnitId) -> Result<StepData, StorageError> {
        let key = step_data_key(unit_id);
        let Some(bytes) = self.kv.get(&key).await? else {
            return Ok(StepData::new());
        };
        Ok(serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(%key, error = %err, "corrupt step data, starting empty");
            StepData::new()
        }))
    }

    /// Shallow-merge `patch` into the stored step data and return the result.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the stored data cannot be read, or the merged
    /// data cannot be encoded or written.
    pub async fn save_step_data(
        &self,
        unit_id: UnitId,
        patch: StepData,
    ) -> Result<StepData, StorageError> {
        let mut data = self.try_load_step_data(unit_id).await?;
        data.merge(patch);
        let bytes =
            serde_json::to_vec(&data).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.kv.set(&step_data_key(unit_id), &bytes).await?;
        Ok(data)
    }

    /// Forget a unit entirely: progress and step data.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if either key cannot be removed.
    pub async fn reset(&self, module_id: ModuleId, unit_id: UnitId) -> Result<(), StorageError> {
        self.kv.remove(&progress_key(module_id, unit_id)).await?;
        self.kv.remove(&step_data_key(unit_id)).await
    }

    /// Every readable progress record in a module, in key order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the key listing fails.
    pub async fn list_module(&self, module_id: ModuleId) -> Result<Vec<UnitProgress>, StorageError> {
        let prefix = format!("module-{module_id}-unit-");
        let mut found = Vec::new();
        for key in self.kv.keys_with_prefix(&prefix).await? {
            let Some(unit_id) = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix("-progress"))
                .and_then(|raw| raw.parse::<UnitId>().ok())
            else {
                continue;
            };
            if let Some(progress) = self.load(module_id, unit_id).await {
                found.push(progress);
            }
        }
        Ok(found)
    }
}
