use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use trendvisor_core::{TaskRecord, TrendvisorResult};

use crate::store::{decode_snapshot, encode_snapshot, task_key, StateStore};

/// Process-local store. Records are kept as serialized snapshots under
/// their `task:<id>` key, so reads never alias a writer's copy.
#[derive(Default)]
pub struct InMemoryStateStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an arbitrary snapshot under the key of `task_id`, bypassing
    /// validation. Lets callers simulate records written by other tools.
    pub fn insert_raw(&self, task_id: &str, raw: impl Into<String>) {
        self.snapshots.write().insert(task_key(task_id), raw.into());
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, task: &TaskRecord) -> TrendvisorResult<()> {
        let snapshot = encode_snapshot(task)?;
        self.snapshots
            .write()
            .insert(task_key(&task.task_id), snapshot);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> TrendvisorResult<Option<TaskRecord>> {
        let raw = self.snapshots.read().get(&task_key(task_id)).cloned();
        Ok(raw.and_then(|raw| decode_snapshot(task_id, &raw)))
    }

    async fn list(&self) -> TrendvisorResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .snapshots
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix("task:").map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
