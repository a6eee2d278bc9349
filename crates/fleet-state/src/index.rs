//! In-memory deployment index with write-through persistence.
//!
//! The index is the live view of every [`DeploymentRecord`], its
//! [`SyncStatus`] and the per-exercise image mappings, keyed by the
//! value-typed [`RecordKey`]. Every mutation is persisted to the
//! [`StateStore`] before the in-memory copy is replaced, and
//! [`DeploymentIndex::rehydrate`] rebuilds the maps on startup.
//!
//! Concurrent writers (operator deploys, the reconciler, manual resets)
//! go through [`DeploymentIndex::update_record`], a read-modify-write under
//! the write lock. Last writer wins.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

pub struct DeploymentIndex {
    store: StateStore,
    records: RwLock<HashMap<RecordKey, DeploymentRecord>>,
    sync: RwLock<HashMap<RecordKey, SyncStatus>>,
    images: RwLock<HashMap<ExerciseId, BTreeMap<RecordKey, ImageMapping>>>,
}

impl DeploymentIndex {
    /// Build an index over `store`, loading every persisted row.
    pub async fn rehydrate(store: StateStore) -> StateResult<Self> {
        let index = Self {
            store,
            records: RwLock::new(HashMap::new()),
            sync: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
        };
        index.reload().await?;
        Ok(index)
    }

    /// Replace the in-memory maps with the persisted rows.
    pub async fn reload(&self) -> StateResult<()> {
        let records = self.store.list_records()?;
        let sync = self.store.list_sync_status()?;
        let mappings = self.store.list_mappings()?;

        let mut images: HashMap<ExerciseId, BTreeMap<RecordKey, ImageMapping>> = HashMap::new();
        for mapping in mappings {
            images
                .entry(mapping.key.exercise_id.clone())
                .or_default()
                .insert(mapping.key.clone(), mapping);
        }

        info!(
            records = records.len(),
            sync = sync.len(),
            exercises = images.len(),
            "deployment index rehydrated"
        );

        *self.records.write().await = records.into_iter().map(|r| (r.key.clone(), r)).collect();
        *self.sync.write().await = sync.into_iter().map(|s| (s.key.clone(), s)).collect();
        *self.images.write().await = images;
        Ok(())
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Records ────────────────────────────────────────────────────

    pub async fn get(&self, key: &RecordKey) -> Option<DeploymentRecord> {
        self.records.read().await.get(key).cloned()
    }

    /// Insert or replace a record.
    pub async fn put(&self, record: DeploymentRecord) -> StateResult<()> {
        let mut records = self.records.write().await;
        self.store.put_record(&record)?;
        records.insert(record.key.clone(), record);
        Ok(())
    }

    /// Read-modify-write a record under the write lock.
    ///
    /// `f` may veto the update by returning `Err`; nothing is persisted in
    /// that case. Returns `Ok(None)` when the key is unknown.
    pub async fn update_record<F, E>(&self, key: &RecordKey, f: F) -> Result<Option<DeploymentRecord>, E>
    where
        F: FnOnce(&mut DeploymentRecord) -> Result<(), E>,
        E: From<crate::StateError>,
    {
        let mut records = self.records.write().await;
        let Some(current) = records.get(key) else {
            return Ok(None);
        };
        let mut next = current.clone();
        f(&mut next)?;
        next.updated_at = epoch_secs().max(next.updated_at);
        self.store.put_record(&next)?;
        records.insert(key.clone(), next.clone());
        Ok(Some(next))
    }

    /// Remove a record with its mapping and sync status.
    pub async fn remove(&self, key: &RecordKey) -> StateResult<bool> {
        let mut records = self.records.write().await;
        let mut sync = self.sync.write().await;
        let mut images = self.images.write().await;

        let existed = self.store.delete_record_and_mapping(key)?;
        records.remove(key);
        sync.remove(key);
        if let Some(per_exercise) = images.get_mut(&key.exercise_id) {
            per_exercise.remove(key);
            if per_exercise.is_empty() {
                images.remove(&key.exercise_id);
            }
        }
        debug!(%key, existed, "record removed from index");
        Ok(existed)
    }

    pub async fn all(&self) -> Vec<DeploymentRecord> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub async fn for_exercise(&self, exercise_id: &str) -> Vec<DeploymentRecord> {
        let mut found: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.key.exercise_id == exercise_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    pub async fn in_state(&self, state: DeploymentState) -> Vec<DeploymentRecord> {
        let mut found: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    /// Records holding (or about to hold) a container on each host.
    pub async fn active_per_host(&self) -> HashMap<HostId, u32> {
        let mut counts = HashMap::new();
        for record in self.records.read().await.values() {
            if let (true, Some(host)) = (record.state.is_active(), &record.host_id) {
                *counts.entry(host.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    // ── Sync status ────────────────────────────────────────────────

    pub async fn sync_status(&self, key: &RecordKey) -> Option<SyncStatus> {
        self.sync.read().await.get(key).cloned()
    }

    pub async fn all_sync_status(&self) -> Vec<SyncStatus> {
        let mut all: Vec<_> = self.sync.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub async fn put_sync_status(&self, status: SyncStatus) -> StateResult<()> {
        let mut sync = self.sync.write().await;
        self.store.put_sync_status(&status)?;
        sync.insert(status.key.clone(), status);
        Ok(())
    }

    /// Read-modify-write a sync row, creating a `SYNCED` one if absent.
    pub async fn update_sync_status<F>(&self, key: &RecordKey, f: F) -> StateResult<SyncStatus>
    where
        F: FnOnce(&mut SyncStatus),
    {
        let mut sync = self.sync.write().await;
        let now = epoch_secs();
        let mut next = sync
            .get(key)
            .cloned()
            .unwrap_or_else(|| SyncStatus::synced(key.clone(), now));
        f(&mut next);
        self.store.put_sync_status(&next)?;
        sync.insert(key.clone(), next.clone());
        Ok(next)
    }

    pub async fn remove_sync_status(&self, key: &RecordKey) -> StateResult<bool> {
        let mut sync = self.sync.write().await;
        let existed = self.store.delete_sync_status(key)?;
        sync.remove(key);
        Ok(existed)
    }

    // ── Image mappings ─────────────────────────────────────────────

    pub async fn put_mapping(&self, mapping: ImageMapping) -> StateResult<()> {
        let mut images = self.images.write().await;
        self.store.put_mapping(&mapping)?;
        images
            .entry(mapping.key.exercise_id.clone())
            .or_default()
            .insert(mapping.key.clone(), mapping);
        Ok(())
    }

    pub async fn mapping(&self, key: &RecordKey) -> Option<ImageMapping> {
        self.images
            .read()
            .await
            .get(&key.exercise_id)
            .and_then(|m| m.get(key))
            .cloned()
    }

    /// Known image entries for an exercise, ordered by key.
    pub async fn images_for_exercise(&self, exercise_id: &str) -> Vec<ImageMapping> {
        self.images
            .read()
            .await
            .get(exercise_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateError;

    fn mapping(exercise: &str, asset: &str, image: &str) -> ImageMapping {
        let (name, tag) = split_image_ref(image);
        ImageMapping {
            key: RecordKey::new(exercise, asset, image_id_for(image)),
            image_name: name,
            image_tag: tag,
            host_id: None,
            added_at: 100,
        }
    }

    #[tokio::test]
    async fn writes_are_persisted_and_rehydrated() {
        let store = StateStore::open_in_memory().unwrap();
        let index = DeploymentIndex::rehydrate(store.clone()).await.unwrap();

        let m = mapping("range-1", "web", "nginx:1.25");
        index.put_mapping(m.clone()).await.unwrap();
        index
            .put(DeploymentRecord::pending(m.key.clone(), "nginx:1.25", 100))
            .await
            .unwrap();

        let fresh = DeploymentIndex::rehydrate(store).await.unwrap();
        assert_eq!(fresh.images_for_exercise("range-1").await, vec![m.clone()]);
        assert_eq!(fresh.get(&m.key).await.unwrap().state, DeploymentState::Pending);
    }

    #[tokio::test]
    async fn update_record_is_read_modify_write() {
        let store = StateStore::open_in_memory().unwrap();
        let index = DeploymentIndex::rehydrate(store.clone()).await.unwrap();
        let key = RecordKey::new("range-1", "web", "nginx-1.25");
        index
            .put(DeploymentRecord::pending(key.clone(), "nginx:1.25", 100))
            .await
            .unwrap();

        let updated = index
            .update_record::<_, StateError>(&key, |r| {
                r.state = DeploymentState::Deploying;
                r.host_id = Some("h1".into());
                Ok(())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, DeploymentState::Deploying);
        assert_eq!(store.get_record(&key).unwrap().unwrap().host_id.as_deref(), Some("h1"));
        assert_eq!(index.active_per_host().await.get("h1"), Some(&1));
    }

    #[tokio::test]
    async fn vetoed_update_leaves_record_untouched() {
        let store = StateStore::open_in_memory().unwrap();
        let index = DeploymentIndex::rehydrate(store).await.unwrap();
        let key = RecordKey::new("range-1", "web", "nginx-1.25");
        index
            .put(DeploymentRecord::pending(key.clone(), "nginx:1.25", 100))
            .await
            .unwrap();

        let result = index
            .update_record(&key, |r| {
                r.state = DeploymentState::Deployed;
                Err(StateError::Write("vetoed".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(index.get(&key).await.unwrap().state, DeploymentState::Pending);

        let missing = RecordKey::new("range-1", "ghost", "x");
        let none = index
            .update_record::<_, StateError>(&missing, |_| Ok(()))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn remove_drops_every_view() {
        let store = StateStore::open_in_memory().unwrap();
        let index = DeploymentIndex::rehydrate(store).await.unwrap();
        let m = mapping("range-1", "web", "nginx:1.25");
        index.put_mapping(m.clone()).await.unwrap();
        index
            .put(DeploymentRecord::pending(m.key.clone(), "nginx:1.25", 100))
            .await
            .unwrap();
        index
            .update_sync_status(&m.key, |s| s.consecutive_failures = 2)
            .await
            .unwrap();

        assert!(index.remove(&m.key).await.unwrap());
        assert!(index.get(&m.key).await.is_none());
        assert!(index.sync_status(&m.key).await.is_none());
        assert!(index.images_for_exercise("range-1").await.is_empty());
    }
}
