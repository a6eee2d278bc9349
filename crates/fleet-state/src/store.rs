//! StateStore: redb-backed state persistence for the fleet.
//!
//! Provides typed CRUD operations over hosts, assets, deployment records,
//! sync status and image mappings. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Result of [`StateStore::delete_host_clearing_refs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRemoval {
    Missing,
    /// Live records still reference the host; nothing was changed.
    InUse(Vec<RecordKey>),
    Removed { affected_assets: u32 },
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [HOSTS, ASSETS, RECORDS, SYNC_STATUS, IMAGE_MAPPINGS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix` (empty prefix lists the table).
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(results)
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host.
    pub fn put_host(&self, host: &HostNode) -> StateResult<()> {
        self.put(HOSTS, &host.id, host)?;
        debug!(host_id = %host.id, status = %host.status, "host stored");
        Ok(())
    }

    pub fn get_host(&self, host_id: &str) -> StateResult<Option<HostNode>> {
        self.get(HOSTS, host_id)
    }

    pub fn list_hosts(&self) -> StateResult<Vec<HostNode>> {
        self.scan(HOSTS, "")
    }

    /// Delete a host and clear every asset reference to it in one transaction.
    ///
    /// Refused while a `DEPLOYING`/`DEPLOYED` record still points at the host.
    /// Referencing assets lose their `preferred_host` and fall back to the
    /// `any` strategy.
    pub fn delete_host_clearing_refs(&self, host_id: &str) -> StateResult<HostRemoval> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let affected;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            if hosts.get(host_id).map_err(map_err!(Read))?.is_none() {
                return Ok(HostRemoval::Missing);
            }

            let records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let mut live = Vec::new();
            for entry in records.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record: DeploymentRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if record.state.is_active() && record.host_id.as_deref() == Some(host_id) {
                    live.push(record.key);
                }
            }
            if !live.is_empty() {
                live.sort();
                return Ok(HostRemoval::InUse(live));
            }

            hosts.remove(host_id).map_err(map_err!(Write))?;

            let mut assets = txn.open_table(ASSETS).map_err(map_err!(Table))?;
            let mut updated = Vec::new();
            for entry in assets.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let mut asset: DeploymentTarget =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if asset.preferred_host.as_deref() == Some(host_id) {
                    asset.preferred_host = None;
                    asset.strategy = DeploymentStrategy::Any;
                    asset.updated_at = epoch_secs();
                    updated.push(asset);
                }
            }
            for asset in &updated {
                let bytes = serde_json::to_vec(asset).map_err(map_err!(Serialize))?;
                assets
                    .insert(asset.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            affected = updated.len() as u32;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%host_id, affected, "host deleted");
        Ok(HostRemoval::Removed { affected_assets: affected })
    }

    // ── Assets ─────────────────────────────────────────────────────

    /// Insert or update an asset copy supplied by the administrative layer.
    pub fn put_asset(&self, asset: &DeploymentTarget) -> StateResult<()> {
        self.put(ASSETS, &asset.id, asset)
    }

    pub fn get_asset(&self, asset_id: &str) -> StateResult<Option<DeploymentTarget>> {
        self.get(ASSETS, asset_id)
    }

    pub fn list_assets(&self) -> StateResult<Vec<DeploymentTarget>> {
        self.scan(ASSETS, "")
    }

    pub fn delete_asset(&self, asset_id: &str) -> StateResult<bool> {
        self.delete(ASSETS, asset_id)
    }

    // ── Deployment records ─────────────────────────────────────────

    pub fn put_record(&self, record: &DeploymentRecord) -> StateResult<()> {
        let key = record.key.table_key();
        self.put(RECORDS, &key, record)?;
        debug!(%key, state = %record.state, "record stored");
        Ok(())
    }

    pub fn get_record(&self, key: &RecordKey) -> StateResult<Option<DeploymentRecord>> {
        self.get(RECORDS, &key.table_key())
    }

    pub fn list_records(&self) -> StateResult<Vec<DeploymentRecord>> {
        self.scan(RECORDS, "")
    }

    pub fn list_records_for_exercise(&self, exercise_id: &str) -> StateResult<Vec<DeploymentRecord>> {
        self.scan(RECORDS, &RecordKey::exercise_prefix(exercise_id))
    }

    /// Delete a record together with its image mapping and sync status.
    pub fn delete_record_and_mapping(&self, key: &RecordKey) -> StateResult<bool> {
        let k = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            existed = records.remove(k.as_str()).map_err(map_err!(Write))?.is_some();
            let mut mappings = txn.open_table(IMAGE_MAPPINGS).map_err(map_err!(Table))?;
            mappings.remove(k.as_str()).map_err(map_err!(Write))?;
            let mut sync = txn.open_table(SYNC_STATUS).map_err(map_err!(Table))?;
            sync.remove(k.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %k, existed, "record removed");
        Ok(existed)
    }

    // ── Sync status ────────────────────────────────────────────────

    pub fn put_sync_status(&self, status: &SyncStatus) -> StateResult<()> {
        self.put(SYNC_STATUS, &status.key.table_key(), status)
    }

    pub fn get_sync_status(&self, key: &RecordKey) -> StateResult<Option<SyncStatus>> {
        self.get(SYNC_STATUS, &key.table_key())
    }

    pub fn list_sync_status(&self) -> StateResult<Vec<SyncStatus>> {
        self.scan(SYNC_STATUS, "")
    }

    pub fn delete_sync_status(&self, key: &RecordKey) -> StateResult<bool> {
        self.delete(SYNC_STATUS, &key.table_key())
    }

    // ── Image mappings ─────────────────────────────────────────────

    pub fn put_mapping(&self, mapping: &ImageMapping) -> StateResult<()> {
        self.put(IMAGE_MAPPINGS, &mapping.key.table_key(), mapping)
    }

    pub fn get_mapping(&self, key: &RecordKey) -> StateResult<Option<ImageMapping>> {
        self.get(IMAGE_MAPPINGS, &key.table_key())
    }

    pub fn list_mappings(&self) -> StateResult<Vec<ImageMapping>> {
        self.scan(IMAGE_MAPPINGS, "")
    }

    pub fn list_mappings_for_exercise(&self, exercise_id: &str) -> StateResult<Vec<ImageMapping>> {
        self.scan(IMAGE_MAPPINGS, &RecordKey::exercise_prefix(exercise_id))
    }

    pub fn delete_mapping(&self, key: &RecordKey) -> StateResult<bool> {
        self.delete(IMAGE_MAPPINGS, &key.table_key())
    }
}
