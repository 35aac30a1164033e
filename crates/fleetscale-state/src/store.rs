//! StateStore: redb-backed persistence for fleetscale.
//!
//! Holds operator policies (as the raw JSON they were submitted in), the
//! latest metric sample per application and metric, and per-application
//! instance counts. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;
use crate::validate::parse_policy;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    closed: Arc<AtomicBool>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
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
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_COUNTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Mark the store closed. Every later call fails with [`StateError::Closed`].
    ///
    /// The database file itself is released when the last clone drops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("state store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StateResult<()> {
        if self.is_closed() {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Validate and insert or replace an application's policy.
    pub fn put_policy(&self, app_id: &str, policy_json: &str) -> StateResult<PolicyWrite> {
        self.ensure_open()?;
        parse_policy(policy_json)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = table
                .insert(app_id, policy_json)
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;

        let outcome = if existed {
            PolicyWrite::Updated
        } else {
            PolicyWrite::Created
        };
        debug!(%app_id, %outcome, "policy stored");
        Ok(outcome)
    }

    /// Get the raw policy record for an application.
    pub fn get_policy_record(&self, app_id: &str) -> StateResult<Option<PolicyRecord>> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(app_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(PolicyRecord {
                app_id: app_id.to_string(),
                policy_json: guard.value().to_string(),
            })),
            None => Ok(None),
        }
    }

    /// Get and parse an application's policy.
    pub fn get_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        self.get_policy_record(app_id)?
            .map(|record| parse_policy(&record.policy_json))
            .transpose()
    }

    /// List every application id that has a policy.
    pub fn list_app_ids(&self) -> StateResult<BTreeSet<AppId>> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut ids = BTreeSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            ids.insert(key.value().to_string());
        }
        Ok(ids)
    }

    /// List all policies as raw records, ordered by application id.
    pub fn list_policy_records(&self) -> StateResult<Vec<PolicyRecord>> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push(PolicyRecord {
                app_id: key.value().to_string(),
                policy_json: value.value().to_string(),
            });
        }
        Ok(results)
    }

    /// Delete an application's policy. Returns true if it existed.
    pub fn delete_policy(&self, app_id: &str) -> StateResult<bool> {
        self.ensure_open()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = table.remove(app_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, existed, "policy deleted");
        Ok(existed)
    }

    // ── Samples ────────────────────────────────────────────────────

    /// Insert or replace the latest sample for an application's metric.
    pub fn put_sample(&self, sample: &MetricSample) -> StateResult<()> {
        self.ensure_open()?;
        let key = sample.table_key();
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the latest sample for an application's metric.
    pub fn latest_sample(&self, app_id: &str, metric_type: &str) -> StateResult<Option<MetricSample>> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        match table.get((app_id, metric_type)).map_err(map_err!(Read))? {
            Some(guard) => {
                let sample: MetricSample =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(sample))
            }
            None => Ok(None),
        }
    }

    // ── Instance counts ────────────────────────────────────────────

    /// Record the instance count for an application.
    pub fn set_instance_count(&self, app_id: &str, count: u32) -> StateResult<()> {
        self.ensure_open()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCE_COUNTS).map_err(map_err!(Table))?;
            table.insert(app_id, count).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, count, "instance count stored");
        Ok(())
    }

    /// Get the instance count for an application.
    pub fn instance_count(&self, app_id: &str) -> StateResult<Option<u32>> {
        self.ensure_open()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_COUNTS).map_err(map_err!(Table))?;
        Ok(table
            .get(app_id)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value()))
    }
}
