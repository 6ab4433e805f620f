//! StateStore — redb-backed state persistence for Switchyard.
//!
//! Provides typed CRUD operations over deployment records, migrations,
//! feature toggles, and route weights. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
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

/// Result of trying to mark a service's deployment as started.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The new record was written with `in_progress = true`.
    Started(DeploymentState),
    /// Another deployment already holds the service; nothing was written.
    InProgress(DeploymentState),
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

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [DEPLOYMENTS, MIGRATIONS, TOGGLES, ROUTES] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(TOGGLE_REVISIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON access ────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
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

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn delete_key(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or replace the deployment record for a service.
    pub fn put_deployment(&self, state: &DeploymentState) -> StateResult<()> {
        self.put_json(DEPLOYMENTS, &state.service, state)?;
        debug!(service = %state.service, phase = ?state.phase, "deployment stored");
        Ok(())
    }

    /// Get the deployment record for a service.
    pub fn get_deployment(&self, service: &str) -> StateResult<Option<DeploymentState>> {
        self.get_json(DEPLOYMENTS, service)
    }

    /// List all deployment records.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentState>> {
        self.list_json(DEPLOYMENTS)
    }

    /// Atomically claim a service for a new deployment.
    ///
    /// Reads the existing record and, unless it is in progress, writes the
    /// record produced by `build` in the same write transaction.
    pub fn begin_deployment<F>(&self, service: &str, build: F) -> StateResult<BeginOutcome>
    where
        F: FnOnce(Option<DeploymentState>) -> DeploymentState,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let existing: Option<DeploymentState> = match table.get(service).map_err(map_err!(Read))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            };
            match existing {
                Some(current) if current.in_progress => BeginOutcome::InProgress(current),
                prior => {
                    let mut next = build(prior);
                    next.in_progress = true;
                    let bytes = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
                    table
                        .insert(service, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    BeginOutcome::Started(next)
                }
            }
        };

        match &outcome {
            BeginOutcome::Started(_) => {
                txn.commit().map_err(map_err!(Transaction))?;
                debug!(%service, "deployment claimed");
            }
            BeginOutcome::InProgress(_) => {
                txn.abort().map_err(map_err!(Transaction))?;
                debug!(%service, "deployment already in progress");
            }
        }
        Ok(outcome)
    }

    /// Apply `f` to the stored record and persist the result.
    pub fn update_deployment<F>(&self, service: &str, f: F) -> StateResult<DeploymentState>
    where
        F: FnOnce(&mut DeploymentState),
    {
        let mut state = self
            .get_deployment(service)?
            .ok_or_else(|| StateError::DeploymentNotFound {
                service: service.to_string(),
            })?;
        f(&mut state);
        self.put_deployment(&state)?;
        Ok(state)
    }

    /// Drop a service's record. Returns true if it existed.
    pub fn delete_deployment(&self, service: &str) -> StateResult<bool> {
        let existed = self.delete_key(DEPLOYMENTS, service)?;
        debug!(%service, existed, "deployment record deleted");
        Ok(existed)
    }

    // ── Migrations ─────────────────────────────────────────────────

    /// Insert or update a migration registry entry.
    pub fn put_migration(&self, migration: &Migration) -> StateResult<()> {
        self.put_json(MIGRATIONS, &migration.table_key(), migration)?;
        debug!(version = %migration.version, status = ?migration.status, "migration stored");
        Ok(())
    }

    pub fn get_migration(&self, version: &str) -> StateResult<Option<Migration>> {
        self.get_json(MIGRATIONS, version)
    }

    /// List every registered migration in key order.
    pub fn list_migrations(&self) -> StateResult<Vec<Migration>> {
        self.list_json(MIGRATIONS)
    }

    pub fn delete_migration(&self, version: &str) -> StateResult<bool> {
        self.delete_key(MIGRATIONS, version)
    }

    // ── Feature toggles ────────────────────────────────────────────

    /// Store a toggle. Its version must be newer than the stored one.
    pub fn put_toggle(&self, toggle: &FeatureToggle) -> StateResult<()> {
        let bytes = serde_json::to_vec(toggle).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TOGGLES).map_err(map_err!(Table))?;
            let stored = match table.get(toggle.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let current: FeatureToggle =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(current.version)
                }
                None => None,
            };
            if let Some(stored) = stored.filter(|v| *v >= toggle.version) {
                return Err(StateError::StaleToggle {
                    name: toggle.name.clone(),
                    stored,
                    attempted: toggle.version,
                });
            }
            table
                .insert(toggle.name.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %toggle.name, version = toggle.version, "toggle stored");
        Ok(())
    }

    /// Hand out the next revision number for `name`.
    ///
    /// The counter outlives the toggle itself, so a toggle that is deleted
    /// and created again keeps counting upwards.
    pub fn next_toggle_revision(&self, name: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored = {
            let table = txn.open_table(TOGGLES).map_err(map_err!(Table))?;
            match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let toggle: FeatureToggle =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    toggle.version
                }
                None => 0,
            }
        };
        let next = {
            let mut revisions = txn.open_table(TOGGLE_REVISIONS).map_err(map_err!(Table))?;
            let last = revisions
                .get(name)
                .map_err(map_err!(Read))?
                .map_or(0, |guard| guard.value());
            let next = last.max(stored) + 1;
            revisions.insert(name, next).map_err(map_err!(Write))?;
            next
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    pub fn get_toggle(&self, name: &str) -> StateResult<Option<FeatureToggle>> {
        self.get_json(TOGGLES, name)
    }

    pub fn list_toggles(&self) -> StateResult<Vec<FeatureToggle>> {
        self.list_json(TOGGLES)
    }

    /// Delete a toggle by name. Returns true if it existed.
    pub fn delete_toggle(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete_key(TOGGLES, name)?;
        debug!(%name, existed, "toggle deleted");
        Ok(existed)
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Record the weights last applied to a route.
    pub fn put_route_weights(&self, route: &str, weights: &TrafficWeights) -> StateResult<()> {
        self.put_json(ROUTES, route, weights)?;
        debug!(%route, %weights, "route weights stored");
        Ok(())
    }

    pub fn get_route_weights(&self, route: &str) -> StateResult<Option<TrafficWeights>> {
        self.get_json(ROUTES, route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::Strategy;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn record(service: &str, target: &str) -> DeploymentState {
        DeploymentState {
            service: service.to_string(),
            in_progress: true,
            current_version: "1.0.0".to_string(),
            target_version: target.to_string(),
            start_time: 1_000,
            strategy: Strategy::BlueGreen,
            phase: RolloutPhase::Pending,
            metrics: Default::default(),
            live_environment: "blue".to_string(),
            candidate_environment: None,
            route: "default".to_string(),
            schema_version_before: None,
            migrations_applied: 0,
            traffic_touched: false,
            previous_toggles: Default::default(),
            last_error: None,
            finished_at: None,
        }
    }

    #[test]
    fn deployment_crud() {
        let store = test_store();
        let state = record("api", "1.1.0");
        store.put_deployment(&state).unwrap();

        let got = store.get_deployment("api").unwrap().unwrap();
        assert_eq!(got, state);
        assert!(store.get_deployment("web").unwrap().is_none());
        assert_eq!(store.list_deployments().unwrap().len(), 1);
    }

    #[test]
    fn begin_claims_idle_service() {
        let store = test_store();
        let outcome = store
            .begin_deployment("api", |prior| {
                assert!(prior.is_none());
                record("api", "1.1.0")
            })
            .unwrap();
        assert!(matches!(outcome, BeginOutcome::Started(ref s) if s.in_progress));
        assert!(store.get_deployment("api").unwrap().unwrap().in_progress);
    }

    #[test]
    fn begin_rejects_in_progress_service() {
        let store = test_store();
        store.put_deployment(&record("api", "1.1.0")).unwrap();

        let mut built = false;
        let outcome = store
            .begin_deployment("api", |_| {
                built = true;
                record("api", "2.0.0")
            })
            .unwrap();

        assert!(!built);
        match outcome {
            BeginOutcome::InProgress(current) => assert_eq!(current.target_version, "1.1.0"),
            other => panic!("expected InProgress, got {other:?}"),
        }
        assert_eq!(store.get_deployment("api").unwrap().unwrap().target_version, "1.1.0");
    }

    #[test]
    fn begin_sees_previous_finished_record() {
        let store = test_store();
        let mut done = record("api", "1.1.0");
        done.in_progress = false;
        done.phase = RolloutPhase::Completed;
        store.put_deployment(&done).unwrap();

        let outcome = store
            .begin_deployment("api", |prior| {
                let prior = prior.unwrap();
                let mut next = record("api", "1.2.0");
                next.current_version = prior.target_version;
                next
            })
            .unwrap();
        let BeginOutcome::Started(state) = outcome else {
            panic!("expected Started");
        };
        assert_eq!(state.current_version, "1.1.0");
    }

    #[test]
    fn update_deployment_persists_change() {
        let store = test_store();
        store.put_deployment(&record("api", "1.1.0")).unwrap();
        let updated = store
            .update_deployment("api", |s| s.phase = RolloutPhase::Monitoring)
            .unwrap();
        assert_eq!(updated.phase, RolloutPhase::Monitoring);
        assert_eq!(store.get_deployment("api").unwrap().unwrap().phase, RolloutPhase::Monitoring);
    }

    #[test]
    fn deleted_deployment_frees_the_service() {
        let store = test_store();
        store.put_deployment(&record("api", "1.1.0")).unwrap();
        assert!(store.delete_deployment("api").unwrap());
        assert!(!store.delete_deployment("api").unwrap());
        let outcome = store.begin_deployment("api", |prior| {
            assert!(prior.is_none());
            record("api", "1.2.0")
        });
        assert!(matches!(outcome, Ok(BeginOutcome::Started(_))));
    }

    #[test]
    fn update_missing_deployment_is_not_found() {
        let store = test_store();
        let err = store.update_deployment("ghost", |_| {}).unwrap_err();
        assert!(matches!(err, StateError::DeploymentNotFound { ref service } if service == "ghost"));
    }

    #[test]
    fn migration_crud() {
        let store = test_store();
        let m = Migration::pending(
            "1.0.1",
            "custom",
            MigrationKind::Custom { up_sql: "SELECT 1".into() },
        );
        store.put_migration(&m).unwrap();
        assert_eq!(store.get_migration("1.0.1").unwrap().unwrap(), m);
        assert_eq!(store.list_migrations().unwrap().len(), 1);
        assert!(store.delete_migration("1.0.1").unwrap());
        assert!(!store.delete_migration("1.0.1").unwrap());
    }

    #[test]
    fn toggle_crud() {
        let store = test_store();
        let toggle = FeatureToggle {
            name: "new-checkout".into(),
            enabled: true,
            rollout_percentage: 50,
            targeting_rules: None,
            version: 1,
            release: None,
            updated_at: 0,
        };
        store.put_toggle(&toggle).unwrap();
        assert_eq!(store.get_toggle("new-checkout").unwrap().unwrap(), toggle);
        assert!(store.delete_toggle("new-checkout").unwrap());
        assert!(store.list_toggles().unwrap().is_empty());
    }

    #[test]
    fn toggle_revisions_survive_delete() {
        let store = test_store();
        assert_eq!(store.next_toggle_revision("dark-mode").unwrap(), 1);
        assert_eq!(store.next_toggle_revision("dark-mode").unwrap(), 2);
        store.delete_toggle("dark-mode").unwrap();
        assert_eq!(store.next_toggle_revision("dark-mode").unwrap(), 3);
        assert_eq!(store.next_toggle_revision("other").unwrap(), 1);
    }

    #[test]
    fn stale_toggle_write_is_refused() {
        let store = test_store();
        let mut toggle = FeatureToggle {
            name: "dark-mode".into(),
            enabled: true,
            rollout_percentage: 100,
            targeting_rules: None,
            version: 4,
            release: None,
            updated_at: 0,
        };
        store.put_toggle(&toggle).unwrap();
        // Revisions already written count towards the next one.
        assert_eq!(store.next_toggle_revision("dark-mode").unwrap(), 5);

        toggle.version = 4;
        toggle.enabled = false;
        let err = store.put_toggle(&toggle).unwrap_err();
        assert!(matches!(err, StateError::StaleToggle { stored: 4, attempted: 4, .. }));
        assert!(store.get_toggle("dark-mode").unwrap().unwrap().enabled);
    }

    #[test]
    fn route_weights_round_trip() {
        let store = test_store();
        assert!(store.get_route_weights("default").unwrap().is_none());
        let weights = TrafficWeights::split("blue", "green", 30);
        store.put_route_weights("default", &weights).unwrap();
        assert_eq!(store.get_route_weights("default").unwrap().unwrap(), weights);
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.put_deployment(&record("api", "1.1.0")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.get_deployment("api").unwrap().unwrap().target_version, "1.1.0");
    }
}
