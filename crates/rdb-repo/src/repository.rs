use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rdb_cache::DependencyCache;
use rdb_pipeline::TransactionExecutor;
use rdb_store::{container_path, validate_component, RemoteStoreClient};
use rdb_txn::{decode_container, BranchTransaction, LockSet, RepoMetadata};
use rdb_types::{
    name_key, names_equal, AbortReport, ContentHash, ObjectRecord, RdbError, RdbResult,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::RepoConfig;
use crate::query::{apply_search, attribute_matches, SearchFilters, SearchOptions};
use crate::schema::{link_field, Caller, ContainerSchema};

/// Cache shared by every repository in the process.
pub type SharedCache = Arc<DependencyCache<Arc<ContainerSnapshot>>>;

const STEP_MUTATE: &str = "mutate";
const STEP_WRITE: &str = "write";
const STEP_RELEASE: &str = "release";
const STEP_INVALIDATE: &str = "invalidate";

/// Cache key of a container's full read. Every derived query key depends on
/// it.
pub fn root_key(container: &str) -> String {
    format!("{container}:all")
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Records of a container, or a query over them, at one blob version.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerSnapshot {
    pub container: String,
    pub objects: Vec<ObjectRecord>,
    /// Blob hash on the base ref; `None` if the container has no blob yet.
    pub hash: Option<ContentHash>,
}

/// Field changes for one record in a batch update.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordUpdate {
    pub name: String,
    pub changes: Map<String, Value>,
}

impl RecordUpdate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changes: Map::new(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(field.into(), value.into());
        self
    }
}

/// Where a deleted record lives and which containers may reference it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteScope {
    pub from: String,
    pub to: Vec<String>,
}

impl DeleteScope {
    pub fn new<I, S>(from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
        }
    }
}

/// Payload threaded through a write pipeline.
struct WriteContext<T> {
    meta: RepoMetadata,
    output: Option<T>,
}

// ---------------------------------------------------------------------------
// ObjectRepository
// ---------------------------------------------------------------------------

/// CRUD and query façade over one container.
///
/// Reads go through the shared [`DependencyCache`]: the full container under
/// [`root_key`], and each derived query under its own key registered as a
/// dependent of the root. Writes run as a branch transaction driven by a
/// [`TransactionExecutor`] pipeline:
///
/// ```text
/// catch → mutate → write → release → invalidate
/// ```
///
/// `catch` runs before the pipeline so that a busy container fails with a
/// plain [`RdbError::LockConflict`]. A failure inside the pipeline comes back
/// as [`RdbError::TransactionAbort`] naming the working branch and any
/// containers left locked.
pub struct ObjectRepository {
    schema: ContainerSchema,
    client: Arc<dyn RemoteStoreClient>,
    cache: SharedCache,
    config: RepoConfig,
    txn: BranchTransaction,
}

impl ObjectRepository {
    pub fn new(
        schema: ContainerSchema,
        client: Arc<dyn RemoteStoreClient>,
        cache: SharedCache,
        config: RepoConfig,
    ) -> Self {
        let txn = BranchTransaction::new(client.clone(), config.txn_config());
        Self {
            schema,
            client,
            cache,
            config,
            txn,
        }
    }

    pub fn schema(&self) -> &ContainerSchema {
        &self.schema
    }

    pub fn container(&self) -> &str {
        &self.schema.name
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Cache TTL: the config override, else the schema's, else the config
    /// default.
    pub fn ttl(&self) -> Duration {
        match (self.config.ttl_ms.get(&self.schema.name), self.schema.ttl) {
            (Some(ms), _) => Duration::from_millis(*ms),
            (None, Some(ttl)) => ttl,
            (None, None) => self.config.ttl_for(&self.schema.name),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Full container read, cached under [`root_key`].
    pub async fn snapshot(&self) -> RdbResult<Arc<ContainerSnapshot>> {
        let key = root_key(&self.schema.name);
        self.cache
            .get_or_fetch(&key, self.ttl(), &[], move || self.fetch_snapshot())
            .await
    }

    async fn fetch_snapshot(&self) -> RdbResult<Arc<ContainerSnapshot>> {
        let name = &self.schema.name;
        let path = container_path(name);
        let (objects, hash) = match self.client.read_file(&path, &self.config.base_ref).await? {
            Some((bytes, hash)) => (decode_container(name, &bytes)?, Some(hash)),
            None => (Vec::new(), None),
        };
        debug!(container = %name, records = objects.len(), "container fetched");
        Ok(Arc::new(ContainerSnapshot {
            container: name.clone(),
            objects,
            hash,
        }))
    }

    /// Every record in the container.
    pub async fn get_all(&self) -> RdbResult<Vec<ObjectRecord>> {
        Ok(self.snapshot().await?.objects.clone())
    }

    /// Cached query derived from the full read.
    async fn derived<S>(&self, key: String, select: S) -> RdbResult<Arc<ContainerSnapshot>>
    where
        S: FnOnce(&[ObjectRecord]) -> Vec<ObjectRecord>,
    {
        let root = root_key(&self.schema.name);
        self.cache
            .get_or_fetch(&key, self.ttl(), &[root.as_str()], move || async move {
                let all = self.snapshot().await?;
                Ok::<_, RdbError>(Arc::new(ContainerSnapshot {
                    container: all.container.clone(),
                    objects: select(&all.objects),
                    hash: all.hash.clone(),
                }))
            })
            .await
    }

    /// Record whose name matches case-insensitively.
    pub async fn find_by_name(&self, name: &str) -> RdbResult<Option<ObjectRecord>> {
        let key = format!("{}:name:{}", self.schema.name, name_key(name));
        let wanted = Value::String(name.to_string());
        let hit = self
            .derived(key, |all| {
                all.iter()
                    .filter(|r| attribute_matches(r, "name", &wanted))
                    .take(1)
                    .cloned()
                    .collect()
            })
            .await?;
        Ok(hit.objects.first().cloned())
    }

    /// Records whose `field` equals `value` (see
    /// [`crate::query::attribute_matches`]).
    pub async fn find_by_attribute(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> RdbResult<Vec<ObjectRecord>> {
        let value = value.into();
        let key = format!("{}:attr:{field}={value}", self.schema.name);
        let hits = self
            .derived(key, |all| {
                all.iter()
                    .filter(|r| attribute_matches(r, field, &value))
                    .cloned()
                    .collect()
            })
            .await?;
        Ok(hits.objects.clone())
    }

    /// Filter with case-insensitive substring matching, then sort and
    /// truncate per `options`.
    pub async fn search(
        &self,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> RdbResult<Vec<ObjectRecord>> {
        let encoded = serde_json::to_string(&(filters, options))
            .map_err(|e| RdbError::Serialization(e.to_string()))?;
        let key = format!("{}:search:{encoded}", self.schema.name);
        let hits = self
            .derived(key, |all| apply_search(all, filters, options))
            .await?;
        Ok(hits.objects.clone())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Append new records in one transaction.
    ///
    /// Names must be non-blank and unique within the batch and the
    /// container. `creation_date` is kept if set; `modification_date` is
    /// stamped now.
    pub async fn create_many(&self, records: Vec<ObjectRecord>) -> RdbResult<Vec<ObjectRecord>> {
        if records.is_empty() {
            return Err(RdbError::Validation("nothing to create".into()));
        }
        let mut seen = BTreeSet::new();
        for record in &records {
            validate_name(&record.name)?;
            if !seen.insert(name_key(&record.name)) {
                return Err(RdbError::Validation(format!(
                    "duplicate name '{}' in batch",
                    record.name
                )));
            }
        }
        let existing = self.snapshot().await?;
        if let Some(dup) = records
            .iter()
            .find(|r| find(&existing.objects, &r.name).is_some())
        {
            return Err(self.already_exists(&dup.name));
        }

        let now = Utc::now();
        let records: Vec<ObjectRecord> = records
            .into_iter()
            .map(|mut r| {
                r.creation_date.get_or_insert(now);
                r.touch(now);
                r
            })
            .collect();

        let container = self.schema.name.clone();
        let summary = format!("create {} record(s)", records.len());
        self.transact("create", summary, vec![container.clone()], move |meta| {
            let objects = meta.objects_mut(&container)?;
            if let Some(dup) = records
                .iter()
                .find(|r| find(objects.as_slice(), &r.name).is_some())
            {
                return Err(RdbError::Validation(format!(
                    "record '{}' already exists in {container}",
                    dup.name
                )));
            }
            objects.extend(records.iter().cloned());
            Ok(records)
        })
        .await
    }

    /// Append one record.
    pub async fn create_one(&self, record: ObjectRecord) -> RdbResult<ObjectRecord> {
        let mut created = self.create_many(vec![record]).await?;
        created
            .pop()
            .ok_or_else(|| RdbError::Validation("nothing created".into()))
    }

    /// Apply field changes to existing records in one transaction.
    ///
    /// Every changed field must be writable by `caller`; the whole batch is
    /// rejected before any remote call otherwise. Each touched record's
    /// `modification_date` is stamped.
    pub async fn batch_update(
        &self,
        updates: Vec<RecordUpdate>,
        caller: &Caller,
    ) -> RdbResult<Vec<ObjectRecord>> {
        if updates.is_empty() {
            return Err(RdbError::Validation("nothing to update".into()));
        }
        let mut seen = BTreeSet::new();
        for update in &updates {
            validate_name(&update.name)?;
            if !seen.insert(name_key(&update.name)) {
                return Err(RdbError::Validation(format!(
                    "duplicate update for '{}'",
                    update.name
                )));
            }
            if update.changes.is_empty() {
                return Err(RdbError::Validation(format!(
                    "update for '{}' has no changes",
                    update.name
                )));
            }
            if let Some(field) = update
                .changes
                .keys()
                .find(|field| !self.schema.can_write(field, caller))
            {
                warn!(container = %self.schema.name, field = %field, ?caller, "write rejected");
                return Err(RdbError::Validation(format!(
                    "field '{field}' of {} is not writable by this caller",
                    self.schema.name
                )));
            }
        }
        let existing = self.snapshot().await?;
        if let Some(missing) = updates
            .iter()
            .find(|u| find(&existing.objects, &u.name).is_none())
        {
            return Err(self.missing(&missing.name));
        }

        let container = self.schema.name.clone();
        let summary = format!("update {} record(s)", updates.len());
        self.transact("update", summary, vec![container.clone()], move |meta| {
            let now = Utc::now();
            let objects = meta.objects_mut(&container)?;
            let mut updated = Vec::with_capacity(updates.len());
            for update in updates {
                let record = find_mut(objects, &update.name).ok_or_else(|| {
                    RdbError::not_found(format!("record '{}' in {container}", update.name))
                })?;
                for (field, value) in update.changes {
                    record.set_attribute(&field, value)?;
                }
                record.touch(now);
                updated.push(record.clone());
            }
            Ok(updated)
        })
        .await
    }

    /// Set one field on one record.
    pub async fn update_one(
        &self,
        name: &str,
        field: &str,
        value: impl Into<Value>,
        caller: &Caller,
    ) -> RdbResult<ObjectRecord> {
        let update = RecordUpdate::new(name).set(field, value);
        let mut updated = self.batch_update(vec![update], caller).await?;
        updated
            .pop()
            .ok_or_else(|| self.missing(name))
    }

    /// Remove a record and strip it from the cross-reference maps of every
    /// container in `scope.to`, all in one transaction.
    pub async fn delete_one(&self, name: &str, scope: &DeleteScope) -> RdbResult<ObjectRecord> {
        validate_name(name)?;
        if scope.from != self.schema.name {
            return Err(RdbError::Validation(format!(
                "delete scope is for {}, repository is {}",
                scope.from, self.schema.name
            )));
        }
        let mut containers = vec![scope.from.clone()];
        for to in &scope.to {
            validate_component(to)?;
            if !containers.contains(to) {
                containers.push(to.clone());
            }
        }
        let existing = self.snapshot().await?;
        if find(&existing.objects, name).is_none() {
            return Err(self.missing(name));
        }

        let from = scope.from.clone();
        let linked: Vec<String> = containers[1..].to_vec();
        let name = name.to_string();
        let summary = format!("delete {name}");
        self.transact("delete", summary, containers, move |meta| {
            let objects = meta.objects_mut(&from)?;
            let index = objects
                .iter()
                .position(|r| names_equal(&r.name, &name))
                .ok_or_else(|| RdbError::not_found(format!("record '{name}' in {from}")))?;
            let removed = objects.remove(index);

            let field = link_field(&from);
            let now = Utc::now();
            for container in &linked {
                let mut stripped = 0usize;
                for record in meta.objects_mut(container)? {
                    if record.unlink(&field, &removed.name) {
                        record.touch(now);
                        stripped += 1;
                    }
                }
                debug!(container = %container, stripped, "cross-references removed");
            }
            Ok(removed)
        })
        .await
    }

    /// Cross-reference `name` here and `other_name` in `other_container`,
    /// writing both sides in one transaction.
    ///
    /// Ordinary callers may only link to containers declared in the
    /// schema's `linked_from`.
    pub async fn link(
        &self,
        name: &str,
        other_container: &str,
        other_name: &str,
        caller: &Caller,
    ) -> RdbResult<ObjectRecord> {
        validate_name(name)?;
        validate_name(other_name)?;
        validate_component(other_container)?;
        if other_container == self.schema.name && names_equal(name, other_name) {
            return Err(RdbError::Validation(format!(
                "cannot link '{name}' to itself"
            )));
        }
        if !caller.is_system() && !self.schema.linked_from.iter().any(|c| c == other_container) {
            return Err(RdbError::Validation(format!(
                "{} records cannot be linked to {other_container}",
                self.schema.name
            )));
        }
        let existing = self.snapshot().await?;
        if find(&existing.objects, name).is_none() {
            return Err(self.missing(name));
        }

        let here = self.schema.name.clone();
        let there = other_container.to_string();
        let name = name.to_string();
        let other_name = other_name.to_string();
        let summary = format!("link {name} to {there}/{other_name}");
        let containers = vec![here.clone(), there.clone()];
        self.transact("link", summary, containers, move |meta| {
            let now = Utc::now();
            let stamp = json!({ "linked_at": now.to_rfc3339() });

            let target = find_mut(meta.objects_mut(&there)?, &other_name)
                .ok_or_else(|| RdbError::not_found(format!("record '{other_name}' in {there}")))?;
            let target_name = target.name.clone();
            target.link(&link_field(&here), name.clone(), stamp.clone());
            target.touch(now);

            let record = find_mut(meta.objects_mut(&here)?, &name)
                .ok_or_else(|| RdbError::not_found(format!("record '{name}' in {here}")))?;
            record.link(&link_field(&there), target_name, stamp);
            record.touch(now);
            Ok(record.clone())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Operator helpers
    // -----------------------------------------------------------------------

    /// Whether the container is locked on the base ref.
    pub async fn is_locked(&self) -> RdbResult<bool> {
        self.txn.locks().is_locked(&self.schema.name).await
    }

    /// Remove a lock left behind by a failed transaction. Returns `false` if
    /// there was none.
    pub async fn force_unlock(&self) -> RdbResult<bool> {
        let removed = self.txn.locks().force_unlock(&self.schema.name).await?;
        if removed {
            self.refresh();
        }
        Ok(removed)
    }

    /// Drop the cached container read and every query derived from it.
    pub fn refresh(&self) -> Vec<String> {
        self.cache.invalidate(&root_key(&self.schema.name))
    }

    // -----------------------------------------------------------------------
    // Transaction plumbing
    // -----------------------------------------------------------------------

    async fn transact<T, F>(
        &self,
        op: &str,
        summary: String,
        containers: Vec<String>,
        mutate: F,
    ) -> RdbResult<T>
    where
        T: Send,
        F: FnOnce(&mut RepoMetadata) -> RdbResult<T> + Send,
    {
        let names: Vec<&str> = containers.iter().map(String::as_str).collect();
        let meta = self.txn.catch(&names).await?;
        let locks = meta.lock_set();

        let txn = &self.txn;
        let cache = &self.cache;
        let summary = summary.as_str();
        let names = names.as_slice();
        let pipeline = format!("{}:{op}", self.schema.name);

        let executor = TransactionExecutor::new(pipeline.clone())
            .then(STEP_MUTATE, move |mut ctx: WriteContext<T>| async move {
                let output = mutate(&mut ctx.meta)?;
                ctx.output = Some(output);
                Ok::<_, RdbError>(ctx)
            })
            .then(STEP_WRITE, move |mut ctx: WriteContext<T>| async move {
                txn.stage(&mut ctx.meta, summary).await?;
                Ok::<_, RdbError>(ctx)
            })
            .then(STEP_RELEASE, move |mut ctx: WriteContext<T>| async move {
                txn.release(&mut ctx.meta, summary).await?;
                Ok::<_, RdbError>(ctx)
            })
            .then(STEP_INVALIDATE, move |ctx: WriteContext<T>| async move {
                for name in names {
                    cache.invalidate(&root_key(name));
                }
                Ok::<_, RdbError>(ctx)
            });

        let start = WriteContext { meta, output: None };
        match executor.execute(start).await {
            Ok(done) => {
                let ctx = done.output;
                info!(
                    pipeline = %pipeline,
                    branch = %ctx.meta.branch,
                    change = ?ctx.meta.receipt.as_ref().map(|r| r.change_id),
                    "write committed"
                );
                ctx.output
                    .ok_or_else(|| RdbError::Validation(format!("{pipeline} produced no result")))
            }
            Err(RdbError::TransactionAbort(report)) => {
                Err(self.after_abort(*report, &locks).await)
            }
            Err(other) => Err(other),
        }
    }

    /// Clean up after a failed write pipeline and attach branch context to
    /// the report.
    async fn after_abort(&self, report: AbortReport, locks: &LockSet) -> RdbError {
        let still_locked = match report.step_name.as_str() {
            STEP_MUTATE | STEP_WRITE => self.txn.abort(locks).await,
            _ => {
                // The merge may have landed; drop cached reads either way.
                for name in locks.locks.keys() {
                    self.cache.invalidate(&root_key(name));
                }
                match report.cause.as_ref() {
                    RdbError::MergeFailed { containers, .. } => containers.clone(),
                    _ => self.still_locked(locks).await,
                }
            }
        };
        warn!(
            branch = %locks.branch,
            step = %report.step_name,
            still_locked = ?still_locked,
            "write aborted"
        );
        RdbError::TransactionAbort(Box::new(
            report.with_branch(locks.branch.clone(), still_locked),
        ))
    }

    async fn still_locked(&self, locks: &LockSet) -> Vec<String> {
        let mut held = Vec::new();
        for name in locks.locks.keys() {
            if !matches!(self.txn.locks().is_locked(name).await, Ok(false)) {
                held.push(name.clone());
            }
        }
        held
    }

    fn missing(&self, name: &str) -> RdbError {
        RdbError::not_found(format!("record '{name}' in {}", self.schema.name))
    }

    fn already_exists(&self, name: &str) -> RdbError {
        RdbError::Validation(format!(
            "record '{name}' already exists in {}",
            self.schema.name
        ))
    }
}

impl std::fmt::Debug for ObjectRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRepository")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> RdbResult<()> {
    if name.trim().is_empty() {
        return Err(RdbError::Validation("record name must not be blank".into()));
    }
    Ok(())
}

fn find<'r>(objects: &'r [ObjectRecord], name: &str) -> Option<&'r ObjectRecord> {
    objects.iter().find(|r| names_equal(&r.name, name))
}

fn find_mut<'r>(objects: &'r mut [ObjectRecord], name: &str) -> Option<&'r mut ObjectRecord> {
    objects.iter_mut().find(|r| names_equal(&r.name, name))
}
