// In-memory stand-ins for the database, a strategy and recording hooks, so the
// pipeline can be exercised without Postgres.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::database::record::Record;
use crate::hook::context::{BatchHookPointData, EndPoint, HookData, HookPointData};
use crate::hook::legacy::{LegacyBatchHooks, LegacyCapabilities, LegacyMethod, LegacyModelHooks};
use crate::hook::registry::{HandlerRegistration, ResourceType};
use crate::hook::stage::Stage;
use crate::hook::traits::{Handler, HookRejection, HookResult};
use crate::mapper::error::MapperError;
use crate::strategy::{BatchPolicy, ReadOptions, ReadPage, Strategy};
use crate::types::{Actor, Op, UserRole};

/// Field that makes `MemoryStrategy` fail to persist a record
pub const FAIL_MARKER: &str = "fail_persist";

#[derive(Debug, Clone)]
struct Row {
    type_name: String,
    record: Record,
    grants: HashMap<Uuid, UserRole>,
    seq: u64,
}

#[derive(Debug, Clone, Default)]
struct Store {
    rows: HashMap<Uuid, Row>,
    next_seq: u64,
}

impl Store {
    fn insert(&mut self, type_name: &str, record: Record, grants: HashMap<Uuid, UserRole>) {
        let Some(id) = record.id() else {
            return;
        };
        self.next_seq += 1;
        self.rows.insert(
            id,
            Row {
                type_name: type_name.to_string(),
                record,
                grants,
                seq: self.next_seq,
            },
        );
    }

    fn visible(&self, type_name: &str, id: Uuid, user: Uuid) -> Option<(&Row, UserRole)> {
        let row = self.rows.get(&id).filter(|row| row.type_name == type_name)?;
        row.grants.get(&user).map(|role| (row, *role))
    }
}

/// Committed state shared by every transaction begun on it
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    shared: Arc<Mutex<Store>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the committed state into a new transaction
    pub fn begin(&self) -> MockTx {
        MockTx {
            store: self.shared.lock().unwrap().clone(),
            shared: Arc::clone(&self.shared),
            writes: Vec::new(),
        }
    }

    /// Insert a committed row owned by `owner`
    pub fn seed(&self, type_name: &str, owner: Uuid, fields: Value) -> Record {
        let mut record = Record::from_api_input(fields).unwrap();
        record.set_id(Uuid::new_v4());
        record.set("owner_id", owner.to_string());
        let now = Utc::now();
        record.set_timestamps(now, now);
        self.shared
            .lock()
            .unwrap()
            .insert(type_name, record.clone(), HashMap::from([(owner, UserRole::Admin)]));
        record
    }

    pub fn grant(&self, id: Uuid, user: Uuid, role: UserRole) {
        if let Some(row) = self.shared.lock().unwrap().rows.get_mut(&id) {
            row.grants.insert(user, role);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Record> {
        self.shared.lock().unwrap().rows.get(&id).map(|row| row.record.clone())
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.shared
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|row| row.type_name == type_name)
            .count()
    }
}

/// Transaction over a `MemoryDb`: writes stay private until `commit`
pub struct MockTx {
    store: Store,
    shared: Arc<Mutex<Store>>,
    writes: Vec<String>,
}

impl MockTx {
    pub fn commit(self) {
        *self.shared.lock().unwrap() = self.store;
    }

    pub fn rollback(self) {}

    /// Writes made so far, as `"<op> <id>"`
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    pub fn get(&self, id: Uuid) -> Option<&Record> {
        self.store.rows.get(&id).map(|row| &row.record)
    }
}

/// Ownership semantics over `MockTx`: the creator is `Admin`, others need a grant
#[derive(Debug, Default)]
pub struct MemoryStrategy {
    policy: BatchPolicy,
}

impl MemoryStrategy {
    pub fn with_policy(policy: BatchPolicy) -> Self {
        Self { policy }
    }
}

fn check_marker(record: &Record) -> Result<(), MapperError> {
    if record.get(FAIL_MARKER).is_some() {
        return Err(MapperError::StrategyInternal("injected persist failure".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Strategy<MockTx> for MemoryStrategy {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn batch_policy(&self) -> BatchPolicy {
        self.policy
    }

    fn pegged_fields(&self) -> &'static [&'static str] {
        &["owner_id"]
    }

    async fn get_one_with_id_core(
        &self,
        db: &mut MockTx,
        actor: &Actor,
        rtype: &ResourceType,
        id: Uuid,
    ) -> Result<(Record, UserRole), MapperError> {
        db.store
            .visible(&rtype.name, id, actor.user_id)
            .map(|(row, role)| (row.record.clone(), role))
            .ok_or_else(|| MapperError::not_found(&rtype.name))
    }

    async fn get_many_with_ids_core(
        &self,
        db: &mut MockTx,
        actor: &Actor,
        rtype: &ResourceType,
        ids: &[Uuid],
    ) -> Result<(Vec<Record>, Vec<UserRole>), MapperError> {
        // reverse to make sure callers do their own ordering
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| db.store.visible(&rtype.name, *id, actor.user_id))
            .map(|(row, role)| (row.record.clone(), role))
            .unzip())
    }

    async fn read_all_core(
        &self,
        db: &mut MockTx,
        actor: &Actor,
        rtype: &ResourceType,
        options: &ReadOptions,
    ) -> Result<ReadPage, MapperError> {
        let mut rows: Vec<&Row> = db
            .store
            .rows
            .values()
            .filter(|row| {
                row.type_name == rtype.name
                    && row
                        .grants
                        .get(&actor.user_id)
                        .is_some_and(|role| role.satisfies(UserRole::required_for(Op::Read)))
            })
            .collect();
        rows.sort_by_key(|row| row.seq);
        if options.desc {
            rows.reverse();
        }

        let total = options.total_count.then_some(rows.len() as i64);
        let records = rows
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .map(|row| row.record.clone())
            .collect();
        Ok(ReadPage { records, total })
    }

    async fn get_all_roles_core(
        &self,
        db: &mut MockTx,
        actor: &Actor,
        rtype: &ResourceType,
        records: &[Record],
    ) -> Result<Vec<UserRole>, MapperError> {
        Ok(records
            .iter()
            .map(|record| {
                record
                    .id()
                    .and_then(|id| db.store.visible(&rtype.name, id, actor.user_id))
                    .map(|(_, role)| role)
                    .unwrap_or(UserRole::Invalid)
            })
            .collect())
    }

    async fn create_one_core(
        &self,
        db: &mut MockTx,
        actor: &Actor,
        rtype: &ResourceType,
        mut record: Record,
    ) -> Result<Record, MapperError> {
        check_marker(&record)?;
        let id = record.id().unwrap_or_else(Uuid::new_v4);
        if db.store.rows.contains_key(&id) {
            return Err(MapperError::StrategyInternal(format!("duplicate id {}", id)));
        }

        let now = Utc::now();
        record.set_id(id).set_timestamps(now, now);
        record.set("owner_id", actor.user_id.to_string());
        db.store
            .insert(&rtype.name, record.clone(), HashMap::from([(actor.user_id, UserRole::Admin)]));
        db.writes.push(format!("create {}", id));
        Ok(record)
    }

    async fn update_one_core(
        &self,
        db: &mut MockTx,
        _actor: &Actor,
        rtype: &ResourceType,
        mut record: Record,
        id: Uuid,
        old: &Record,
    ) -> Result<Record, MapperError> {
        check_marker(&record)?;
        if let Some(found) = record.id().filter(|found| *found != id) {
            return Err(MapperError::IdMismatch { expected: id, found });
        }
        let row = db
            .store
            .rows
            .get_mut(&id)
            .filter(|row| row.type_name == rtype.name)
            .ok_or_else(|| MapperError::not_found(&rtype.name))?;

        record.set_id(id);
        if let Some(created_at) = old.created_at() {
            record.set_timestamps(created_at, Utc::now());
        }
        row.record = record.clone();
        db.writes.push(format!("update {}", id));
        Ok(record)
    }

    async fn delete_one_core(
        &self,
        db: &mut MockTx,
        _actor: &Actor,
        rtype: &ResourceType,
        _record: &Record,
        id: Uuid,
    ) -> Result<Record, MapperError> {
        let row = db
            .store
            .rows
            .remove(&id)
            .ok_or_else(|| MapperError::not_found(&rtype.name))?;
        db.writes.push(format!("delete {}", id));
        Ok(row.record)
    }
}

/// Shared, ordered log of hook calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Handler that logs `"<name>:<stage>"` for every stage it sees. At `T` it logs the
/// stages this same instance saw before, e.g. `"audit:T(BA)"`.
pub struct Recorder {
    name: &'static str,
    log: CallLog,
    reject_at: Option<Stage>,
    seen: String,
}

impl Recorder {
    pub fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            reject_at: None,
            seen: String::new(),
        }
    }

    fn record(&mut self, stage: Stage) -> HookResult {
        if stage == Stage::AfterTransact {
            self.log.push(format!("{}:T({})", self.name, self.seen));
        } else {
            self.log.push(format!("{}:{}", self.name, stage));
        }
        self.seen.push(stage.letter());

        if self.reject_at == Some(stage) {
            return Err(HookRejection::new(format!("{} refused", self.name)).with_status(422));
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<MockTx> for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn before_apply(&mut self, _tx: &mut MockTx, _data: &mut HookData, _ep: &EndPoint) -> HookResult {
        self.record(Stage::BeforeApply)
    }

    async fn before(&mut self, _tx: &mut MockTx, _data: &mut HookData, _ep: &EndPoint) -> HookResult {
        self.record(Stage::Before)
    }

    async fn after(&mut self, _tx: &mut MockTx, _data: &mut HookData, _ep: &EndPoint) -> HookResult {
        self.record(Stage::After)
    }

    async fn after_transact(&mut self, _data: &HookData, _ep: &EndPoint) -> HookResult {
        self.record(Stage::AfterTransact)
    }
}

pub fn recorder(name: &'static str, ops: &str, stages: &str, log: &CallLog) -> HandlerRegistration<MockTx> {
    registration(name, ops, stages, log, None)
}

/// Like `recorder`, but rejects (status 422) at `reject_at`
pub fn rejecting(
    name: &'static str,
    ops: &str,
    stages: &str,
    reject_at: Stage,
    log: &CallLog,
) -> HandlerRegistration<MockTx> {
    registration(name, ops, stages, log, Some(reject_at))
}

fn registration(
    name: &'static str,
    ops: &str,
    stages: &str,
    log: &CallLog,
    reject_at: Option<Stage>,
) -> HandlerRegistration<MockTx> {
    let log = log.clone();
    HandlerRegistration::new(name, ops, stages, move || {
        Box::new(Recorder {
            reject_at,
            ..Recorder::new(name, &log)
        }) as Box<dyn Handler<MockTx>>
    })
    .unwrap()
}

fn all_callbacks(guard: bool) -> LegacyCapabilities {
    LegacyMethod::ALL
        .iter()
        .copied()
        .filter(|method| guard || *method != LegacyMethod::GuardApiEntry)
        .fold(LegacyCapabilities::none(), LegacyCapabilities::with)
}

/// Legacy single-object hooks implementing every callback, logged as `"model:<Method>"`
pub struct RecordingModelHooks {
    log: CallLog,
    refuse_entry: bool,
}

impl RecordingModelHooks {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            refuse_entry: false,
        }
    }

    /// Also declares `GuardAPIEntry`, which refuses every request
    pub fn refusing_entry(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            refuse_entry: true,
        }
    }

    fn record(&self, method: LegacyMethod) -> HookResult {
        self.log.push(format!("model:{}", method.name()));
        Ok(())
    }
}

#[async_trait]
impl LegacyModelHooks<MockTx> for RecordingModelHooks {
    fn capabilities(&self) -> LegacyCapabilities {
        all_callbacks(self.refuse_entry)
    }

    fn guard_api_entry(&self, _ep: &EndPoint) -> bool {
        self.log.push(format!("model:{}", LegacyMethod::GuardApiEntry.name()));
        !self.refuse_entry
    }

    async fn before_cupd(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>, _op: Op) -> HookResult {
        self.record(LegacyMethod::BeforeCupd)
    }

    async fn before_create(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::BeforeCreate)
    }

    async fn before_update(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::BeforeUpdate)
    }

    async fn before_patch_apply(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::BeforePatchApply)
    }

    async fn before_patch(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::BeforePatch)
    }

    async fn before_delete(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::BeforeDelete)
    }

    async fn after_crupd(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>, _op: Op) -> HookResult {
        self.record(LegacyMethod::AfterCrupd)
    }

    async fn after_create(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::AfterCreate)
    }

    async fn after_read(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::AfterRead)
    }

    async fn after_update(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::AfterUpdate)
    }

    async fn after_patch(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::AfterPatch)
    }

    async fn after_delete(&self, _tx: &mut MockTx, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::AfterDelete)
    }
}

/// Legacy batch hooks logging `"batch:<Method>(<count>)"`; only the create and
/// generic callbacks are declared
pub struct RecordingBatchHooks {
    log: CallLog,
}

impl RecordingBatchHooks {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone() }
    }

    fn record(&self, method: LegacyMethod, count: usize) -> HookResult {
        self.log.push(format!("batch:{}({})", method.name(), count));
        Ok(())
    }
}

#[async_trait]
impl LegacyBatchHooks<MockTx> for RecordingBatchHooks {
    fn capabilities(&self) -> LegacyCapabilities {
        LegacyCapabilities::of(&[
            LegacyMethod::BeforeCupd,
            LegacyMethod::BeforeCreate,
            LegacyMethod::AfterCrupd,
            LegacyMethod::AfterCreate,
        ])
    }

    async fn before_cupd(
        &self,
        _tx: &mut MockTx,
        records: &mut [Record],
        _hp: &mut BatchHookPointData<'_>,
        _op: Op,
    ) -> HookResult {
        self.record(LegacyMethod::BeforeCupd, records.len())
    }

    async fn before_create(&self, _tx: &mut MockTx, records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::BeforeCreate, records.len())
    }

    async fn after_crupd(
        &self,
        _tx: &mut MockTx,
        records: &mut [Record],
        _hp: &mut BatchHookPointData<'_>,
        _op: Op,
    ) -> HookResult {
        self.record(LegacyMethod::AfterCrupd, records.len())
    }

    async fn after_create(&self, _tx: &mut MockTx, records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        self.record(LegacyMethod::AfterCreate, records.len())
    }
}
