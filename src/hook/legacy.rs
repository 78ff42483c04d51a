use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::database::record::Record;
use crate::hook::context::{BatchHookPointData, EndPoint, HookData, HookPointData};
use crate::hook::dispatch::{finish_hook, Convention, HookDispatcher};
use crate::hook::resolver::HandlerResolver;
use crate::hook::stage::Stage;
use crate::hook::traits::{DbHandle, HookResult};
use crate::mapper::error::MapperError;
use crate::types::{Op, UserRole};

/// Well-known callbacks of the per-model hook convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyMethod {
    GuardApiEntry,
    BeforeCupd,
    BeforeCreate,
    BeforeUpdate,
    BeforePatchApply,
    BeforePatch,
    BeforeDelete,
    AfterCrupd,
    AfterCreate,
    AfterRead,
    AfterUpdate,
    AfterPatch,
    AfterDelete,
}

impl LegacyMethod {
    pub const ALL: [LegacyMethod; 13] = [
        LegacyMethod::GuardApiEntry,
        LegacyMethod::BeforeCupd,
        LegacyMethod::BeforeCreate,
        LegacyMethod::BeforeUpdate,
        LegacyMethod::BeforePatchApply,
        LegacyMethod::BeforePatch,
        LegacyMethod::BeforeDelete,
        LegacyMethod::AfterCrupd,
        LegacyMethod::AfterCreate,
        LegacyMethod::AfterRead,
        LegacyMethod::AfterUpdate,
        LegacyMethod::AfterPatch,
        LegacyMethod::AfterDelete,
    ];

    /// Conventional method name, used in logs and rejection errors
    pub fn name(self) -> &'static str {
        match self {
            LegacyMethod::GuardApiEntry => "GuardAPIEntry",
            LegacyMethod::BeforeCupd => "BeforeCUPDDB",
            LegacyMethod::BeforeCreate => "BeforeCreateDB",
            LegacyMethod::BeforeUpdate => "BeforeUpdateDB",
            LegacyMethod::BeforePatchApply => "BeforePatchApplyDB",
            LegacyMethod::BeforePatch => "BeforePatchDB",
            LegacyMethod::BeforeDelete => "BeforeDeleteDB",
            LegacyMethod::AfterCrupd => "AfterCRUPDDB",
            LegacyMethod::AfterCreate => "AfterCreateDB",
            LegacyMethod::AfterRead => "AfterReadDB",
            LegacyMethod::AfterUpdate => "AfterUpdateDB",
            LegacyMethod::AfterPatch => "AfterPatchDB",
            LegacyMethod::AfterDelete => "AfterDeleteDB",
        }
    }

    /// Callbacks that run at `stage` for `op`, generic one first
    pub fn sequence(stage: Stage, op: Op) -> &'static [LegacyMethod] {
        use LegacyMethod::*;

        match (stage, op) {
            (Stage::BeforeApply, Op::Patch) => &[BeforePatchApply],
            (Stage::Before, Op::Create) => &[BeforeCupd, BeforeCreate],
            (Stage::Before, Op::Update) => &[BeforeCupd, BeforeUpdate],
            (Stage::Before, Op::Patch) => &[BeforeCupd, BeforePatch],
            (Stage::Before, Op::Delete) => &[BeforeCupd, BeforeDelete],
            (Stage::After, Op::Create) => &[AfterCrupd, AfterCreate],
            (Stage::After, Op::Read) => &[AfterCrupd, AfterRead],
            (Stage::After, Op::Update) => &[AfterCrupd, AfterUpdate],
            (Stage::After, Op::Patch) => &[AfterCrupd, AfterPatch],
            (Stage::After, Op::Delete) => &[AfterCrupd, AfterDelete],
            _ => &[],
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Set of callbacks a legacy hook object actually implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyCapabilities(u16);

impl LegacyCapabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(methods: &[LegacyMethod]) -> Self {
        methods.iter().copied().fold(Self::none(), Self::with)
    }

    pub fn with(self, method: LegacyMethod) -> Self {
        Self(self.0 | method.bit())
    }

    pub fn contains(self, method: LegacyMethod) -> bool {
        self.0 & method.bit() != 0
    }
}

/// Probed once per type at registry build time: which callbacks to call, in which
/// order, for each (stage, op) pair.
#[derive(Debug, Clone, Default)]
pub struct LegacyDispatchTable {
    entries: HashMap<(Stage, Op), Vec<LegacyMethod>>,
    guard: bool,
}

impl LegacyDispatchTable {
    pub fn probe(capabilities: LegacyCapabilities) -> Self {
        let mut entries = HashMap::new();
        for stage in [Stage::BeforeApply, Stage::Before, Stage::After] {
            for op in Op::ALL {
                let methods: Vec<LegacyMethod> = LegacyMethod::sequence(stage, op)
                    .iter()
                    .copied()
                    .filter(|method| capabilities.contains(*method))
                    .collect();
                if !methods.is_empty() {
                    entries.insert((stage, op), methods);
                }
            }
        }
        Self {
            entries,
            guard: capabilities.contains(LegacyMethod::GuardApiEntry),
        }
    }

    pub fn methods(&self, stage: Stage, op: Op) -> &[LegacyMethod] {
        self.entries.get(&(stage, op)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_guard(&self) -> bool {
        self.guard
    }
}

/// Single-object callbacks attached to a resource type.
///
/// Implementors list what they override in `capabilities()`; anything not listed is
/// never called.
#[async_trait]
pub trait LegacyModelHooks<DB: DbHandle>: Send + Sync {
    fn capabilities(&self) -> LegacyCapabilities;

    /// Return false to refuse the request before anything is loaded
    fn guard_api_entry(&self, _ep: &EndPoint) -> bool {
        true
    }

    async fn before_cupd(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>, _op: Op) -> HookResult {
        Ok(())
    }

    async fn before_create(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_update(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    /// Sees the stored object before the patch document is applied
    async fn before_patch_apply(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_patch(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_delete(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_crupd(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>, _op: Op) -> HookResult {
        Ok(())
    }

    async fn after_create(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_read(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_update(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_patch(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_delete(&self, _tx: &mut DB, _record: &mut Record, _hp: &mut HookPointData<'_>) -> HookResult {
        Ok(())
    }
}

/// Batch callbacks registered for a resource type. Same shape as the model
/// callbacks, but every call receives the whole slice in caller order.
#[async_trait]
pub trait LegacyBatchHooks<DB: DbHandle>: Send + Sync {
    fn capabilities(&self) -> LegacyCapabilities;

    async fn before_cupd(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>, _op: Op) -> HookResult {
        Ok(())
    }

    async fn before_create(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_update(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_patch_apply(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_patch(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn before_delete(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_crupd(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>, _op: Op) -> HookResult {
        Ok(())
    }

    async fn after_create(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_read(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_update(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_patch(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }

    async fn after_delete(&self, _tx: &mut DB, _records: &mut [Record], _hp: &mut BatchHookPointData<'_>) -> HookResult {
        Ok(())
    }
}

async fn invoke_model<DB: DbHandle>(
    hooks: &dyn LegacyModelHooks<DB>,
    method: LegacyMethod,
    tx: &mut DB,
    record: &mut Record,
    hp: &mut HookPointData<'_>,
) -> HookResult {
    let op = hp.ep.op;
    match method {
        LegacyMethod::GuardApiEntry => Ok(()),
        LegacyMethod::BeforeCupd => hooks.before_cupd(tx, record, hp, op).await,
        LegacyMethod::BeforeCreate => hooks.before_create(tx, record, hp).await,
        LegacyMethod::BeforeUpdate => hooks.before_update(tx, record, hp).await,
        LegacyMethod::BeforePatchApply => hooks.before_patch_apply(tx, record, hp).await,
        LegacyMethod::BeforePatch => hooks.before_patch(tx, record, hp).await,
        LegacyMethod::BeforeDelete => hooks.before_delete(tx, record, hp).await,
        LegacyMethod::AfterCrupd => hooks.after_crupd(tx, record, hp, op).await,
        LegacyMethod::AfterCreate => hooks.after_create(tx, record, hp).await,
        LegacyMethod::AfterRead => hooks.after_read(tx, record, hp).await,
        LegacyMethod::AfterUpdate => hooks.after_update(tx, record, hp).await,
        LegacyMethod::AfterPatch => hooks.after_patch(tx, record, hp).await,
        LegacyMethod::AfterDelete => hooks.after_delete(tx, record, hp).await,
    }
}

async fn invoke_batch<DB: DbHandle>(
    hooks: &dyn LegacyBatchHooks<DB>,
    method: LegacyMethod,
    tx: &mut DB,
    records: &mut [Record],
    hp: &mut BatchHookPointData<'_>,
) -> HookResult {
    let op = hp.ep.op;
    match method {
        LegacyMethod::GuardApiEntry => Ok(()),
        LegacyMethod::BeforeCupd => hooks.before_cupd(tx, records, hp, op).await,
        LegacyMethod::BeforeCreate => hooks.before_create(tx, records, hp).await,
        LegacyMethod::BeforeUpdate => hooks.before_update(tx, records, hp).await,
        LegacyMethod::BeforePatchApply => hooks.before_patch_apply(tx, records, hp).await,
        LegacyMethod::BeforePatch => hooks.before_patch(tx, records, hp).await,
        LegacyMethod::BeforeDelete => hooks.before_delete(tx, records, hp).await,
        LegacyMethod::AfterCrupd => hooks.after_crupd(tx, records, hp, op).await,
        LegacyMethod::AfterCreate => hooks.after_create(tx, records, hp).await,
        LegacyMethod::AfterRead => hooks.after_read(tx, records, hp).await,
        LegacyMethod::AfterUpdate => hooks.after_update(tx, records, hp).await,
        LegacyMethod::AfterPatch => hooks.after_patch(tx, records, hp).await,
        LegacyMethod::AfterDelete => hooks.after_delete(tx, records, hp).await,
    }
}

/// Dispatcher for types with no registered handlers.
///
/// Single-object operations go to the model callbacks, batch operations to the batch
/// callbacks. There is no `T` stage in this convention.
pub struct LegacyDispatcher<DB: DbHandle> {
    model: Option<(Arc<dyn LegacyModelHooks<DB>>, LegacyDispatchTable)>,
    batch: Option<(Arc<dyn LegacyBatchHooks<DB>>, LegacyDispatchTable)>,
    slow_hook_threshold: Duration,
}

impl<DB: DbHandle> LegacyDispatcher<DB> {
    pub fn new(
        model: Option<Arc<dyn LegacyModelHooks<DB>>>,
        batch: Option<Arc<dyn LegacyBatchHooks<DB>>>,
        slow_hook_threshold: Duration,
    ) -> Self {
        Self {
            model: model.map(|hooks| {
                let table = LegacyDispatchTable::probe(hooks.capabilities());
                (hooks, table)
            }),
            batch: batch.map(|hooks| {
                let table = LegacyDispatchTable::probe(hooks.capabilities());
                (hooks, table)
            }),
            slow_hook_threshold,
        }
    }
}

#[async_trait]
impl<DB: DbHandle> HookDispatcher<DB> for LegacyDispatcher<DB> {
    fn convention(&self) -> Convention {
        Convention::Legacy
    }

    fn guard(&self, ep: &EndPoint) -> bool {
        match &self.model {
            Some((hooks, table)) if table.has_guard() => hooks.guard_api_entry(ep),
            _ => true,
        }
    }

    async fn dispatch(
        &self,
        stage: Stage,
        tx: &mut DB,
        data: &mut HookData,
        ep: &EndPoint,
        _resolver: &mut HandlerResolver<DB>,
    ) -> Result<(), MapperError> {
        let HookData { records, roles, cargo } = data;

        if ep.is_batch() {
            let Some((hooks, table)) = &self.batch else {
                return Ok(());
            };
            for method in table.methods(stage, ep.op) {
                let mut hp = BatchHookPointData {
                    ep,
                    roles: roles.as_slice(),
                    cargo: &mut *cargo,
                };
                let started = Instant::now();
                let result = invoke_batch(hooks.as_ref(), *method, tx, records.as_mut_slice(), &mut hp).await;
                finish_hook(method.name(), stage, started, self.slow_hook_threshold, result)?;
            }
            return Ok(());
        }

        let Some((hooks, table)) = &self.model else {
            return Ok(());
        };
        let Some(record) = records.first_mut() else {
            return Ok(());
        };
        let role = roles.first().copied().unwrap_or(UserRole::Invalid);
        for method in table.methods(stage, ep.op) {
            let mut hp = HookPointData {
                ep,
                role,
                cargo: &mut *cargo,
            };
            let started = Instant::now();
            let result = invoke_model(hooks.as_ref(), *method, tx, record, &mut hp).await;
            finish_hook(method.name(), stage, started, self.slow_hook_threshold, result)?;
        }
        Ok(())
    }

    async fn dispatch_after_transact(
        &self,
        _data: &HookData,
        ep: &EndPoint,
        _resolver: &mut HandlerResolver<DB>,
    ) -> Result<(), MapperError> {
        tracing::trace!("No post-commit stage for legacy type {}", ep.type_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_put_generic_callback_first() {
        assert_eq!(
            LegacyMethod::sequence(Stage::Before, Op::Update),
            &[LegacyMethod::BeforeCupd, LegacyMethod::BeforeUpdate]
        );
        assert_eq!(
            LegacyMethod::sequence(Stage::After, Op::Read),
            &[LegacyMethod::AfterCrupd, LegacyMethod::AfterRead]
        );
        assert!(LegacyMethod::sequence(Stage::Before, Op::Read).is_empty());
        assert!(LegacyMethod::sequence(Stage::BeforeApply, Op::Update).is_empty());
        assert!(LegacyMethod::sequence(Stage::AfterTransact, Op::Create).is_empty());
    }

    #[test]
    fn probe_keeps_only_declared_callbacks() {
        let caps = LegacyCapabilities::of(&[
            LegacyMethod::BeforeCreate,
            LegacyMethod::AfterCrupd,
            LegacyMethod::BeforePatchApply,
        ]);
        let table = LegacyDispatchTable::probe(caps);

        assert_eq!(table.methods(Stage::Before, Op::Create), &[LegacyMethod::BeforeCreate]);
        assert!(table.methods(Stage::Before, Op::Update).is_empty());
        assert_eq!(table.methods(Stage::After, Op::Delete), &[LegacyMethod::AfterCrupd]);
        assert_eq!(
            table.methods(Stage::BeforeApply, Op::Patch),
            &[LegacyMethod::BeforePatchApply]
        );
        assert!(!table.has_guard());
        assert!(LegacyDispatchTable::probe(caps.with(LegacyMethod::GuardApiEntry)).has_guard());
    }

    #[test]
    fn method_names_follow_convention() {
        let names: Vec<&str> = LegacyMethod::ALL.iter().map(|m| m.name()).collect();
        assert!(names.contains(&"BeforeCUPDDB"));
        assert!(names.contains(&"AfterCRUPDDB"));
        assert!(names.contains(&"BeforePatchApplyDB"));
        assert_eq!(names.len(), 13);
    }
}
