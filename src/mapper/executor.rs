use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::database::record::Record;
use crate::hook::context::{EndPoint, HookData};
use crate::hook::registry::ResourceType;
use crate::hook::resolver::HandlerResolver;
use crate::hook::stage::Stage;
use crate::hook::traits::DbHandle;
use crate::mapper::error::MapperError;
use crate::mapper::job::{BatchOpJob, OpJob};
use crate::mapper::MapperRet;
use crate::strategy::Strategy;
use crate::types::{Op, UserRole};

/// Run one stage through the type's dispatcher, then check the hooks left the
/// in-flight slice the size it was.
pub(crate) async fn run_stage<DB: DbHandle>(
    stage: Stage,
    tx: &mut DB,
    data: &mut HookData,
    ep: &EndPoint,
    resolver: &mut HandlerResolver<DB>,
) -> Result<(), MapperError> {
    let expected = data.records.len();
    let dispatcher = resolver.dispatcher();
    dispatcher.dispatch(stage, tx, data, ep, resolver).await?;

    if data.records.len() != expected {
        return Err(MapperError::HookContract(format!(
            "stage {} changed the object count from {} to {}",
            stage,
            expected,
            data.records.len()
        )));
    }
    Ok(())
}

/// Pegged fields for a type: the strategy's linkage plus the type's immutable fields
fn pegged_fields<'a>(linkage: &'static [&'static str], immutable: &'a [String]) -> Vec<&'a str> {
    linkage
        .iter()
        .copied()
        .chain(immutable.iter().map(String::as_str))
        .collect()
}

/// Persist one object; the result is the strategy's reloaded copy
async fn persist_one<S, DB>(
    strategy: &S,
    db: &mut DB,
    ep: &EndPoint,
    rtype: &ResourceType,
    record: Record,
    id: Option<Uuid>,
    old: Option<&Record>,
) -> Result<Record, MapperError>
where
    S: Strategy<DB>,
    DB: DbHandle,
{
    let actor = &ep.actor;
    match ep.op {
        Op::Create => strategy.create_one_core(db, actor, rtype, record).await,
        Op::Update | Op::Patch => {
            let id = id.ok_or(MapperError::IdEmpty)?;
            let old = old.ok_or_else(|| MapperError::not_found(&rtype.name))?;
            strategy.update_one_core(db, actor, rtype, record, id, old).await
        }
        Op::Delete => {
            let id = id.ok_or(MapperError::IdEmpty)?;
            strategy.delete_one_core(db, actor, rtype, &record, id).await
        }
        Op::Read => Ok(record),
    }
}

/// Single-object mutation: B, persist, swap in the reloaded object, A.
///
/// Never commits or rolls back; any error leaves that to the caller's transaction.
pub async fn op_core<S, DB>(db: &mut DB, job: OpJob<'_, S, DB>) -> Result<MapperRet<DB>, MapperError>
where
    S: Strategy<DB>,
    DB: DbHandle,
{
    let OpJob {
        strategy,
        rtype,
        ep,
        mut resolver,
        mut data,
        old,
        id,
    } = job;

    if data.records.len() != 1 {
        return Err(MapperError::HookContract(format!(
            "single-object operation started with {} objects",
            data.records.len()
        )));
    }
    if let Some(old) = &old {
        let pegged = pegged_fields(strategy.pegged_fields(), &rtype.immutable_fields);
        data.records[0].preserve_from(old, &pegged);
    }

    run_stage(Stage::Before, db, &mut data, ep, &mut resolver).await?;

    let record = std::mem::take(&mut data.records[0]);
    let persisted = persist_one(strategy, db, ep, rtype, record, id, old.as_ref())
        .await
        .map_err(|e| {
            tracing::error!("Persist failed for {} {}: {}", ep.op, rtype.name, e);
            e
        })?;
    data.records[0] = persisted;

    run_stage(Stage::After, db, &mut data, ep, &mut resolver).await?;

    Ok(MapperRet::new(data, resolver))
}

/// Batch mutation with the same stage order as `op_core`. B and A see the whole
/// slice in caller order; each element is persisted on its own and the first
/// failure aborts the batch with no compensation for earlier elements.
pub async fn batch_op_core<S, DB>(db: &mut DB, job: BatchOpJob<'_, S, DB>) -> Result<MapperRet<DB>, MapperError>
where
    S: Strategy<DB>,
    DB: DbHandle,
{
    let BatchOpJob {
        strategy,
        rtype,
        ep,
        mut resolver,
        mut data,
        olds,
        ids,
        failures,
    } = job;

    let total = data.records.len();
    let has_olds = !olds.is_empty();
    if (has_olds && olds.len() != total) || (!ids.is_empty() && ids.len() != total) {
        return Err(MapperError::HookContract(format!(
            "batch of {} objects has {} stored versions and {} ids",
            total,
            olds.len(),
            ids.len()
        )));
    }
    if has_olds {
        let pegged = pegged_fields(strategy.pegged_fields(), &rtype.immutable_fields);
        for (record, old) in data.records.iter_mut().zip(&olds) {
            record.preserve_from(old, &pegged);
        }
    }

    run_stage(Stage::Before, db, &mut data, ep, &mut resolver).await?;

    for index in 0..total {
        let record = std::mem::take(&mut data.records[index]);
        let id = ids.get(index).copied();
        let persisted = persist_one(strategy, db, ep, rtype, record, id, olds.get(index))
            .await
            .map_err(|e| {
                tracing::error!(
                    "Persist failed for {} {} element {} of {}: {}",
                    ep.op,
                    rtype.name,
                    index,
                    total,
                    e
                );
                e
            })?;
        data.records[index] = persisted;
    }

    run_stage(Stage::After, db, &mut data, ep, &mut resolver).await?;

    let mut ret = MapperRet::new(data, resolver);
    ret.failures = failures;
    Ok(ret)
}

/// Read path: objects are already loaded and authorized, only A runs
pub async fn read_core<DB: DbHandle>(
    db: &mut DB,
    ep: &EndPoint,
    mut resolver: HandlerResolver<DB>,
    mut data: HookData,
) -> Result<MapperRet<DB>, MapperError> {
    if !data.is_empty() {
        run_stage(Stage::After, db, &mut data, ep, &mut resolver).await?;
    }
    Ok(MapperRet::new(data, resolver))
}

/// Fail with `PermissionDenied` when `role` is below what `op` needs
pub fn authorize(role: UserRole, op: Op, type_name: &str) -> Result<(), MapperError> {
    let required = UserRole::required_for(op);
    if role.satisfies(required) {
        return Ok(());
    }
    tracing::debug!("Role {:?} below {:?} for {} on {}", role, required, op, type_name);
    Err(MapperError::permission_denied(type_name))
}

/// Reject batches naming the same id twice
pub fn ensure_unique_ids(ids: &[Uuid]) -> Result<(), MapperError> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(MapperError::InvalidInput(format!("Duplicate id in batch: {}", id)));
        }
    }
    Ok(())
}

/// Arrange loaded rows in the caller's id order. A missing id means the row does
/// not exist or is not visible to the actor.
pub fn order_by_ids(
    ids: &[Uuid],
    records: Vec<Record>,
    roles: Vec<UserRole>,
    type_name: &str,
) -> Result<(Vec<Record>, Vec<UserRole>), MapperError> {
    if records.len() != roles.len() {
        return Err(MapperError::StrategyInternal(format!(
            "strategy returned {} objects but {} roles",
            records.len(),
            roles.len()
        )));
    }

    let mut by_id: HashMap<Uuid, (Record, UserRole)> = HashMap::with_capacity(records.len());
    for (record, role) in records.into_iter().zip(roles) {
        if let Some(id) = record.id() {
            by_id.insert(id, (record, role));
        }
    }

    let mut ordered_records = Vec::with_capacity(ids.len());
    let mut ordered_roles = Vec::with_capacity(ids.len());
    for id in ids {
        let (record, role) = by_id.remove(id).ok_or_else(|| MapperError::not_found(type_name))?;
        ordered_records.push(record);
        ordered_roles.push(role);
    }
    Ok((ordered_records, ordered_roles))
}
