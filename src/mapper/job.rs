use uuid::Uuid;

use crate::database::record::Record;
use crate::hook::context::{EndPoint, HookData};
use crate::hook::registry::ResourceType;
use crate::hook::resolver::HandlerResolver;
use crate::hook::traits::DbHandle;

/// Everything one single-object operation needs, consumed by `op_core`
pub struct OpJob<'a, S, DB: DbHandle> {
    pub strategy: &'a S,
    pub rtype: &'a ResourceType,
    pub ep: &'a EndPoint,
    pub resolver: HandlerResolver<DB>,
    /// Exactly one record in flight
    pub data: HookData,
    /// Stored version, for update, patch and delete
    pub old: Option<Record>,
    /// Target id, for update, patch and delete
    pub id: Option<Uuid>,
}

/// Batch counterpart of `OpJob`. `olds` and `ids` are aligned with `data.records`
/// and follow the caller's order.
pub struct BatchOpJob<'a, S, DB: DbHandle> {
    pub strategy: &'a S,
    pub rtype: &'a ResourceType,
    pub ep: &'a EndPoint,
    pub resolver: HandlerResolver<DB>,
    pub data: HookData,
    pub olds: Vec<Record>,
    pub ids: Vec<Uuid>,
    /// Elements already dropped before the job was built
    pub failures: Vec<PatchFailure>,
}

/// A `PatchMany` element dropped under `BatchPolicy::PartialPatch`
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatchFailure {
    pub id: Uuid,
    pub error: String,
}
