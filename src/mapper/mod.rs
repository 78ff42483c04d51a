// Mapper façade: one per authorization strategy, built on the generic executor

pub mod error;
pub mod executor;
pub mod job;
pub mod patch;


use std::fmt;
use std::sync::Arc;

use sqlx::PgConnection;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::database::record::Record;
use crate::hook::context::{Cargo, EndPoint, HookData};
use crate::hook::registry::{Registry, TypeEntry};
use crate::hook::resolver::HandlerResolver;
use crate::hook::stage::Stage;
use crate::hook::traits::DbHandle;
use crate::strategy::{BatchPolicy, LinkTableStrategy, OrganizationStrategy, OwnershipStrategy, ReadOptions, Strategy};
use crate::types::{Cardinality, Op, UserRole};

pub use error::MapperError;
pub use job::{BatchOpJob, OpJob, PatchFailure};

use executor::{authorize, batch_op_core, ensure_unique_ids, op_core, order_by_ids, read_core, run_stage};
use patch::apply_patch;

/// One element of a `PatchMany` request
#[derive(Debug, Clone)]
pub struct IdPatch {
    pub id: Uuid,
    /// Raw RFC 6902 document
    pub document: Vec<u8>,
}

impl IdPatch {
    pub fn new(id: Uuid, document: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            document: document.into(),
        }
    }
}

/// Result of a mapper operation.
///
/// Keeps the resolver that served the operation, so the post-commit stage runs on
/// the handler instances that already saw B and A.
pub struct MapperRet<DB: DbHandle> {
    pub data: HookData,
    /// Visible rows ignoring paging, when ReadMany was asked for it
    pub total: Option<i64>,
    /// Elements dropped under `BatchPolicy::PartialPatch`
    pub failures: Vec<PatchFailure>,
    resolver: HandlerResolver<DB>,
}

impl<DB: DbHandle> fmt::Debug for MapperRet<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperRet")
            .field("data", &self.data)
            .field("total", &self.total)
            .field("failures", &self.failures)
            .field("op", &self.resolver.op())
            .finish_non_exhaustive()
    }
}

impl<DB: DbHandle> MapperRet<DB> {
    pub(crate) fn new(data: HookData, resolver: HandlerResolver<DB>) -> Self {
        Self {
            data,
            total: None,
            failures: Vec::new(),
            resolver,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.data.records
    }

    pub fn roles(&self) -> &[UserRole] {
        &self.data.roles
    }

    /// The single object of a `*One` operation
    pub fn record(&self) -> Option<&Record> {
        self.data.records.first()
    }

    pub fn cargo(&self) -> &Cargo {
        &self.data.cargo
    }

    pub fn resolver(&self) -> &HandlerResolver<DB> {
        &self.resolver
    }

    /// Drop the envelope without running the post-commit stage
    pub fn into_records(self) -> Vec<Record> {
        self.data.records
    }

    /// Run the `T` stage once the caller has committed. Consumes the envelope so the
    /// stage can run at most once.
    pub async fn after_transact(mut self, ep: &EndPoint) -> Result<HookData, MapperError> {
        if ep.op != self.resolver.op() {
            return Err(MapperError::HookContract(format!(
                "post-commit stage for {} run on a {} result",
                ep.op,
                self.resolver.op()
            )));
        }
        let dispatcher = self.resolver.dispatcher();
        dispatcher
            .dispatch_after_transact(&self.data, ep, &mut self.resolver)
            .await?;
        Ok(self.data)
    }
}

/// CRUD entry point for one authorization strategy
pub struct Mapper<S, DB: DbHandle> {
    registry: Arc<Registry<DB>>,
    strategy: S,
    config: PipelineConfig,
}

pub type OwnershipMapper = Mapper<OwnershipStrategy, PgConnection>;
pub type OrganizationMapper = Mapper<OrganizationStrategy, PgConnection>;
pub type LinkTableMapper = Mapper<LinkTableStrategy, PgConnection>;

impl<S, DB> Mapper<S, DB>
where
    S: Strategy<DB>,
    DB: DbHandle,
{
    pub fn new(registry: Arc<Registry<DB>>, strategy: S) -> Self {
        Self {
            registry,
            strategy,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn registry(&self) -> &Arc<Registry<DB>> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ========================================
    // Create
    // ========================================

    pub async fn create_one(&self, db: &mut DB, ep: &EndPoint, record: Record) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Create, Cardinality::One)?;
        let job = OpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data: HookData::new(vec![record], vec![UserRole::Admin]),
            old: None,
            id: None,
        };
        self.finish(ep, op_core(db, job).await)
    }

    pub async fn create_many(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        records: Vec<Record>,
    ) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Create, Cardinality::Many)?;
        self.ensure_batch_size(records.len())?;
        if records.is_empty() {
            return Ok(MapperRet::new(HookData::default(), resolver));
        }

        let roles = vec![UserRole::Admin; records.len()];
        let job = BatchOpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data: HookData::new(records, roles),
            olds: Vec::new(),
            ids: Vec::new(),
            failures: Vec::new(),
        };
        self.finish(ep, batch_op_core(db, job).await)
    }

    // ========================================
    // Read
    // ========================================

    pub async fn read_one(&self, db: &mut DB, ep: &EndPoint, id: Uuid) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Read, Cardinality::One)?;
        let (record, role) = self.load_one(db, ep, &entry, id).await?;
        self.finish(ep, read_core(db, ep, resolver, HookData::new(vec![record], vec![role])).await)
    }

    /// Page through every object the actor can read. Paging and order come from
    /// the endpoint's URL parameters.
    pub async fn read_many(&self, db: &mut DB, ep: &EndPoint) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Read, Cardinality::Many)?;
        let options = ReadOptions::from_params(&ep.url_params, &self.config)?;
        let page = self.strategy.read_all_core(db, &ep.actor, &entry.rtype, &options).await?;
        let roles = self
            .strategy
            .get_all_roles_core(db, &ep.actor, &entry.rtype, &page.records)
            .await?;
        if roles.len() != page.records.len() {
            return Err(MapperError::StrategyInternal(format!(
                "strategy returned {} roles for {} objects",
                roles.len(),
                page.records.len()
            )));
        }

        let required = UserRole::required_for(Op::Read);
        let (records, roles): (Vec<Record>, Vec<UserRole>) = page
            .records
            .into_iter()
            .zip(roles)
            .filter(|(_, role)| role.satisfies(required))
            .unzip();

        let result = read_core(db, ep, resolver, HookData::new(records, roles))
            .await
            .map(|mut ret| {
                ret.total = page.total;
                ret
            });
        self.finish(ep, result)
    }

    // ========================================
    // Update
    // ========================================

    pub async fn update_one(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        id: Uuid,
        record: Record,
    ) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Update, Cardinality::One)?;
        let (old, role) = self.load_one(db, ep, &entry, id).await?;
        if let Some(found) = record.id().filter(|found| *found != id) {
            return Err(MapperError::IdMismatch { expected: id, found });
        }

        let job = OpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data: HookData::new(vec![record], vec![role]),
            old: Some(old),
            id: Some(id),
        };
        self.finish(ep, op_core(db, job).await)
    }

    /// Every record must carry its id
    pub async fn update_many(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        records: Vec<Record>,
    ) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Update, Cardinality::Many)?;
        self.ensure_batch_size(records.len())?;
        if records.is_empty() {
            return Ok(MapperRet::new(HookData::default(), resolver));
        }

        let ids = records
            .iter()
            .map(|record| record.id().ok_or(MapperError::IdEmpty))
            .collect::<Result<Vec<Uuid>, MapperError>>()?;
        let (olds, roles) = self.load_many(db, ep, &entry, &ids).await?;

        let job = BatchOpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data: HookData::new(records, roles),
            olds,
            ids,
            failures: Vec::new(),
        };
        self.finish(ep, batch_op_core(db, job).await)
    }

    // ========================================
    // Patch
    // ========================================

    /// J sees the stored object; the document is applied afterwards, so a
    /// malformed document still lets J run but stops before B.
    pub async fn patch_one(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        id: Uuid,
        document: &[u8],
    ) -> Result<MapperRet<DB>, MapperError> {
        let (entry, mut resolver) = self.begin(ep, Op::Patch, Cardinality::One)?;
        let (old, role) = self.load_one(db, ep, &entry, id).await?;

        let mut data = HookData::new(vec![old.clone()], vec![role]);
        run_stage(Stage::BeforeApply, db, &mut data, ep, &mut resolver).await?;
        data.records[0] = apply_patch(&data.records[0], document)?;

        let job = OpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data,
            old: Some(old),
            id: Some(id),
        };
        self.finish(ep, op_core(db, job).await)
    }

    /// One document per id. Under `BatchPolicy::PartialPatch` a document that
    /// cannot be applied drops only its element and is reported in `failures`.
    pub async fn patch_many(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        patches: Vec<IdPatch>,
    ) -> Result<MapperRet<DB>, MapperError> {
        let (entry, mut resolver) = self.begin(ep, Op::Patch, Cardinality::Many)?;
        self.ensure_batch_size(patches.len())?;
        if patches.is_empty() {
            return Ok(MapperRet::new(HookData::default(), resolver));
        }

        let ids: Vec<Uuid> = patches.iter().map(|patch| patch.id).collect();
        let (olds, roles) = self.load_many(db, ep, &entry, &ids).await?;

        let mut data = HookData::new(olds.clone(), roles);
        run_stage(Stage::BeforeApply, db, &mut data, ep, &mut resolver).await?;

        let policy = self.strategy.batch_policy();
        let mut keep = Vec::with_capacity(patches.len());
        let mut patched = Vec::with_capacity(patches.len());
        let mut failures = Vec::new();
        for (target, patch) in data.records.iter().zip(&patches) {
            match apply_patch(target, &patch.document) {
                Ok(record) => {
                    keep.push(true);
                    patched.push(record);
                }
                Err(MapperError::PatchSyntax(message)) if policy == BatchPolicy::PartialPatch => {
                    tracing::warn!("Dropping patch for {} {}: {}", entry.rtype.name, patch.id, message);
                    keep.push(false);
                    failures.push(PatchFailure {
                        id: patch.id,
                        error: message,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let HookData { roles, cargo, .. } = data;
        let mut kept_roles = Vec::with_capacity(patched.len());
        let mut kept_olds = Vec::with_capacity(patched.len());
        let mut kept_ids = Vec::with_capacity(patched.len());
        for (((kept, role), old), id) in keep.into_iter().zip(roles).zip(olds).zip(ids) {
            if kept {
                kept_roles.push(role);
                kept_olds.push(old);
                kept_ids.push(id);
            }
        }
        let data = HookData {
            records: patched,
            roles: kept_roles,
            cargo,
        };

        if data.is_empty() {
            let mut ret = MapperRet::new(data, resolver);
            ret.failures = failures;
            return self.finish(ep, Ok(ret));
        }

        let job = BatchOpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data,
            olds: kept_olds,
            ids: kept_ids,
            failures,
        };
        self.finish(ep, batch_op_core(db, job).await)
    }

    // ========================================
    // Delete
    // ========================================

    pub async fn delete_one(&self, db: &mut DB, ep: &EndPoint, id: Uuid) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Delete, Cardinality::One)?;
        let (old, role) = self.load_one(db, ep, &entry, id).await?;

        let job = OpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data: HookData::new(vec![old.clone()], vec![role]),
            old: Some(old),
            id: Some(id),
        };
        self.finish(ep, op_core(db, job).await)
    }

    pub async fn delete_many(&self, db: &mut DB, ep: &EndPoint, ids: Vec<Uuid>) -> Result<MapperRet<DB>, MapperError> {
        let (entry, resolver) = self.begin(ep, Op::Delete, Cardinality::Many)?;
        self.ensure_batch_size(ids.len())?;
        if ids.is_empty() {
            return Ok(MapperRet::new(HookData::default(), resolver));
        }

        let (olds, roles) = self.load_many(db, ep, &entry, &ids).await?;
        let job = BatchOpJob {
            strategy: &self.strategy,
            rtype: &entry.rtype,
            ep,
            resolver,
            data: HookData::new(olds.clone(), roles),
            olds,
            ids,
            failures: Vec::new(),
        };
        self.finish(ep, batch_op_core(db, job).await)
    }

    // ========================================
    // Shared steps
    // ========================================

    /// Validate the endpoint, look up the type and run its entry guard
    fn begin(
        &self,
        ep: &EndPoint,
        op: Op,
        cardinality: Cardinality,
    ) -> Result<(Arc<TypeEntry<DB>>, HandlerResolver<DB>), MapperError> {
        if ep.op != op || ep.cardinality != cardinality {
            return Err(MapperError::InvalidInput(format!(
                "endpoint describes {} {:?}, called as {} {:?}",
                ep.op, ep.cardinality, op, cardinality
            )));
        }

        let entry = self.registry.get(&ep.type_name)?;
        if !entry.dispatcher.guard(ep) {
            tracing::warn!("Entry guard refused {} on {} for {}", op, ep.type_name, ep.actor.user_id);
            return Err(MapperError::permission_denied(&ep.type_name));
        }

        tracing::info!(
            "Mapper: {} {:?} on {} via {} strategy (request {})",
            op,
            cardinality,
            ep.type_name,
            self.strategy.name(),
            ep.request_id
        );
        let resolver = HandlerResolver::new(Arc::clone(&entry), op);
        Ok((entry, resolver))
    }

    fn ensure_batch_size(&self, size: usize) -> Result<(), MapperError> {
        if size > self.config.max_batch_size {
            return Err(MapperError::BatchTooLarge {
                size,
                limit: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    async fn load_one(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        entry: &TypeEntry<DB>,
        id: Uuid,
    ) -> Result<(Record, UserRole), MapperError> {
        let (record, role) = self
            .strategy
            .get_one_with_id_core(db, &ep.actor, &entry.rtype, id)
            .await?;
        authorize(role, ep.op, &entry.rtype.name)?;
        Ok((record, role))
    }

    /// Load, authorize and order by the caller's ids
    async fn load_many(
        &self,
        db: &mut DB,
        ep: &EndPoint,
        entry: &TypeEntry<DB>,
        ids: &[Uuid],
    ) -> Result<(Vec<Record>, Vec<UserRole>), MapperError> {
        ensure_unique_ids(ids)?;
        let (records, roles) = self
            .strategy
            .get_many_with_ids_core(db, &ep.actor, &entry.rtype, ids)
            .await?;
        let (records, roles) = order_by_ids(ids, records, roles, &entry.rtype.name)?;
        for role in &roles {
            authorize(*role, ep.op, &entry.rtype.name)?;
        }
        Ok((records, roles))
    }

    fn finish(
        &self,
        ep: &EndPoint,
        result: Result<MapperRet<DB>, MapperError>,
    ) -> Result<MapperRet<DB>, MapperError> {
        match &result {
            Ok(ret) => tracing::info!(
                "Mapper: {} {:?} on {} finished with {} objects",
                ep.op,
                ep.cardinality,
                ep.type_name,
                ret.records().len()
            ),
            Err(e) => tracing::info!("Mapper: {} {:?} on {} failed: {}", ep.op, ep.cardinality, ep.type_name, e),
        }
        result
    }
}
