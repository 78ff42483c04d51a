// Authorization + persistence strategies
//
// The executor only sees the role or error a strategy returns, never how it was
// computed, so variants are interchangeable behind `Strategy`.

pub mod link_table;
pub mod organization;
pub mod ownership;
pub mod sql;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::database::manager::validate_identifier;
use crate::database::record::Record;
use crate::hook::registry::ResourceType;
use crate::hook::traits::DbHandle;
use crate::mapper::error::MapperError;
use crate::types::{Actor, UserRole};

pub use link_table::{LinkTableLinkage, LinkTableStrategy};
pub use organization::{OrganizationLinkage, OrganizationStrategy};
pub use ownership::{OwnershipLinkage, OwnershipStrategy};
pub use sql::{AccessScope, Linkage, SqlStrategy};

/// What happens to a `PatchMany` element whose patch document cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Any malformed document fails the whole batch
    #[default]
    AllOrNothing,
    /// Malformed documents drop only their element, which is reported back
    PartialPatch,
}

/// Paging and ordering for ReadMany
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub offset: i64,
    pub limit: i64,
    /// Field to order by; `None` orders by creation time
    pub order: Option<String>,
    pub desc: bool,
    /// Also return the number of visible rows ignoring paging
    pub total_count: bool,
}

impl ReadOptions {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            offset: 0,
            limit: config.default_page_limit,
            order: None,
            desc: false,
            total_count: false,
        }
    }

    /// Parse `offset`, `limit`, `order`, `desc` and `totalcount` from query
    /// parameters. The limit is capped at `max_page_limit`.
    pub fn from_params(params: &HashMap<String, String>, config: &PipelineConfig) -> Result<Self, MapperError> {
        let mut options = Self::new(config);

        if let Some(raw) = params.get("offset") {
            options.offset = parse_non_negative("offset", raw)?;
        }
        if let Some(raw) = params.get("limit") {
            let limit = parse_non_negative("limit", raw)?;
            if limit > config.max_page_limit {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, config.max_page_limit);
            }
            options.limit = limit.min(config.max_page_limit);
        }
        if let Some(raw) = params.get("order") {
            let mut parts = raw.split_whitespace();
            if let Some(field) = parts.next() {
                validate_identifier(field).map_err(|_| MapperError::InvalidInput(format!("Invalid order field: {}", field)))?;
                options.order = Some(field.to_string());
                options.desc = parts.next().is_some_and(|dir| dir.eq_ignore_ascii_case("desc"));
            }
        }
        if let Some(raw) = params.get("desc") {
            options.desc = parse_flag(raw);
        }
        if let Some(raw) = params.get("totalcount") {
            options.total_count = parse_flag(raw);
        }
        Ok(options)
    }
}

fn parse_non_negative(name: &str, raw: &str) -> Result<i64, MapperError> {
    match raw.trim().parse::<i64>() {
        Ok(value) if value >= 0 => Ok(value),
        _ => Err(MapperError::InvalidInput(format!("{} must be a non-negative integer", name))),
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "" | "1" | "true" | "yes")
}

/// One page of a ReadMany. Roles are resolved separately with `get_all_roles_core`.
#[derive(Debug, Default)]
pub struct ReadPage {
    pub records: Vec<Record>,
    pub total: Option<i64>,
}

/// Authorization and persistence primitives for one authorization model.
///
/// Loads return only rows the actor is linked to; an unlinked row is `NotFound`.
/// The role returned with a visible row is checked by the caller, not here.
/// Every mutation returns the object as reloaded from storage.
#[async_trait]
pub trait Strategy<DB: DbHandle>: Send + Sync {
    fn name(&self) -> &'static str;

    fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::AllOrNothing
    }

    /// Linkage fields the strategy owns; callers can never change them on update
    fn pegged_fields(&self) -> &'static [&'static str] {
        &[]
    }

    async fn get_one_with_id_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        id: Uuid,
    ) -> Result<(Record, UserRole), MapperError>;

    /// Visible rows among `ids`, in any order, roles aligned with records
    async fn get_many_with_ids_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        ids: &[Uuid],
    ) -> Result<(Vec<Record>, Vec<UserRole>), MapperError>;

    async fn read_all_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        options: &ReadOptions,
    ) -> Result<ReadPage, MapperError>;

    /// One role per record, in the order given
    async fn get_all_roles_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        records: &[Record],
    ) -> Result<Vec<UserRole>, MapperError>;

    /// Insert `record`, link it to the actor, and return it reloaded
    async fn create_one_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        record: Record,
    ) -> Result<Record, MapperError>;

    async fn update_one_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        record: Record,
        id: Uuid,
        old: &Record,
    ) -> Result<Record, MapperError>;

    /// Delete the row and its linkage; returns the object as it was
    async fn delete_one_core(
        &self,
        db: &mut DB,
        actor: &Actor,
        rtype: &ResourceType,
        record: &Record,
        id: Uuid,
    ) -> Result<Record, MapperError>;
}
