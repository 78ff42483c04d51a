use async_trait::async_trait;
use uuid::Uuid;

use crate::database::record::Record;
use crate::hook::registry::ResourceType;
use crate::mapper::error::MapperError;
use crate::strategy::sql::{AccessScope, Linkage, SqlStrategy};
use crate::types::Actor;

pub const ORGANIZATION_COLUMN: &str = "organization_id";

/// Rows carry an `organization_id`; the actor's role is their membership role in
/// `organization_members`.
///
/// When partitioned, the actor must also name an organization and only that
/// organization's rows are visible, whatever else the actor belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationLinkage {
    partitioned: bool,
}

pub type OrganizationStrategy = SqlStrategy<OrganizationLinkage>;

impl SqlStrategy<OrganizationLinkage> {
    pub fn organization() -> Self {
        SqlStrategy::new(OrganizationLinkage::new())
    }

    pub fn partitioned_organization() -> Self {
        SqlStrategy::new(OrganizationLinkage::partitioned())
    }
}

impl OrganizationLinkage {
    pub fn new() -> Self {
        Self { partitioned: false }
    }

    pub fn partitioned() -> Self {
        Self { partitioned: true }
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    fn partition_key(&self, actor: &Actor, rtype: &ResourceType) -> Result<Option<Uuid>, MapperError> {
        match (self.partitioned, actor.org_id) {
            (false, _) => Ok(None),
            (true, Some(org_id)) => Ok(Some(org_id)),
            (true, None) => Err(MapperError::permission_denied(&rtype.name)),
        }
    }
}

#[async_trait]
impl Linkage for OrganizationLinkage {
    fn name(&self) -> &'static str {
        if self.partitioned {
            "organization-partitioned"
        } else {
            "organization"
        }
    }

    fn scope(&self, actor: &Actor, rtype: &ResourceType, first_param: usize) -> Result<AccessScope, MapperError> {
        let mut scope = AccessScope {
            join: "JOIN organization_members m ON m.organization_id = t.organization_id".to_string(),
            condition: format!("m.user_id = ${}", first_param),
            role: "m.role".to_string(),
            binds: vec![actor.user_id],
        };
        if let Some(org_id) = self.partition_key(actor, rtype)? {
            scope.condition.push_str(&format!(" AND t.organization_id = ${}", first_param + 1));
            scope.binds.push(org_id);
        }
        Ok(scope)
    }

    fn link_columns(&self) -> &'static [&'static str] {
        &[ORGANIZATION_COLUMN]
    }

    /// The record names its organization, falling back to the actor's. Partitioned
    /// types may only create inside the actor's organization.
    fn insert_values(&self, actor: &Actor, record: &Record) -> Result<Vec<Uuid>, MapperError> {
        let requested = record.uuid_field(ORGANIZATION_COLUMN)?;
        let org_id = match (requested, actor.org_id) {
            (Some(requested), Some(current)) if self.partitioned && requested != current => {
                return Err(MapperError::InvalidInput(format!(
                    "{} must match the request organization",
                    ORGANIZATION_COLUMN
                )));
            }
            (Some(requested), _) => requested,
            (None, Some(current)) => current,
            (None, None) => {
                return Err(MapperError::InvalidInput(format!("{} is required", ORGANIZATION_COLUMN)));
            }
        };
        if self.partitioned && actor.org_id.is_none() {
            return Err(MapperError::InvalidInput(format!("{} is required", ORGANIZATION_COLUMN)));
        }
        Ok(vec![org_id])
    }

    fn extra_ddl(&self, _rtype: &ResourceType) -> Vec<String> {
        vec!["CREATE TABLE IF NOT EXISTS organization_members (\n    organization_id uuid NOT NULL,\n    user_id uuid NOT NULL,\n    role smallint NOT NULL,\n    PRIMARY KEY (organization_id, user_id)\n)".to_string()]
    }
}
