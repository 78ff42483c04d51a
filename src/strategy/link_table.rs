use async_trait::async_trait;
use uuid::Uuid;

use crate::database::record::Record;
use crate::hook::registry::ResourceType;
use crate::mapper::error::MapperError;
use crate::strategy::sql::{AccessScope, Linkage, SqlStrategy};
use crate::types::{Actor, UserRole};

pub const USER_COLUMN: &str = "user_id";

/// Each row links to exactly one user through its `user_id` column; that user is
/// admin, nobody else sees the row.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkTableLinkage;

pub type LinkTableStrategy = SqlStrategy<LinkTableLinkage>;

#[async_trait]
impl Linkage for LinkTableLinkage {
    fn name(&self) -> &'static str {
        "link-table"
    }

    fn scope(&self, actor: &Actor, _rtype: &ResourceType, first_param: usize) -> Result<AccessScope, MapperError> {
        Ok(AccessScope {
            join: String::new(),
            condition: format!("t.user_id = ${}", first_param),
            role: UserRole::Admin.as_db().to_string(),
            binds: vec![actor.user_id],
        })
    }

    fn link_columns(&self) -> &'static [&'static str] {
        &[USER_COLUMN]
    }

    fn insert_values(&self, actor: &Actor, _record: &Record) -> Result<Vec<Uuid>, MapperError> {
        Ok(vec![actor.user_id])
    }
}
