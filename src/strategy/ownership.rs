use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::manager::quote_identifier;
use crate::hook::registry::ResourceType;
use crate::mapper::error::MapperError;
use crate::strategy::sql::{AccessScope, Linkage, SqlStrategy};
use crate::types::{Actor, UserRole};

/// Per-type ownership table `<table>_ownerships(model_id, user_id, role)`.
/// The creator is recorded as admin; others see what they were granted.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipLinkage;

pub type OwnershipStrategy = SqlStrategy<OwnershipLinkage>;

impl OwnershipLinkage {
    pub fn ownership_table(rtype: &ResourceType) -> String {
        quote_identifier(&format!("{}_ownerships", rtype.table))
    }
}

#[async_trait]
impl Linkage for OwnershipLinkage {
    fn name(&self) -> &'static str {
        "ownership"
    }

    fn scope(&self, actor: &Actor, rtype: &ResourceType, first_param: usize) -> Result<AccessScope, MapperError> {
        Ok(AccessScope {
            join: format!("JOIN {} o ON o.model_id = t.id", Self::ownership_table(rtype)),
            condition: format!("o.user_id = ${}", first_param),
            role: "o.role".to_string(),
            binds: vec![actor.user_id],
        })
    }

    async fn after_insert(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        id: Uuid,
    ) -> Result<(), MapperError> {
        let sql = format!(
            "INSERT INTO {} (model_id, user_id, role) VALUES ($1, $2, $3)",
            Self::ownership_table(rtype)
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(actor.user_id)
            .bind(UserRole::Admin.as_db())
            .execute(&mut *db)
            .await?;
        Ok(())
    }

    async fn before_delete(&self, db: &mut PgConnection, rtype: &ResourceType, id: Uuid) -> Result<(), MapperError> {
        let sql = format!("DELETE FROM {} WHERE model_id = $1", Self::ownership_table(rtype));
        sqlx::query(&sql).bind(id).execute(&mut *db).await?;
        Ok(())
    }

    fn extra_ddl(&self, rtype: &ResourceType) -> Vec<String> {
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    model_id uuid NOT NULL REFERENCES {}(id) ON DELETE CASCADE,\n    user_id uuid NOT NULL,\n    role smallint NOT NULL,\n    PRIMARY KEY (model_id, user_id)\n)",
            Self::ownership_table(rtype),
            quote_identifier(&rtype.table)
        )]
    }
}
