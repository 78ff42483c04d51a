use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgConnection, Postgres, Row};
use uuid::Uuid;

use crate::database::manager::quote_identifier;
use crate::database::record::Record;
use crate::hook::registry::ResourceType;
use crate::mapper::error::MapperError;
use crate::strategy::{BatchPolicy, ReadOptions, ReadPage, Strategy};
use crate::types::{Actor, Op, UserRole};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Row filter and role expression restricting a query to what the actor may see.
///
/// `condition` and `role` may reference the resource table as `t`; placeholders in
/// them are numbered from the `first_param` given to `Linkage::scope` and filled from
/// `binds` in order.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessScope {
    pub join: String,
    pub condition: String,
    pub role: String,
    pub binds: Vec<Uuid>,
}

impl AccessScope {
    pub fn next_param(&self, first_param: usize) -> usize {
        first_param + self.binds.len()
    }
}

/// How a resource row is tied to the actors allowed to see it
#[async_trait]
pub trait Linkage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn scope(&self, actor: &Actor, rtype: &ResourceType, first_param: usize) -> Result<AccessScope, MapperError>;

    /// Uuid columns on the resource row, mirrored into the record fields on load
    fn link_columns(&self) -> &'static [&'static str] {
        &[]
    }

    /// Values for `link_columns` on insert
    fn insert_values(&self, _actor: &Actor, _record: &Record) -> Result<Vec<Uuid>, MapperError> {
        Ok(Vec::new())
    }

    async fn after_insert(
        &self,
        _db: &mut PgConnection,
        _actor: &Actor,
        _rtype: &ResourceType,
        _id: Uuid,
    ) -> Result<(), MapperError> {
        Ok(())
    }

    async fn before_delete(&self, _db: &mut PgConnection, _rtype: &ResourceType, _id: Uuid) -> Result<(), MapperError> {
        Ok(())
    }

    /// Statements creating whatever the linkage needs besides the resource table
    fn extra_ddl(&self, _rtype: &ResourceType) -> Vec<String> {
        Vec::new()
    }
}

/// Strategy over Postgres: one table per type, user fields in a JSONB `data` column
pub struct SqlStrategy<L: Linkage> {
    linkage: L,
    batch_policy: BatchPolicy,
}

impl<L: Linkage> SqlStrategy<L> {
    pub fn new(linkage: L) -> Self {
        Self {
            linkage,
            batch_policy: BatchPolicy::AllOrNothing,
        }
    }

    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    pub fn linkage(&self) -> &L {
        &self.linkage
    }

    /// Create the tables backing `rtype` if they are missing
    pub async fn install(&self, db: &mut PgConnection, rtype: &ResourceType) -> Result<(), MapperError> {
        for statement in self.ddl(rtype) {
            sqlx::query(&statement).execute(&mut *db).await?;
        }
        tracing::info!("Installed tables for type '{}' ({} linkage)", rtype.name, self.linkage.name());
        Ok(())
    }

    pub fn ddl(&self, rtype: &ResourceType) -> Vec<String> {
        let link_columns: String = self
            .linkage
            .link_columns()
            .iter()
            .map(|column| format!(",\n    {} uuid NOT NULL", quote_identifier(column)))
            .collect();
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id uuid PRIMARY KEY,\n    created_at timestamptz NOT NULL DEFAULT NOW(),\n    updated_at timestamptz NOT NULL DEFAULT NOW(),\n    data jsonb NOT NULL DEFAULT '{{}}'::jsonb{}\n)",
            quote_identifier(&rtype.table),
            link_columns
        )];
        statements.extend(self.linkage.extra_ddl(rtype));
        statements
    }

    /// Scoped SELECT; `filter` is appended to the WHERE clause and may use
    /// placeholders from `scope.next_param(1)` on
    pub fn select_sql(&self, rtype: &ResourceType, scope: &AccessScope, filter: &str, tail: &str) -> String {
        let link_columns: String = self
            .linkage
            .link_columns()
            .iter()
            .map(|column| format!(", t.{}", quote_identifier(column)))
            .collect();
        let mut sql = format!(
            "SELECT t.id, t.created_at, t.updated_at, t.data{}, ({})::smallint AS role FROM {} t",
            link_columns,
            scope.role,
            quote_identifier(&rtype.table)
        );
        if !scope.join.is_empty() {
            sql.push(' ');
            sql.push_str(&scope.join);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&scope.condition);
        if !filter.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(filter);
        }
        if !tail.is_empty() {
            sql.push(' ');
            sql.push_str(tail);
        }
        sql
    }

    /// Counts the rows a ReadMany would page through, with the same filter
    pub fn count_sql(&self, rtype: &ResourceType, scope: &AccessScope, filter: &str) -> String {
        let mut sql = format!("SELECT COUNT(*) AS count FROM {} t", quote_identifier(&rtype.table));
        if !scope.join.is_empty() {
            sql.push(' ');
            sql.push_str(&scope.join);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&scope.condition);
        if !filter.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(filter);
        }
        sql
    }

    fn record_from_row(&self, row: &PgRow) -> Result<(Record, UserRole), MapperError> {
        let id: Uuid = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        let data: Value = row.try_get("data")?;
        let role: i16 = row.try_get("role")?;

        let fields = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut record = Record::from_stored(id, created_at, updated_at, fields);
        for column in self.linkage.link_columns() {
            let value: Option<Uuid> = row.try_get(*column)?;
            if let Some(value) = value {
                record.set(*column, value.to_string());
            }
        }
        Ok((record, UserRole::from_db(role)))
    }

    /// User fields as stored: link columns live in their own columns
    fn stored_data(&self, record: &Record) -> Value {
        let mut fields = record.fields().clone();
        for column in self.linkage.link_columns() {
            fields.remove(*column);
        }
        Value::Object(fields)
    }
}

fn bind_scope<'q>(mut query: PgQuery<'q>, scope: &AccessScope) -> PgQuery<'q> {
    for value in &scope.binds {
        query = query.bind(*value);
    }
    query
}

/// Linked rows whose role still allows reading
pub fn readable_filter(scope: &AccessScope) -> String {
    format!(
        "({})::smallint BETWEEN {} AND {}",
        scope.role,
        UserRole::required_for(Op::Read).as_db(),
        UserRole::Admin.as_db()
    )
}

/// `ORDER BY` clause for ReadMany; server columns sort natively, the rest by JSON text
pub fn order_clause(options: &ReadOptions) -> String {
    let direction = if options.desc { "DESC" } else { "ASC" };
    match options.order.as_deref() {
        None => format!("ORDER BY t.created_at {}, t.id {}", direction, direction),
        Some(column @ ("id" | "created_at" | "updated_at")) => format!("ORDER BY t.{} {}", column, direction),
        Some(field) => format!("ORDER BY t.data->>'{}' {}, t.id {}", field, direction, direction),
    }
}

#[async_trait]
impl<L: Linkage> Strategy<PgConnection> for SqlStrategy<L> {
    fn name(&self) -> &'static str {
        self.linkage.name()
    }

    fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }

    fn pegged_fields(&self) -> &'static [&'static str] {
        self.linkage.link_columns()
    }

    async fn get_one_with_id_core(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        id: Uuid,
    ) -> Result<(Record, UserRole), MapperError> {
        let scope = self.linkage.scope(actor, rtype, 1)?;
        let filter = format!("t.id = ${}", scope.next_param(1));
        let sql = self.select_sql(rtype, &scope, &filter, "");

        let row = bind_scope(sqlx::query(&sql), &scope)
            .bind(id)
            .fetch_optional(&mut *db)
            .await?
            .ok_or_else(|| MapperError::not_found(&rtype.name))?;
        self.record_from_row(&row)
    }

    async fn get_many_with_ids_core(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        ids: &[Uuid],
    ) -> Result<(Vec<Record>, Vec<UserRole>), MapperError> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let scope = self.linkage.scope(actor, rtype, 1)?;
        let filter = format!("t.id = ANY(${})", scope.next_param(1));
        let sql = self.select_sql(rtype, &scope, &filter, "");

        let rows = bind_scope(sqlx::query(&sql), &scope)
            .bind(ids)
            .fetch_all(&mut *db)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        let mut roles = Vec::with_capacity(rows.len());
        for row in &rows {
            let (record, role) = self.record_from_row(row)?;
            records.push(record);
            roles.push(role);
        }
        Ok((records, roles))
    }

    async fn read_all_core(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        options: &ReadOptions,
    ) -> Result<ReadPage, MapperError> {
        let scope = self.linkage.scope(actor, rtype, 1)?;
        let next = scope.next_param(1);
        let readable = readable_filter(&scope);
        let tail = format!("{} LIMIT ${} OFFSET ${}", order_clause(options), next, next + 1);
        let sql = self.select_sql(rtype, &scope, &readable, &tail);

        let rows = bind_scope(sqlx::query(&sql), &scope)
            .bind(options.limit)
            .bind(options.offset)
            .fetch_all(&mut *db)
            .await?;
        let mut page = ReadPage::default();
        for row in &rows {
            let (record, _) = self.record_from_row(row)?;
            page.records.push(record);
        }

        if options.total_count {
            let sql = self.count_sql(rtype, &scope, &readable);
            let row = bind_scope(sqlx::query(&sql), &scope).fetch_one(&mut *db).await?;
            page.total = Some(row.try_get("count")?);
        }
        Ok(page)
    }

    async fn get_all_roles_core(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        records: &[Record],
    ) -> Result<Vec<UserRole>, MapperError> {
        let ids: Vec<Uuid> = records.iter().filter_map(Record::id).collect();
        if ids.is_empty() {
            return Ok(vec![UserRole::Invalid; records.len()]);
        }
        let scope = self.linkage.scope(actor, rtype, 1)?;
        let sql = format!(
            "SELECT t.id, ({})::smallint AS role FROM {} t {} WHERE {} AND t.id = ANY(${})",
            scope.role,
            quote_identifier(&rtype.table),
            scope.join,
            scope.condition,
            scope.next_param(1)
        );

        let rows = bind_scope(sqlx::query(&sql), &scope)
            .bind(ids.as_slice())
            .fetch_all(&mut *db)
            .await?;
        let mut by_id = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let role: i16 = row.try_get("role")?;
            by_id.insert(id, UserRole::from_db(role));
        }
        Ok(records
            .iter()
            .map(|record| {
                record
                    .id()
                    .and_then(|id| by_id.get(&id).copied())
                    .unwrap_or(UserRole::Invalid)
            })
            .collect())
    }

    async fn create_one_core(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        record: Record,
    ) -> Result<Record, MapperError> {
        let id = record.id().unwrap_or_else(Uuid::new_v4);
        let link_values = self.linkage.insert_values(actor, &record)?;
        let link_columns = self.linkage.link_columns();

        let mut columns = vec!["id".to_string(), "data".to_string()];
        columns.extend(link_columns.iter().map(|column| quote_identifier(column)));
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${}", n)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(&rtype.table),
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(id).bind(self.stored_data(&record));
        for value in link_values {
            query = query.bind(value);
        }
        query.execute(&mut *db).await?;
        self.linkage.after_insert(db, actor, rtype, id).await?;

        let (created, role) = self.get_one_with_id_core(db, actor, rtype, id).await?;
        if !role.satisfies(UserRole::required_for(Op::Create)) {
            return Err(MapperError::permission_denied(&rtype.name));
        }
        Ok(created)
    }

    async fn update_one_core(
        &self,
        db: &mut PgConnection,
        actor: &Actor,
        rtype: &ResourceType,
        record: Record,
        id: Uuid,
        _old: &Record,
    ) -> Result<Record, MapperError> {
        match record.id() {
            Some(found) if found != id => return Err(MapperError::IdMismatch { expected: id, found }),
            _ => {}
        }

        let sql = format!(
            "UPDATE {} SET data = $1, updated_at = NOW() WHERE id = $2",
            quote_identifier(&rtype.table)
        );
        let result = sqlx::query(&sql)
            .bind(self.stored_data(&record))
            .bind(id)
            .execute(&mut *db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MapperError::not_found(&rtype.name));
        }

        let (updated, _) = self.get_one_with_id_core(db, actor, rtype, id).await?;
        Ok(updated)
    }

    async fn delete_one_core(
        &self,
        db: &mut PgConnection,
        _actor: &Actor,
        rtype: &ResourceType,
        record: &Record,
        id: Uuid,
    ) -> Result<Record, MapperError> {
        self.linkage.before_delete(db, rtype, id).await?;

        let sql = format!("DELETE FROM {} WHERE id = $1", quote_identifier(&rtype.table));
        let result = sqlx::query(&sql).bind(id).execute(&mut *db).await?;
        if result.rows_affected() == 0 {
            return Err(MapperError::not_found(&rtype.name));
        }
        Ok(record.clone())
    }
}
