use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use super::request::{records_from_body, response_body, PatchItem, RequestActor};
use super::AppState;
use crate::database::manager::DatabaseManager;
use crate::database::record::Record;
use crate::error::ApiError;
use crate::hook::context::EndPoint;
use crate::mapper::{IdPatch, MapperError, MapperRet};
use crate::types::{Cardinality, Op};

type ApiResult = Result<Json<Value>, ApiError>;

/// Commit or roll back depending on the mapper result, then run the post-commit
/// stage and render the response.
async fn complete(
    tx: Transaction<'static, Postgres>,
    ep: &EndPoint,
    result: Result<MapperRet<PgConnection>, MapperError>,
) -> ApiResult {
    let ret = match result {
        Ok(ret) => ret,
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!("Rollback failed for request {}: {}", ep.request_id, rollback);
            }
            return Err(e.into());
        }
    };
    tx.commit().await?;

    let total = ret.total;
    let failures = ret.failures.clone();
    let data = ret.after_transact(ep).await?;
    Ok(Json(response_body(ep.cardinality, &data, total, &failures)))
}

/// GET /api/:type - Read every object the caller can see
pub async fn collection_get(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    RequestActor(actor): RequestActor,
) -> ApiResult {
    let ep = EndPoint::new(Op::Read, Cardinality::Many, type_name, actor).with_params(params);
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.read_many(&mut *tx, &ep).await;
    complete(tx, &ep, result).await
}

/// POST /api/:type - Create one object, or many when the body is an array
pub async fn collection_post(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    RequestActor(actor): RequestActor,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut tx = state.pool.begin().await?;
    let response = if body.is_array() {
        let ep = EndPoint::new(Op::Create, Cardinality::Many, type_name, actor);
        let records = records_from_body(body)?;
        let result = state.mapper.create_many(&mut *tx, &ep, records).await;
        complete(tx, &ep, result).await?
    } else {
        let ep = EndPoint::new(Op::Create, Cardinality::One, type_name, actor);
        let record = Record::from_api_input(body)?;
        let result = state.mapper.create_one(&mut *tx, &ep, record).await;
        complete(tx, &ep, result).await?
    };
    Ok((StatusCode::CREATED, response))
}

/// PUT /api/:type - Replace many objects; each must carry its id
pub async fn collection_put(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    RequestActor(actor): RequestActor,
    Json(body): Json<Value>,
) -> ApiResult {
    let ep = EndPoint::new(Op::Update, Cardinality::Many, type_name, actor);
    let records = records_from_body(body)?;
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.update_many(&mut *tx, &ep, records).await;
    complete(tx, &ep, result).await
}

/// PATCH /api/:type - Body: `[{ "id": ..., "patch": [RFC 6902 operations] }]`
pub async fn collection_patch(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    RequestActor(actor): RequestActor,
    Json(items): Json<Vec<PatchItem>>,
) -> ApiResult {
    let ep = EndPoint::new(Op::Patch, Cardinality::Many, type_name, actor);
    let patches = items
        .into_iter()
        .map(PatchItem::into_id_patch)
        .collect::<Result<Vec<IdPatch>, ApiError>>()?;
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.patch_many(&mut *tx, &ep, patches).await;
    complete(tx, &ep, result).await
}

/// DELETE /api/:type - Body: array of ids
pub async fn collection_delete(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    RequestActor(actor): RequestActor,
    Json(ids): Json<Vec<Uuid>>,
) -> ApiResult {
    let ep = EndPoint::new(Op::Delete, Cardinality::Many, type_name, actor);
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.delete_many(&mut *tx, &ep, ids).await;
    complete(tx, &ep, result).await
}

/// GET /api/:type/:id
pub async fn object_get(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    RequestActor(actor): RequestActor,
) -> ApiResult {
    let ep = EndPoint::new(Op::Read, Cardinality::One, type_name, actor);
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.read_one(&mut *tx, &ep, id).await;
    complete(tx, &ep, result).await
}

/// PUT /api/:type/:id
pub async fn object_put(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    RequestActor(actor): RequestActor,
    Json(body): Json<Value>,
) -> ApiResult {
    let ep = EndPoint::new(Op::Update, Cardinality::One, type_name, actor);
    let record = Record::from_api_input(body)?;
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.update_one(&mut *tx, &ep, id, record).await;
    complete(tx, &ep, result).await
}

/// PATCH /api/:type/:id - Body is the raw RFC 6902 document
pub async fn object_patch(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    RequestActor(actor): RequestActor,
    document: Bytes,
) -> ApiResult {
    let ep = EndPoint::new(Op::Patch, Cardinality::One, type_name, actor);
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.patch_one(&mut *tx, &ep, id, &document).await;
    complete(tx, &ep, result).await
}

/// DELETE /api/:type/:id
pub async fn object_delete(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    RequestActor(actor): RequestActor,
) -> ApiResult {
    let ep = EndPoint::new(Op::Delete, Cardinality::One, type_name, actor);
    let mut tx = state.pool.begin().await?;
    let result = state.mapper.delete_one(&mut *tx, &ep, id).await;
    complete(tx, &ep, result).await
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "types": state.mapper.registry().types().count()
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
