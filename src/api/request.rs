use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::database::record::Record;
use crate::error::ApiError;
use crate::hook::context::HookData;
use crate::mapper::{IdPatch, PatchFailure};
use crate::types::{Actor, Cardinality};

pub const USER_HEADER: &str = "x-user-id";
pub const ORG_HEADER: &str = "x-org-id";
pub const SCOPE_HEADER: &str = "x-scope";

/// Caller identity taken from request headers. Authenticating those headers is
/// left to whatever sits in front of this service.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(RequestActor)
    }
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .map(Some)
        .ok_or_else(|| ApiError::bad_request(format!("Header {} must be a UUID", name)))
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let user_id = header_uuid(headers, USER_HEADER)?
        .ok_or_else(|| ApiError::bad_request(format!("Missing {} header", USER_HEADER)))?;

    let mut actor = Actor::new(user_id);
    if let Some(org_id) = header_uuid(headers, ORG_HEADER)? {
        actor = actor.with_org(org_id);
    }
    if let Some(scope) = headers.get(SCOPE_HEADER).and_then(|v| v.to_str().ok()) {
        actor = actor.with_scope(scope);
    }
    Ok(actor)
}

/// One element of a collection PATCH body
#[derive(Debug, Deserialize)]
pub struct PatchItem {
    pub id: Uuid,
    pub patch: Value,
}

impl PatchItem {
    pub fn into_id_patch(self) -> Result<IdPatch, ApiError> {
        let document = serde_json::to_vec(&self.patch).map_err(|e| ApiError::invalid_json(e.to_string()))?;
        Ok(IdPatch::new(self.id, document))
    }
}

pub fn records_from_body(body: Value) -> Result<Vec<Record>, ApiError> {
    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| Record::from_api_input(item).map_err(ApiError::from))
            .collect(),
        _ => Err(ApiError::invalid_json("Expected a JSON array of objects")),
    }
}

/// `{ success, data }` with `data` a single object or an array, plus the
/// paging total and dropped patches when there are any
pub fn response_body(
    cardinality: Cardinality,
    data: &HookData,
    total: Option<i64>,
    failures: &[PatchFailure],
) -> Value {
    let payload = match cardinality {
        Cardinality::One => data.records.first().map(Record::to_json).unwrap_or(Value::Null),
        Cardinality::Many => Value::Array(data.records.iter().map(Record::to_json).collect()),
    };

    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    body.insert("data".to_string(), payload);
    if let Some(total) = total {
        body.insert("total".to_string(), json!(total));
    }
    if !failures.is_empty() {
        body.insert("failures".to_string(), json!(failures));
    }
    Value::Object(body)
}
