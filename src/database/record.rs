use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Server-assigned fields that API input may not set
const SYSTEM_FIELDS: &[&str] = &["created_at", "updated_at"];

/// Errors that can occur while building a Record from input
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("System field '{0}' cannot be set via API input")]
    SystemFieldNotAllowed(&'static str),
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
    #[error("Invalid UUID format for field '{field}': {value}")]
    InvalidUuid { field: String, value: String },
}

/// One instance of a registered resource type.
///
/// `id` and the two timestamps are owned by the strategy; everything else lives in
/// `fields` and is persisted as a JSON object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    id: Option<Uuid>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Build a record from API input. An `id` key is accepted (and parsed), server
    /// timestamps are rejected.
    pub fn from_api_input(json: Value) -> Result<Self, RecordError> {
        let Value::Object(map) = json else {
            return Err(RecordError::InvalidJson("Expected JSON object".to_string()));
        };

        let mut record = Self::new();
        for (key, value) in map {
            if let Some(field) = SYSTEM_FIELDS.iter().find(|&&f| f == key) {
                return Err(RecordError::SystemFieldNotAllowed(*field));
            }
            if key == "id" {
                record.id = parse_id_value(&value)?;
                continue;
            }
            record.fields.insert(key, value);
        }
        Ok(record)
    }

    /// Rebuild a record from its full JSON representation (as produced by `to_json`).
    /// Used after a patch document rewrote the object; timestamps are not trusted and
    /// must be restored by the caller.
    pub fn from_representation(json: Value) -> Result<Self, RecordError> {
        let Value::Object(mut map) = json else {
            return Err(RecordError::InvalidJson("Expected JSON object".to_string()));
        };
        for field in SYSTEM_FIELDS {
            map.remove(*field);
        }
        let id = match map.remove("id") {
            Some(value) => parse_id_value(&value)?,
            None => None,
        };
        Ok(Self {
            id,
            created_at: None,
            updated_at: None,
            fields: map,
        })
    }

    /// Record loaded from storage
    pub fn from_stored(
        id: Uuid,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            id: Some(id),
            created_at: Some(created_at),
            updated_at: Some(updated_at),
            fields,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn set_id(&mut self, id: Uuid) -> &mut Self {
        self.id = Some(id);
        self
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> &mut Self {
        self.created_at = Some(created_at);
        self.updated_at = Some(updated_at);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Read a UUID-valued field (e.g. a linkage column mirrored into the data)
    pub fn uuid_field(&self, key: &str) -> Result<Option<Uuid>, RecordError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => parse_id_value(value).map_err(|_| RecordError::InvalidUuid {
                field: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Carry identity, server timestamps and the named fields over from the stored
    /// version. A pegged field absent from `old` is removed from `self`.
    pub fn preserve_from(&mut self, old: &Record, pegged: &[&str]) -> &mut Self {
        self.id = old.id;
        self.created_at = old.created_at;
        self.updated_at = old.updated_at;
        for field in pegged {
            match old.fields.get(*field) {
                Some(value) => {
                    self.fields.insert((*field).to_string(), value.clone());
                }
                None => {
                    self.fields.remove(*field);
                }
            }
        }
        self
    }

    /// Full JSON representation: `id`, timestamps and user fields
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 3);
        if let Some(id) = self.id {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        if let Some(created_at) = self.created_at {
            map.insert("created_at".to_string(), Value::String(created_at.to_rfc3339()));
        }
        if let Some(updated_at) = self.updated_at {
            map.insert("updated_at".to_string(), Value::String(updated_at.to_rfc3339()));
        }
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn parse_id_value(value: &Value) -> Result<Option<Uuid>, RecordError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Uuid::parse_str(s).map(Some).map_err(|_| RecordError::InvalidUuid {
            field: "id".to_string(),
            value: s.clone(),
        }),
        other => Err(RecordError::InvalidUuid {
            field: "id".to_string(),
            value: other.to_string(),
        }),
    }
}
