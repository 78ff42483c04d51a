use thiserror::Error;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::record::RecordError;
use crate::hook::registry::RegistryError;
use crate::hook::stage::Stage;
use crate::hook::traits::HookRejection;

/// Everything that can abort a mapper operation.
///
/// `PermissionDenied`, `NotFound` and `UnknownType` stay distinct here for logging;
/// the transport renders them identically.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("Permission denied on {type_name}")]
    PermissionDenied { type_name: String },

    #[error("{type_name} not found")]
    NotFound { type_name: String },

    #[error("Object id is empty")]
    IdEmpty,

    #[error("Object id mismatch: expected {expected}, found {found}")]
    IdMismatch { expected: Uuid, found: Uuid },

    #[error("Patch syntax error: {0}")]
    PatchSyntax(String),

    #[error("Hook {hook} rejected at stage {stage}: {rejection}")]
    HookRejected {
        hook: String,
        stage: Stage,
        rejection: HookRejection,
    },

    #[error("Strategy error: {0}")]
    StrategyInternal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Batch of {size} exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Unknown resource type: {0}")]
    UnknownType(String),

    #[error("Hook contract violated: {0}")]
    HookContract(String),
}

impl MapperError {
    pub fn not_found(type_name: impl Into<String>) -> Self {
        MapperError::NotFound {
            type_name: type_name.into(),
        }
    }

    pub fn permission_denied(type_name: impl Into<String>) -> Self {
        MapperError::PermissionDenied {
            type_name: type_name.into(),
        }
    }

    /// Errors that must look like a missing resource from outside
    pub fn is_not_found_shaped(&self) -> bool {
        matches!(
            self,
            MapperError::PermissionDenied { .. } | MapperError::NotFound { .. } | MapperError::UnknownType(_)
        )
    }
}

impl From<sqlx::Error> for MapperError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("SQLx error: {}", err);
        MapperError::StrategyInternal(err.to_string())
    }
}

impl From<DatabaseError> for MapperError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!("Database error: {}", err);
        MapperError::StrategyInternal(err.to_string())
    }
}

impl From<RecordError> for MapperError {
    fn from(err: RecordError) -> Self {
        MapperError::InvalidInput(err.to_string())
    }
}

impl From<RegistryError> for MapperError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownType(name) => MapperError::UnknownType(name),
            other => MapperError::StrategyInternal(other.to_string()),
        }
    }
}
