use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::hook::context::{EndPoint, HookData};

/// Transactional handle threaded through hooks and strategies.
///
/// Production code uses `sqlx::PgConnection` borrowed from an open transaction;
/// tests substitute an in-memory handle.
pub trait DbHandle: Send + 'static {}

impl<T: Send + 'static> DbHandle for T {}

/// Refusal raised by a hook. Surfaced to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HookRejection {
    /// HTTP status the transport should use
    pub status: u16,
    pub message: String,
    pub details: Option<Value>,
}

impl HookRejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub type HookResult = Result<(), HookRejection>;

/// A registered lifecycle handler.
///
/// One instance is created per operation, on the first stage it declares, and the
/// same instance then serves every later stage of that operation. Only the stages
/// named in the registration are ever called; the rest keep their no-op defaults.
#[async_trait]
pub trait Handler<DB: DbHandle>: Send {
    /// Handler name for logging and debugging
    fn name(&self) -> &'static str;

    /// `J`: patch only, `data.records` holds the pre-patch objects
    async fn before_apply(&mut self, _tx: &mut DB, _data: &mut HookData, _ep: &EndPoint) -> HookResult {
        Ok(())
    }

    /// `B`: before persistence
    async fn before(&mut self, _tx: &mut DB, _data: &mut HookData, _ep: &EndPoint) -> HookResult {
        Ok(())
    }

    /// `A`: after persistence; `data.records` holds the reloaded objects
    async fn after(&mut self, _tx: &mut DB, _data: &mut HookData, _ep: &EndPoint) -> HookResult {
        Ok(())
    }

    /// `T`: after the caller committed. No transaction is available any more.
    async fn after_transact(&mut self, _data: &HookData, _ep: &EndPoint) -> HookResult {
        Ok(())
    }
}
