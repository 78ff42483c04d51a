use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::hook::context::{EndPoint, HookData};
use crate::hook::resolver::HandlerResolver;
use crate::hook::stage::Stage;
use crate::hook::traits::{DbHandle, HookResult};
use crate::mapper::error::MapperError;

/// Which hook convention a type was bound to at registry build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    Modern,
    Legacy,
}

/// Runs the hooks of one stage for one resource type.
///
/// Exactly one implementation is attached to each type, so the executor never needs
/// to know which convention it is talking to.
#[async_trait]
pub trait HookDispatcher<DB: DbHandle>: Send + Sync {
    fn convention(&self) -> Convention;

    /// Entry check run before anything is loaded; false means the request is refused
    fn guard(&self, _ep: &EndPoint) -> bool {
        true
    }

    async fn dispatch(
        &self,
        stage: Stage,
        tx: &mut DB,
        data: &mut HookData,
        ep: &EndPoint,
        resolver: &mut HandlerResolver<DB>,
    ) -> Result<(), MapperError>;

    async fn dispatch_after_transact(
        &self,
        data: &HookData,
        ep: &EndPoint,
        resolver: &mut HandlerResolver<DB>,
    ) -> Result<(), MapperError>;
}

/// Log the outcome of one hook call and turn a rejection into a pipeline error
pub(crate) fn finish_hook(
    hook: &str,
    stage: Stage,
    started: Instant,
    slow_threshold: Duration,
    result: HookResult,
) -> Result<(), MapperError> {
    let elapsed = started.elapsed();
    if elapsed > slow_threshold {
        tracing::warn!("Hook: {} at stage {} took {:?} (threshold {:?})", hook, stage, elapsed, slow_threshold);
    }

    match result {
        Ok(()) => {
            tracing::debug!("Hook: {} at stage {} completed in {:?}", hook, stage, elapsed);
            Ok(())
        }
        Err(rejection) => {
            tracing::warn!("Hook: {} at stage {} rejected in {:?}: {}", hook, stage, elapsed, rejection);
            Err(MapperError::HookRejected {
                hook: hook.to_string(),
                stage,
                rejection,
            })
        }
    }
}

/// Dispatcher for types with at least one registered handler
pub struct ModernDispatcher {
    slow_hook_threshold: Duration,
}

impl ModernDispatcher {
    pub fn new(slow_hook_threshold: Duration) -> Self {
        Self { slow_hook_threshold }
    }
}

#[async_trait]
impl<DB: DbHandle> HookDispatcher<DB> for ModernDispatcher {
    fn convention(&self) -> Convention {
        Convention::Modern
    }

    async fn dispatch(
        &self,
        stage: Stage,
        tx: &mut DB,
        data: &mut HookData,
        ep: &EndPoint,
        resolver: &mut HandlerResolver<DB>,
    ) -> Result<(), MapperError> {
        let handlers = resolver.fetch_for_stage(stage);
        tracing::debug!("Executing stage {} for {} with {} handlers", stage, ep.type_name, handlers.len());

        for handler in handlers {
            let started = Instant::now();
            let result = match stage {
                Stage::BeforeApply => handler.before_apply(tx, data, ep).await,
                Stage::Before => handler.before(tx, data, ep).await,
                Stage::After => handler.after(tx, data, ep).await,
                Stage::AfterTransact => handler.after_transact(data, ep).await,
            };
            finish_hook(handler.name(), stage, started, self.slow_hook_threshold, result)?;
        }
        Ok(())
    }

    async fn dispatch_after_transact(
        &self,
        data: &HookData,
        ep: &EndPoint,
        resolver: &mut HandlerResolver<DB>,
    ) -> Result<(), MapperError> {
        let handlers = resolver.fetch_for_stage(Stage::AfterTransact);
        tracing::debug!("Executing stage T for {} with {} handlers", ep.type_name, handlers.len());

        for handler in handlers {
            let started = Instant::now();
            let result = handler.after_transact(data, ep).await;
            finish_hook(handler.name(), Stage::AfterTransact, started, self.slow_hook_threshold, result)?;
        }
        Ok(())
    }
}
