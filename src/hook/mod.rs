// Hook pipeline: stages, per-operation state, the two dispatch conventions

pub mod context;
pub mod dispatch;
pub mod legacy;
pub mod registry;
pub mod resolver;
pub mod stage;
pub mod traits;

pub use context::{BatchHookPointData, Cargo, EndPoint, HookData, HookPointData};
pub use dispatch::{Convention, HookDispatcher, ModernDispatcher};
pub use legacy::{
    LegacyBatchHooks, LegacyCapabilities, LegacyDispatchTable, LegacyDispatcher, LegacyMethod, LegacyModelHooks,
};
pub use registry::{HandlerRegistration, Registry, RegistryBuilder, RegistryError, ResourceType, TypeEntry};
pub use resolver::HandlerResolver;
pub use stage::{Stage, StageSet};
pub use traits::{DbHandle, Handler, HookRejection, HookResult};
