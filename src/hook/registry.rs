use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::database::manager::validate_identifier;
use crate::hook::dispatch::{HookDispatcher, ModernDispatcher};
use crate::hook::legacy::{LegacyBatchHooks, LegacyDispatcher, LegacyModelHooks};
use crate::hook::resolver::HandlerResolver;
use crate::hook::stage::StageSet;
use crate::hook::traits::{DbHandle, Handler};
use crate::types::{Op, OpSet};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Resource type '{0}' is already registered")]
    DuplicateType(String),

    #[error("Unknown resource type: {0}")]
    UnknownType(String),

    #[error("Handler '{handler}': invalid operation letter '{letter}'")]
    InvalidOpLetter { handler: &'static str, letter: char },

    #[error("Handler '{handler}': invalid stage letter '{letter}'")]
    InvalidStageLetter { handler: &'static str, letter: char },

    #[error("Handler '{0}' declares no operations or no stages")]
    EmptyRegistration(&'static str),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

/// A resource type the pipeline can serve
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceType {
    pub name: String,
    pub table: String,
    /// Fields that keep their stored value across update and patch
    pub immutable_fields: Vec<String>,
}

impl ResourceType {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Result<Self, RegistryError> {
        let table = table.into();
        validate_identifier(&table).map_err(|_| RegistryError::InvalidTable(table.clone()))?;
        Ok(Self {
            name: name.into(),
            table,
            immutable_fields: Vec::new(),
        })
    }

    pub fn with_immutable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable_fields.extend(fields.into_iter().map(Into::into));
        self
    }
}

pub type HandlerFactory<DB> = Arc<dyn Fn() -> Box<dyn Handler<DB>> + Send + Sync>;

/// Factory plus the operations and stages it applies to
pub struct HandlerRegistration<DB: DbHandle> {
    pub name: &'static str,
    pub ops: OpSet,
    pub stages: StageSet,
    pub factory: HandlerFactory<DB>,
}

impl<DB: DbHandle> HandlerRegistration<DB> {
    /// `ops` uses the letters `CRUPD`, `stages` the letters `JBAT`.
    pub fn new<F>(name: &'static str, ops: &str, stages: &str, factory: F) -> Result<Self, RegistryError>
    where
        F: Fn() -> Box<dyn Handler<DB>> + Send + Sync + 'static,
    {
        let ops = OpSet::parse(ops).map_err(|letter| RegistryError::InvalidOpLetter { handler: name, letter })?;
        let stages =
            StageSet::parse(stages).map_err(|letter| RegistryError::InvalidStageLetter { handler: name, letter })?;
        if ops.is_empty() || stages.is_empty() {
            return Err(RegistryError::EmptyRegistration(name));
        }

        Ok(Self {
            name,
            ops,
            stages,
            factory: Arc::new(factory),
        })
    }
}

/// Everything the pipeline knows about one resource type
pub struct TypeEntry<DB: DbHandle> {
    pub rtype: ResourceType,
    pub handlers: Vec<HandlerRegistration<DB>>,
    pub dispatcher: Arc<dyn HookDispatcher<DB>>,
}

impl<DB: DbHandle> TypeEntry<DB> {
    pub fn has_any_registered_handler(&self) -> bool {
        !self.handlers.is_empty()
    }
}

struct PendingType<DB: DbHandle> {
    rtype: ResourceType,
    handlers: Vec<HandlerRegistration<DB>>,
    model_hooks: Option<Arc<dyn LegacyModelHooks<DB>>>,
    batch_hooks: Option<Arc<dyn LegacyBatchHooks<DB>>>,
}

/// Collects types and hooks at startup; `build` freezes them into a `Registry`
pub struct RegistryBuilder<DB: DbHandle> {
    pending: Vec<PendingType<DB>>,
}

impl<DB: DbHandle> Default for RegistryBuilder<DB> {
    fn default() -> Self {
        Self { pending: Vec::new() }
    }
}

impl<DB: DbHandle> RegistryBuilder<DB> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&mut self, rtype: ResourceType) -> Result<&mut Self, RegistryError> {
        if self.pending.iter().any(|p| p.rtype.name == rtype.name) {
            return Err(RegistryError::DuplicateType(rtype.name));
        }
        tracing::debug!("Registered resource type '{}' (table {})", rtype.name, rtype.table);
        self.pending.push(PendingType {
            rtype,
            handlers: Vec::new(),
            model_hooks: None,
            batch_hooks: None,
        });
        Ok(self)
    }

    /// Register a modern handler. Its order among the type's handlers is the
    /// order in which it runs.
    pub fn hook(&mut self, type_name: &str, registration: HandlerRegistration<DB>) -> Result<&mut Self, RegistryError> {
        let pending = self.pending_mut(type_name)?;
        tracing::debug!(
            "Registered handler '{}' for type '{}' stages {}",
            registration.name,
            type_name,
            registration.stages.letters()
        );
        pending.handlers.push(registration);
        Ok(self)
    }

    pub fn legacy_model_hooks(
        &mut self,
        type_name: &str,
        hooks: Arc<dyn LegacyModelHooks<DB>>,
    ) -> Result<&mut Self, RegistryError> {
        self.pending_mut(type_name)?.model_hooks = Some(hooks);
        Ok(self)
    }

    pub fn legacy_batch_hooks(
        &mut self,
        type_name: &str,
        hooks: Arc<dyn LegacyBatchHooks<DB>>,
    ) -> Result<&mut Self, RegistryError> {
        self.pending_mut(type_name)?.batch_hooks = Some(hooks);
        Ok(self)
    }

    pub fn build(self) -> Registry<DB> {
        self.build_with(&PipelineConfig::default())
    }

    /// Pick each type's dispatcher once: modern if it has any handler, legacy otherwise
    pub fn build_with(self, config: &PipelineConfig) -> Registry<DB> {
        let threshold = Duration::from_millis(config.slow_hook_threshold_ms);
        let mut entries = HashMap::with_capacity(self.pending.len());

        for pending in self.pending {
            let dispatcher: Arc<dyn HookDispatcher<DB>> = if pending.handlers.is_empty() {
                Arc::new(LegacyDispatcher::new(pending.model_hooks, pending.batch_hooks, threshold))
            } else {
                if pending.model_hooks.is_some() || pending.batch_hooks.is_some() {
                    tracing::warn!(
                        "Type '{}' has registered handlers; its legacy hooks will never be called",
                        pending.rtype.name
                    );
                }
                Arc::new(ModernDispatcher::new(threshold))
            };

            tracing::info!(
                "Type '{}' bound to {:?} hook dispatch ({} handlers)",
                pending.rtype.name,
                dispatcher.convention(),
                pending.handlers.len()
            );
            let name = pending.rtype.name.clone();
            entries.insert(
                name,
                Arc::new(TypeEntry {
                    rtype: pending.rtype,
                    handlers: pending.handlers,
                    dispatcher,
                }),
            );
        }

        Registry { entries }
    }

    fn pending_mut(&mut self, type_name: &str) -> Result<&mut PendingType<DB>, RegistryError> {
        self.pending
            .iter_mut()
            .find(|p| p.rtype.name == type_name)
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))
    }
}

/// Read-only map of resource types, built once at startup and shared by all requests
pub struct Registry<DB: DbHandle> {
    entries: HashMap<String, Arc<TypeEntry<DB>>>,
}

impl<DB: DbHandle> Registry<DB> {
    pub fn get(&self, type_name: &str) -> Result<Arc<TypeEntry<DB>>, RegistryError> {
        self.entries
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))
    }

    /// Fresh resolver for one operation on `type_name`
    pub fn resolver(&self, type_name: &str, op: Op) -> Result<HandlerResolver<DB>, RegistryError> {
        Ok(HandlerResolver::new(self.get(type_name)?, op))
    }

    pub fn types(&self) -> impl Iterator<Item = &ResourceType> {
        self.entries.values().map(|entry| &entry.rtype)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }
}
