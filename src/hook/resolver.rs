use std::sync::Arc;

use crate::hook::dispatch::HookDispatcher;
use crate::hook::registry::TypeEntry;
use crate::hook::stage::Stage;
use crate::hook::traits::{DbHandle, Handler};
use crate::types::Op;

/// Lazily instantiates the handlers of one resource type for one operation.
///
/// A resolver is created per request, bound to that request's operation, and moved
/// into the result envelope so the post-commit stage reaches the same instances.
pub struct HandlerResolver<DB: DbHandle> {
    entry: Arc<TypeEntry<DB>>,
    op: Op,
    // Indexed like `entry.handlers`
    live: Vec<Option<Box<dyn Handler<DB>>>>,
}

impl<DB: DbHandle> HandlerResolver<DB> {
    pub fn new(entry: Arc<TypeEntry<DB>>, op: Op) -> Self {
        let live = entry.handlers.iter().map(|_| None).collect();
        Self { entry, op, live }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn type_entry(&self) -> &Arc<TypeEntry<DB>> {
        &self.entry
    }

    pub fn dispatcher(&self) -> Arc<dyn HookDispatcher<DB>> {
        Arc::clone(&self.entry.dispatcher)
    }

    /// Whether the type has any registered handler at all, live or not
    pub fn has_any_registered_handler(&self) -> bool {
        self.entry.has_any_registered_handler()
    }

    /// Handlers that implement `stage`, in registration order.
    ///
    /// Any handler applicable to this operation whose first declared stage is at or
    /// before `stage` is instantiated first, once.
    pub fn fetch_for_stage(&mut self, stage: Stage) -> Vec<&mut (dyn Handler<DB> + 'static)> {
        for (slot, registration) in self.live.iter_mut().zip(self.entry.handlers.iter()) {
            if slot.is_some() || !registration.ops.contains(self.op) {
                continue;
            }
            match registration.stages.first() {
                Some(first) if first <= stage => {
                    tracing::debug!(
                        "Instantiating handler {} for {} {} at stage {}",
                        registration.name,
                        self.op,
                        self.entry.rtype.name,
                        stage
                    );
                    *slot = Some((registration.factory)());
                }
                _ => {}
            }
        }

        self.live
            .iter_mut()
            .zip(self.entry.handlers.iter())
            .filter(|(_, registration)| registration.stages.contains(stage))
            .filter_map(|(slot, _)| slot.as_deref_mut())
            .collect()
    }

    /// Names of the handlers instantiated so far, in registration order
    pub fn all_instantiated(&self) -> Vec<&'static str> {
        self.live
            .iter()
            .zip(self.entry.handlers.iter())
            .filter(|(slot, _)| slot.is_some())
            .map(|(_, registration)| registration.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::hook::registry::{HandlerRegistration, RegistryBuilder, ResourceType};
    use crate::testing::MockTx;

    struct Quiet(&'static str);

    impl Handler<MockTx> for Quiet {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn counted(name: &'static str, ops: &str, stages: &str, counter: Arc<AtomicUsize>) -> HandlerRegistration<MockTx> {
        HandlerRegistration::new(name, ops, stages, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(Quiet(name)) as Box<dyn Handler<MockTx>>
        })
        .unwrap()
    }

    fn names(handlers: Vec<&mut (dyn Handler<MockTx> + 'static)>) -> Vec<&'static str> {
        handlers.into_iter().map(|h| h.name()).collect()
    }

    #[test]
    fn instantiates_lazily_and_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::<MockTx>::new();
        builder.register_type(ResourceType::new("notes", "notes").unwrap()).unwrap();
        builder.hook("notes", counted("patch_guard", "P", "JB", built.clone())).unwrap();
        builder.hook("notes", counted("audit", "CRUPD", "AT", built.clone())).unwrap();
        builder.hook("notes", counted("validate", "CUP", "B", built.clone())).unwrap();
        let registry = builder.build();

        let mut resolver = registry.resolver("notes", Op::Patch).unwrap();
        assert!(resolver.has_any_registered_handler());
        assert!(resolver.all_instantiated().is_empty());

        assert_eq!(names(resolver.fetch_for_stage(Stage::BeforeApply)), vec!["patch_guard"]);
        assert_eq!(built.load(Ordering::SeqCst), 1);

        assert_eq!(names(resolver.fetch_for_stage(Stage::Before)), vec!["patch_guard", "validate"]);
        assert_eq!(names(resolver.fetch_for_stage(Stage::After)), vec!["audit"]);
        assert_eq!(names(resolver.fetch_for_stage(Stage::AfterTransact)), vec!["audit"]);
        assert_eq!(built.load(Ordering::SeqCst), 3);
        assert_eq!(resolver.all_instantiated(), vec!["patch_guard", "audit", "validate"]);
    }

    #[test]
    fn skips_handlers_for_other_operations() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::<MockTx>::new();
        builder.register_type(ResourceType::new("notes", "notes").unwrap()).unwrap();
        builder.hook("notes", counted("patch_guard", "P", "JB", built.clone())).unwrap();
        builder.hook("notes", counted("validate", "CUP", "B", built.clone())).unwrap();
        let registry = builder.build();

        let mut resolver = registry.resolver("notes", Op::Delete).unwrap();
        assert!(resolver.fetch_for_stage(Stage::Before).is_empty());
        assert_eq!(built.load(Ordering::SeqCst), 0);

        // A JB handler still gets its B stage on create, where J never happens
        let registry_create = {
            let mut builder = RegistryBuilder::<MockTx>::new();
            builder.register_type(ResourceType::new("notes", "notes").unwrap()).unwrap();
            builder.hook("notes", counted("shape", "CP", "JB", built.clone())).unwrap();
            builder.build()
        };
        let mut resolver = registry_create.resolver("notes", Op::Create).unwrap();
        assert_eq!(names(resolver.fetch_for_stage(Stage::Before)), vec!["shape"]);
    }
}
