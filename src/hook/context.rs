use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::database::record::Record;
use crate::types::{Actor, Cardinality, Op, UserRole};

/// Per-operation scratch space shared by every hook stage.
///
/// Created empty when the operation starts and dropped with the result envelope;
/// it is the only channel hooks use to talk to each other. Values are keyed by type,
/// so each hook defines its own payload struct.
#[derive(Default)]
pub struct Cargo {
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Cargo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.slots
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.slots.get(&TypeId::of::<T>()).and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.slots
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }

    pub fn take<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.slots
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for Cargo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cargo").field("slots", &self.slots.len()).finish()
    }
}

/// Mutable state threaded through every stage of one operation.
///
/// `records` holds the object(s) in flight in caller order (exactly one for
/// single-object operations) and `roles` is aligned with it. Hooks may replace
/// records but must not change how many there are.
#[derive(Debug, Default)]
pub struct HookData {
    pub records: Vec<Record>,
    pub roles: Vec<UserRole>,
    pub cargo: Cargo,
}

impl HookData {
    pub fn new(records: Vec<Record>, roles: Vec<UserRole>) -> Self {
        Self {
            records,
            roles,
            cargo: Cargo::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Immutable description of one inbound request
#[derive(Debug, Clone)]
pub struct EndPoint {
    pub request_id: Uuid,
    pub op: Op,
    pub cardinality: Cardinality,
    pub type_name: String,
    pub actor: Actor,
    /// Query-string options as received (`offset`, `limit`, ...)
    pub url_params: HashMap<String, String>,
}

impl EndPoint {
    pub fn new(op: Op, cardinality: Cardinality, type_name: impl Into<String>, actor: Actor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            op,
            cardinality,
            type_name: type_name.into(),
            actor,
            url_params: HashMap::new(),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.url_params = params;
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.url_params.get(key).map(String::as_str)
    }

    pub fn is_batch(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// What a legacy single-object callback receives alongside the object itself
pub struct HookPointData<'a> {
    pub ep: &'a EndPoint,
    pub role: UserRole,
    pub cargo: &'a mut Cargo,
}

/// What a legacy batch callback receives alongside the object slice
pub struct BatchHookPointData<'a> {
    pub ep: &'a EndPoint,
    pub roles: &'a [UserRole],
    pub cargo: &'a mut Cargo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct AuditTrail(Vec<String>);

    #[test]
    fn cargo_is_keyed_by_type() {
        let mut cargo = Cargo::new();
        assert!(cargo.is_empty());
        assert!(cargo.insert(7u32).is_none());
        assert_eq!(cargo.insert(8u32), Some(7));
        cargo.insert(AuditTrail(vec!["before".into()]));
        if let Some(trail) = cargo.get_mut::<AuditTrail>() {
            trail.0.push("after".into());
        }

        assert_eq!(cargo.get::<u32>(), Some(&8));
        assert_eq!(
            cargo.take::<AuditTrail>(),
            Some(AuditTrail(vec!["before".into(), "after".into()]))
        );
        assert!(!cargo.contains::<AuditTrail>());
        assert!(cargo.get::<String>().is_none());
    }
}
