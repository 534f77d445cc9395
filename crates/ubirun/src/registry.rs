//! Per-process registries.
//!
//! [`NameRegistry`] maps human-readable names to local objects; it is the
//! lookup behind `bind` and replica discovery. [`TypeRegistry`] maps type
//! names to constructor closures, and remote instantiation never resolves
//! types any other way.

use dashmap::DashMap;

use crate::object::LocalObject;
use crate::object::Servant;

/// Name → object table for one node.
#[derive(Default)]
pub struct NameRegistry {
    entries: DashMap<String, LocalObject>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` under `name`, replacing any previous entry.
    pub fn register(&self, name: &str, object: &LocalObject) {
        object.set_name(name);
        self.entries.insert(name.to_string(), object.clone());
    }

    pub fn lookup(&self, name: &str) -> Option<LocalObject> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// The name `object` is currently registered under, if any.
    pub fn name_of(&self, object: &LocalObject) -> Option<String> {
        let name = object.name()?;
        let current = self.entries.get(&name)?;
        (current.index() == object.index()).then_some(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn Servant> + Send + Sync>;

/// Type name → constructor table for one node.
#[derive(Default)]
pub struct TypeRegistry {
    ctors: DashMap<String, Constructor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, type_name: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Servant> + Send + Sync + 'static,
    {
        self.ctors.insert(type_name.to_string(), Box::new(ctor));
    }

    /// Builds a fresh servant of the named type.
    pub fn construct(&self, type_name: &str) -> Option<Box<dyn Servant>> {
        self.ctors.get(type_name).map(|ctor| (ctor.value())())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.ctors.contains_key(type_name)
    }
}
