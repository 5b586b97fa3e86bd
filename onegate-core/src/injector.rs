use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::error::Error;

/// Read-only, type-keyed container of startup singletons.
///
/// Populated once during application wiring, then shared immutably across
/// requests. Handler factories resolve their dependencies from it at
/// registration time; `Injected<T>` extractors resolve from it per request.
pub struct Injector {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl Injector {
    pub fn builder() -> InjectorBuilder {
        InjectorBuilder {
            entries: HashMap::new(),
        }
    }

    /// Empty injector, for tests and minimal assemblies.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Retrieve a value by type, cloning it out of the container.
    ///
    /// A missing entry is an `UNRESOLVED_PARAMETER` error — the right kind
    /// for registration-time resolution (factories). Request-time callers
    /// should prefer [`try_get`](Self::try_get) and map to `MISSING_CONTEXT`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Result<T, Error> {
        self.try_get::<T>()
            .ok_or_else(|| Error::unresolved_parameter(type_name::<T>()))
    }

    pub fn try_get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

/// Builder collecting provided instances before the injector freezes.
pub struct InjectorBuilder {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl InjectorBuilder {
    /// Provide an instance. Later registrations of the same type replace
    /// earlier ones.
    pub fn provide<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    pub fn build(self) -> Injector {
        Injector {
            entries: self.entries,
        }
    }
}
