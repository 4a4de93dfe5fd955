//! The runtime facade.
//!
//! A [`Runtime`] owns one type registry, one instance arena and the
//! bookkeeping that dispatch and the property protocol need between calls.
//! Behaviour is spread over the subsystem modules as further `impl Runtime`
//! blocks; this module holds the state and the type-level entry points.

use std::collections::HashMap;
use std::rc::Rc;

use crate::collab::ProductData;
use crate::config::RuntimeConfig;
use crate::dispatch::{CacheStats, DispatchCache};
use crate::error::{InstantiationError, OfmlResult};
use crate::hierarchy::InstanceId;
use crate::hierarchy::arena::Arena;
use crate::property::ChangeTracker;
use crate::symbol;
use crate::types::{TypeDef, TypeId, TypeRegistry};

/// One OFML object world: types, instances and their collaborators.
///
/// Single-threaded. Method bodies and rules are `Rc` closures that receive
/// `&mut Runtime`, so they may create, change and remove instances freely.
pub struct Runtime {
    config: RuntimeConfig,
    pub(crate) types: TypeRegistry,
    pub(crate) arena: Arena,
    pub(crate) cache: DispatchCache,
    pub(crate) changes: ChangeTracker,
    /// Product data by program instance.
    pub(crate) product_data: HashMap<InstanceId, Rc<dyn ProductData>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(
            trace_rules = config.trace_rules,
            validate_properties = config.validate_properties,
            dispatch_cache = config.dispatch_cache,
            "initializing OFML runtime"
        );
        Self {
            config,
            types: TypeRegistry::new(),
            arena: Arena::new(),
            cache: DispatchCache::default(),
            changes: ChangeTracker::default(),
            product_data: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Register a type. Its supertype must already be registered.
    pub fn register(&mut self, def: TypeDef) -> OfmlResult<TypeId> {
        Ok(self.types.register(def)?)
    }

    /// Replace the definition of `name` in place.
    ///
    /// Existing instances keep their identity and pick up the new methods and
    /// rules on their next call.
    pub fn redefine(&mut self, name: &str, def: TypeDef) -> OfmlResult<TypeId> {
        Ok(self.types.redefine(name, def)?)
    }

    /// Resolve a qualified or unambiguous short type name.
    pub fn lookup_type(&self, name: &str) -> OfmlResult<TypeId> {
        self.types.lookup(name).ok_or_else(|| {
            InstantiationError::UnknownType {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            types: self.types.len(),
            instances: self.instance_count(),
            roots: self.roots().len(),
            symbols: symbol::table().len(),
            cache: self.cache.stats(),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("types", &self.types.len())
            .field("instances", &self.instance_count())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Counts reported by [`Runtime::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub types: usize,
    pub instances: usize,
    pub roots: usize,
    /// Size of the process-wide symbol table.
    pub symbols: usize,
    pub cache: CacheStats,
}

impl std::fmt::Display for RuntimeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "OFML runtime info")?;
        writeln!(f, "  types:        {}", self.types)?;
        writeln!(f, "  instances:    {}", self.instances)?;
        writeln!(f, "  roots:        {}", self.roots)?;
        writeln!(f, "  symbols:      {}", self.symbols)?;
        writeln!(
            f,
            "  cache:        {} entries, {} hits, {} misses",
            self.cache.entries, self.cache.hits, self.cache.misses
        )?;
        Ok(())
    }
}
