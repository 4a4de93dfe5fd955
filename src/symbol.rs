//! Interned symbols for the OFML runtime.
//!
//! Symbols are the keys of the object model: property keys, rule reasons,
//! category tags and attribute names are all [`SymbolId`]s. The process-wide
//! [`SymbolTable`] maps labels to IDs and back in O(1) using two `DashMap`s,
//! so comparing and hashing symbols never touches the label text.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::rules::Reason;

/// Unique, niche-optimized identifier for an interned label.
///
/// Uses `NonZeroU64` so that `Option<SymbolId>` is the same size as `SymbolId`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The interned label of this symbol.
    pub fn label(self) -> Arc<str> {
        table().label(self)
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

impl std::fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.label())
    }
}

impl From<&str> for SymbolId {
    fn from(label: &str) -> Self {
        intern(label)
    }
}

impl From<&String> for SymbolId {
    fn from(label: &String) -> Self {
        intern(label)
    }
}

impl Serialize for SymbolId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for SymbolId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(intern(&label))
    }
}

/// Thread-safe symbol ID allocator.
///
/// Produces monotonically increasing IDs starting from 1.
#[derive(Debug, Default)]
struct SymbolAllocator {
    issued: AtomicU64,
}

impl SymbolAllocator {
    fn next_id(&self) -> SymbolId {
        let raw = self.issued.fetch_add(1, Ordering::Relaxed);
        SymbolId(NonZeroU64::MIN.saturating_add(raw))
    }
}

/// Bidirectional label ↔ ID table.
///
/// Labels are case-sensitive: `@Width` and `@width` are different symbols.
pub struct SymbolTable {
    /// Forward map: SymbolId → label (source of truth).
    id_to_label: DashMap<SymbolId, Arc<str>>,
    /// Reverse map: label → SymbolId.
    label_to_id: DashMap<Arc<str>, SymbolId>,
    allocator: SymbolAllocator,
}

impl SymbolTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            id_to_label: DashMap::new(),
            label_to_id: DashMap::new(),
            allocator: SymbolAllocator::default(),
        }
    }

    /// Intern a label, returning the existing ID if it was seen before.
    pub fn intern(&self, label: &str) -> SymbolId {
        if let Some(id) = self.label_to_id.get(label) {
            return *id.value();
        }
        let label: Arc<str> = Arc::from(label);
        // The entry API holds the shard lock, so racing interns agree on one ID.
        let id = *self
            .label_to_id
            .entry(Arc::clone(&label))
            .or_insert_with(|| {
                let id = self.allocator.next_id();
                self.id_to_label.insert(id, Arc::clone(&label));
                id
            })
            .value();
        id
    }

    /// Look up a label without interning it.
    pub fn lookup(&self, label: &str) -> Option<SymbolId> {
        self.label_to_id.get(label).map(|r| *r.value())
    }

    /// Resolve an ID to its label, falling back to `sym:{id}` for foreign IDs.
    pub fn label(&self, id: SymbolId) -> Arc<str> {
        self.id_to_label
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .unwrap_or_else(|| Arc::from(format!("sym:{}", id.get())))
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("count", &self.len())
            .finish()
    }
}

static TABLE: OnceLock<SymbolTable> = OnceLock::new();

/// The process-wide symbol table. Predefined rule reasons are interned on
/// first access.
pub fn table() -> &'static SymbolTable {
    TABLE.get_or_init(|| {
        let table = SymbolTable::new();
        for reason in Reason::ALL {
            table.intern(reason.label());
        }
        tracing::debug!(symbols = table.len(), "symbol table initialized");
        table
    })
}

/// Intern a label in the process-wide table.
pub fn intern(label: &str) -> SymbolId {
    table().intern(label)
}
