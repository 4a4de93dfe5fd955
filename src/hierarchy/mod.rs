//! Instance hierarchy: ownership tree, naming, lifecycle.
//!
//! Every instance except a root has exactly one father, which owns it. Children
//! keep creation order. A subset of children are *elements*: their creation and
//! removal is gated by the father's `CREATE_ELEMENT`, `NEW_ELEMENT` and
//! `REMOVE_ELEMENT` rules. Removal destroys a whole subtree, children before
//! their father.
//!
//! Instances live in a generational [`Arena`](arena::Arena); an [`InstanceId`]
//! kept after removal is detected as stale rather than aliasing a new instance.

pub mod arena;
mod lifecycle;
pub mod naming;
mod spatial;

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collab::Geometry;
use crate::error::{HierarchyError, OfmlResult};
use crate::property::PropertyTable;
use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::types::TypeId;
use crate::value::Value;

pub use lifecycle::{ElementCreation, RemoveOutcome};
pub use spatial::Axis;

/// Generational handle to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Per-instance lifecycle. Stale ids report `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Constructed,
    Initializing,
    Live,
    Removing,
    Destroyed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Constructed => "constructed",
            InstanceState::Initializing => "initializing",
            InstanceState::Live => "live",
            InstanceState::Removing => "removing",
            InstanceState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Participation in boolean cut operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CutMode {
    #[default]
    Off,
    /// Can be cut by cutting instances.
    Cuttable,
    /// Cuts overlapping cuttable instances.
    Cutting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceFlags {
    pub selectable: bool,
    /// Picking this instance selects its father instead.
    pub hier_selectable: bool,
    pub cut_mode: CutMode,
    pub collision_detection: bool,
    /// Geometric resolution hint in `0.0..=1.0`.
    pub resolution: f64,
}

impl Default for InstanceFlags {
    fn default() -> Self {
        Self {
            selectable: true,
            hier_selectable: false,
            cut_mode: CutMode::Off,
            collision_detection: true,
            resolution: 0.1,
        }
    }
}

pub struct Instance {
    pub(crate) type_id: TypeId,
    pub(crate) father: Option<InstanceId>,
    pub(crate) children: Vec<InstanceId>,
    pub(crate) element: bool,
    local_name: String,
    abs_name: OnceCell<Arc<str>>,
    pub(crate) fields: HashMap<SymbolId, Value>,
    /// Dynamic slots, also the default store for property values.
    pub(crate) dynamic: HashMap<SymbolId, Value>,
    pub(crate) props: PropertyTable,
    pub(crate) changed: bool,
    pub(crate) flags: InstanceFlags,
    pub(crate) order: u64,
    pub(crate) state: InstanceState,
    pub(crate) busy: u32,
    pub(crate) position: [f64; 3],
    pub(crate) rotation: [f64; 3],
    pub(crate) storable: bool,
    pub(crate) program: Option<InstanceId>,
    pub(crate) geometry: Option<Rc<dyn Geometry>>,
}

impl Instance {
    pub(crate) fn new(
        type_id: TypeId,
        father: Option<InstanceId>,
        local_name: String,
        order: u64,
    ) -> Self {
        Self {
            type_id,
            father,
            children: Vec::new(),
            element: false,
            local_name,
            abs_name: OnceCell::new(),
            fields: HashMap::new(),
            dynamic: HashMap::new(),
            props: PropertyTable::default(),
            changed: false,
            flags: InstanceFlags::default(),
            order,
            state: InstanceState::Constructed,
            busy: 0,
            position: [0.0; 3],
            rotation: [0.0; 3],
            storable: false,
            program: None,
            geometry: None,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn father(&self) -> Option<InstanceId> {
        self.father
    }

    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    pub fn is_element(&self) -> bool {
        self.element
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// The memoised absolute name, if it has been computed since the last rename.
    pub fn cached_absolute_name(&self) -> Option<&str> {
        self.abs_name.get().map(|name| &**name)
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn flags(&self) -> &InstanceFlags {
        &self.flags
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_busy(&self) -> bool {
        self.busy > 0
    }

    pub(crate) fn set_local_name(&mut self, name: String) {
        self.local_name = name;
        self.abs_name.take();
    }

    pub(crate) fn forget_absolute_name(&mut self) {
        self.abs_name.take();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type_id", &self.type_id)
            .field("name", &self.local_name)
            .field("father", &self.father)
            .field("children", &self.children.len())
            .field("element", &self.element)
            .field("state", &self.state)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a subtree, used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub element: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<InstanceSnapshot>,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Runtime {
    pub fn instance(&self, id: InstanceId) -> OfmlResult<&Instance> {
        self.arena.get(id).ok_or_else(|| {
            HierarchyError::Destroyed {
                id: id.to_string(),
            }
            .into()
        })
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> OfmlResult<&mut Instance> {
        self.arena.get_mut(id).ok_or_else(|| {
            HierarchyError::Destroyed {
                id: id.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.arena.contains(id)
    }

    pub fn state(&self, id: InstanceId) -> InstanceState {
        self.arena
            .get(id)
            .map_or(InstanceState::Destroyed, |inst| inst.state)
    }

    pub fn type_of(&self, id: InstanceId) -> OfmlResult<TypeId> {
        Ok(self.instance(id)?.type_id)
    }

    pub fn type_name_of(&self, id: InstanceId) -> OfmlResult<String> {
        Ok(self.types.name(self.type_of(id)?))
    }

    pub fn children(&self, id: InstanceId) -> OfmlResult<Vec<InstanceId>> {
        Ok(self.instance(id)?.children.clone())
    }

    pub fn elements(&self, id: InstanceId) -> OfmlResult<Vec<InstanceId>> {
        let inst = self.instance(id)?;
        Ok(inst
            .children
            .iter()
            .copied()
            .filter(|c| self.arena.get(*c).is_some_and(Instance::is_element))
            .collect())
    }

    pub fn father(&self, id: InstanceId) -> OfmlResult<Option<InstanceId>> {
        Ok(self.instance(id)?.father)
    }

    pub fn root(&self, id: InstanceId) -> OfmlResult<InstanceId> {
        let mut current = id;
        while let Some(father) = self.instance(current)?.father {
            current = father;
        }
        Ok(current)
    }

    pub fn roots(&self) -> &[InstanceId] {
        self.arena.roots()
    }

    pub fn instance_count(&self) -> usize {
        self.arena.len()
    }

    pub fn child_by_name(&self, id: InstanceId, name: &str) -> OfmlResult<Option<InstanceId>> {
        let inst = self.instance(id)?;
        Ok(inst
            .children
            .iter()
            .copied()
            .find(|c| self.arena.get(*c).is_some_and(|i| i.local_name == name)))
    }

    pub fn root_by_name(&self, name: &str) -> Option<InstanceId> {
        self.arena
            .roots()
            .iter()
            .copied()
            .find(|r| self.arena.get(*r).is_some_and(|i| i.local_name == name))
    }

    /// Look up an instance by dotted absolute name, e.g. `env.cabinet.e1`.
    pub fn find(&self, path: &str) -> Option<InstanceId> {
        let mut parts = path.split('.');
        let mut current = self.root_by_name(parts.next()?)?;
        for part in parts {
            current = self.child_by_name(current, part).ok().flatten()?;
        }
        Some(current)
    }

    pub fn local_name(&self, id: InstanceId) -> OfmlResult<String> {
        Ok(self.instance(id)?.local_name.clone())
    }

    /// Father's absolute name, a dot, the local name. Memoised until an
    /// ancestor is renamed.
    pub fn absolute_name(&self, id: InstanceId) -> OfmlResult<Arc<str>> {
        let inst = self.instance(id)?;
        if let Some(name) = inst.abs_name.get() {
            return Ok(Arc::clone(name));
        }
        let name: Arc<str> = match inst.father {
            Some(father) => Arc::from(format!("{}.{}", self.absolute_name(father)?, inst.local_name)),
            None => Arc::from(inst.local_name.as_str()),
        };
        Ok(Arc::clone(inst.abs_name.get_or_init(|| name)))
    }

    /// Absolute name for messages; falls back to the raw id.
    pub fn describe(&self, id: InstanceId) -> String {
        self.absolute_name(id)
            .map(|n| n.to_string())
            .unwrap_or_else(|_| id.to_string())
    }

    /// True if the instance's type is `type_name` or a subtype of it.
    /// Unknown type names are simply not matched.
    pub fn is_a(&self, id: InstanceId, type_name: &str) -> OfmlResult<bool> {
        let ty = self.type_of(id)?;
        Ok(self
            .types
            .lookup(type_name)
            .is_some_and(|target| self.types.is_subtype_of(ty, target)))
    }

    pub fn is_cat(&self, id: InstanceId, category: impl Into<SymbolId>) -> OfmlResult<bool> {
        let ty = self.type_of(id)?;
        Ok(self.types.has_category(ty, category.into()))
    }

    /// The subtree rooted at `id`, fathers before children, children in
    /// creation order.
    pub fn subtree(&self, id: InstanceId) -> OfmlResult<Vec<InstanceId>> {
        self.instance(id)?;
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(inst) = self.arena.get(current) {
                stack.extend(inst.children.iter().rev().copied());
            }
        }
        Ok(out)
    }

    pub fn order_id(&self, id: InstanceId) -> OfmlResult<u64> {
        Ok(self.instance(id)?.order)
    }

    pub fn is_changed(&self, id: InstanceId) -> OfmlResult<bool> {
        Ok(self.instance(id)?.changed)
    }

    pub fn set_changed(&mut self, id: InstanceId, changed: bool) -> OfmlResult<()> {
        self.instance_mut(id)?.changed = changed;
        Ok(())
    }

    pub fn flags(&self, id: InstanceId) -> OfmlResult<&InstanceFlags> {
        Ok(&self.instance(id)?.flags)
    }

    pub fn flags_mut(&mut self, id: InstanceId) -> OfmlResult<&mut InstanceFlags> {
        Ok(&mut self.instance_mut(id)?.flags)
    }

    /// Tree view with current property values.
    pub fn snapshot(&mut self, id: InstanceId) -> OfmlResult<InstanceSnapshot> {
        let name = self.local_name(id)?;
        let type_name = self.type_name_of(id)?;
        let element = self.instance(id)?.element;
        let mut properties = BTreeMap::new();
        for key in self.property_keys(id)? {
            let value = self.get_prop_value(id, key)?;
            properties.insert(key.to_string(), value);
        }
        let children = self
            .children(id)?
            .into_iter()
            .map(|c| self.snapshot(c))
            .collect::<OfmlResult<Vec<_>>>()?;
        Ok(InstanceSnapshot {
            name,
            type_name,
            element,
            properties,
            children,
        })
    }

    pub(crate) fn ensure_not_busy(&self, id: InstanceId, operation: &'static str) -> OfmlResult<()> {
        if self.instance(id)?.is_busy() {
            return Err(HierarchyError::ReentrancyViolation {
                instance: self.describe(id),
                operation,
            }
            .into());
        }
        Ok(())
    }
}
