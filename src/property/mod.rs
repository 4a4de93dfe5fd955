//! Per-instance property definitions.
//!
//! Properties are the configurable face of an instance: each has a
//! [`PropertyDef`] describing how to present and validate it, and a value that
//! lives either behind a `get<Key>`/`set<Key>` accessor pair on the type or in
//! the instance's dynamic hash. Definitions are registered per instance, since
//! the set of properties varies with the configuration.

mod ops;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dispatch::values_equal;
use crate::symbol::SymbolId;
use crate::value::Value;

pub use ops::ChangeTracker;

/// Value type of a property and its editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    String,
    /// Fixed list of allowed values.
    Choice(Vec<Value>),
    /// Allowed values computed by the named method.
    ChoiceFn(SymbolId),
    /// Custom editor, identified by name. Values are not checked.
    Editor(String),
}

impl PropertyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::Bool => "bool",
            PropertyKind::Int => "int",
            PropertyKind::Float => "float",
            PropertyKind::String => "string",
            PropertyKind::Choice(_) => "choice",
            PropertyKind::ChoiceFn(_) => "choice-fn",
            PropertyKind::Editor(_) => "editor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyBounds {
    Range { min: f64, max: f64 },
    /// Maximum string length in characters.
    Length(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyPosition {
    Explicit(i32),
    /// Placed after every property registered so far.
    #[default]
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyState {
    #[default]
    Enabled,
    /// Visible, but writes are refused.
    Disabled,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub key: SymbolId,
    pub name: String,
    pub bounds: Option<PropertyBounds>,
    pub format: Option<String>,
    pub kind: PropertyKind,
    pub position: PropertyPosition,
    pub state: PropertyState,
}

impl PropertyDef {
    pub fn new(key: impl Into<SymbolId>, name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            bounds: None,
            format: None,
            kind,
            position: PropertyPosition::Implicit,
            state: PropertyState::Enabled,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some(PropertyBounds::Range { min, max });
        self
    }

    pub fn with_max_length(mut self, len: usize) -> Self {
        self.bounds = Some(PropertyBounds::Length(len));
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn at(mut self, position: i32) -> Self {
        self.position = PropertyPosition::Explicit(position);
        self
    }

    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }

    /// Check `value` against the kind and bounds. Computed choice lists are
    /// checked by the runtime, which can evaluate them.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let kind_ok = match (&self.kind, value) {
            (PropertyKind::Bool, Value::Bool(_) | Value::Int(0 | 1)) => true,
            (PropertyKind::Int, Value::Int(_)) => true,
            (PropertyKind::Float, Value::Int(_) | Value::Float(_)) => true,
            (PropertyKind::String, Value::Str(_)) => true,
            (PropertyKind::Choice(choices), v) => {
                if !choices.iter().any(|c| values_equal(c, v)) {
                    return Err(format!("{v} is not one of the allowed choices"));
                }
                true
            }
            (PropertyKind::ChoiceFn(_) | PropertyKind::Editor(_), _) => true,
            _ => false,
        };
        if !kind_ok {
            return Err(format!(
                "expected {}, got {}",
                self.kind.type_name(),
                value.type_name()
            ));
        }

        match (&self.bounds, value) {
            (Some(PropertyBounds::Range { min, max }), v) => match v.as_float() {
                Some(x) if x < *min || x > *max => Err(format!("{x} is outside [{min}, {max}]")),
                _ => Ok(()),
            },
            (Some(PropertyBounds::Length(len)), Value::Str(s)) if s.chars().count() > *len => {
                Err(format!("longer than {len} characters"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PropertyEntry {
    def: PropertyDef,
    /// Resolved presentation slot.
    slot: i32,
    seq: u64,
}

/// The property definitions of one instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyTable {
    entries: HashMap<SymbolId, PropertyEntry>,
    next_seq: u64,
}

impl PropertyTable {
    /// Register or overwrite `def`. Returns whether anything changed.
    pub fn setup(&mut self, def: PropertyDef) -> bool {
        let max_slot = self.entries.values().map(|e| e.slot).max();
        if let Some(entry) = self.entries.get_mut(&def.key) {
            if entry.def == def {
                return false;
            }
            if let PropertyPosition::Explicit(p) = def.position {
                entry.slot = p;
            } else if matches!(entry.def.position, PropertyPosition::Explicit(_)) {
                entry.slot = max_slot.map_or(0, |m| m + 1);
            }
            entry.def = def;
            return true;
        }
        let slot = match def.position {
            PropertyPosition::Explicit(p) => p,
            PropertyPosition::Implicit => max_slot.map_or(0, |m| m + 1),
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(def.key, PropertyEntry { def, slot, seq });
        true
    }

    pub fn get(&self, key: SymbolId) -> Option<&PropertyDef> {
        self.entries.get(&key).map(|e| &e.def)
    }

    pub fn get_mut(&mut self, key: SymbolId) -> Option<&mut PropertyDef> {
        self.entries.get_mut(&key).map(|e| &mut e.def)
    }

    pub fn contains(&self, key: SymbolId) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn remove(&mut self, key: SymbolId) -> Option<PropertyDef> {
        self.entries.remove(&key).map(|e| e.def)
    }

    /// Keys by presentation slot, ties broken by registration order.
    pub fn keys(&self) -> Vec<SymbolId> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| (e.slot, e.seq));
        entries.into_iter().map(|e| e.def.key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    #[test]
    fn implicit_positions_follow_the_maximum() {
        let mut table = PropertyTable::default();
        table.setup(PropertyDef::new("depth", "Depth", PropertyKind::Float));
        table.setup(PropertyDef::new("width", "Width", PropertyKind::Float).at(10));
        table.setup(PropertyDef::new("height", "Height", PropertyKind::Float));
        table.setup(PropertyDef::new("color", "Color", PropertyKind::String).at(5));
        let keys: Vec<String> = table.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["depth", "color", "width", "height"]);
    }

    #[test]
    fn setup_reports_changes() {
        let mut table = PropertyTable::default();
        let def = PropertyDef::new("width", "Width", PropertyKind::Float).with_range(0.4, 2.0);
        assert!(table.setup(def.clone()));
        assert!(!table.setup(def.clone()));
        assert!(table.setup(def.with_format("%.2f")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(intern("width")).unwrap().format.as_deref(), Some("%.2f"));
    }

    #[test]
    fn validation_checks_kind_bounds_and_choices() {
        let width = PropertyDef::new("width", "Width", PropertyKind::Float).with_range(0.4, 2.0);
        assert!(width.validate(&Value::Float(1.0)).is_ok());
        assert!(width.validate(&Value::Int(1)).is_ok());
        assert!(width.validate(&Value::Float(2.5)).is_err());
        assert!(width.validate(&Value::str("wide")).is_err());

        let color = PropertyDef::new(
            "color",
            "Color",
            PropertyKind::Choice(vec![Value::sym("oak"), Value::sym("white")]),
        );
        assert!(color.validate(&Value::sym("oak")).is_ok());
        assert!(color.validate(&Value::sym("red")).is_err());

        let label = PropertyDef::new("label", "Label", PropertyKind::String).with_max_length(3);
        assert!(label.validate(&Value::str("abc")).is_ok());
        assert!(label.validate(&Value::str("abcd")).is_err());
    }

    #[test]
    fn definitions_serialize() {
        let def = PropertyDef::new("width", "Width", PropertyKind::Float)
            .with_range(0.4, 2.0)
            .at(3);
        let json = serde_json::to_string(&def).unwrap();
        let back: PropertyDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
