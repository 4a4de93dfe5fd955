//! Consistency sweeps and the error log they fill.
//!
//! Problems found by [`Runtime::check_consistency`] are collected, not
//! returned as errors, so one sweep over a planning can report every
//! independent issue. Entries are keyed by the instance's creation order.

use std::collections::BTreeMap;

use miette::Diagnostic;
use thiserror::Error;

use crate::error::OfmlResult;
use crate::hierarchy::InstanceId;
use crate::runtime::Runtime;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{path}: {message}")]
#[diagnostic(code(ofml::consistency))]
pub struct ConsistencyError {
    pub instance: InstanceId,
    /// Absolute name at the time of the check.
    pub path: String,
    pub property: Option<SymbolId>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: BTreeMap<u64, Vec<ConsistencyError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, order: u64, error: ConsistencyError) {
        self.entries.entry(order).or_default().push(error);
    }

    /// Record a problem on `instance`, keyed by its order identifier.
    pub fn report(
        &mut self,
        rt: &Runtime,
        instance: InstanceId,
        property: Option<SymbolId>,
        message: impl Into<String>,
    ) {
        let order = rt.order_id(instance).unwrap_or(0);
        self.push(
            order,
            ConsistencyError {
                instance,
                path: rt.describe(instance),
                property,
                message: message.into(),
            },
        );
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_for(&self, order: u64) -> &[ConsistencyError] {
        self.entries.get(&order).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All entries, by instance creation order.
    pub fn iter(&self) -> impl Iterator<Item = &ConsistencyError> {
        self.entries.values().flatten()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Runtime {
    /// Walk the subtree of `root` in creation order, checking every enabled
    /// property value against its definition and running each type's
    /// consistency hook, root type first. Returns the number of new entries.
    pub fn check_consistency(&mut self, root: InstanceId, log: &mut ErrorLog) -> OfmlResult<usize> {
        let before = log.len();
        for id in self.subtree(root)? {
            for key in self.property_keys(id)? {
                let Some(def) = self.prop_def(id, key)? else {
                    continue;
                };
                if def.state == crate::property::PropertyState::Disabled {
                    continue;
                }
                let value = self.get_prop_value(id, key)?;
                if value.is_void() {
                    continue;
                }
                if let Err(err) = self.check_prop_value(id, &def, &value) {
                    log.report(self, id, Some(key), err.to_string());
                }
            }

            let ty = self.type_of(id)?;
            for t in self.types.lineage(ty) {
                if let Some(hook) = self.types.def(t).consistency_hook().cloned() {
                    hook(self, id, log);
                }
            }
        }
        let found = log.len() - before;
        if found > 0 {
            tracing::info!(root = %self.describe(root), found, "consistency problems found");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyDef, PropertyKind};
    use crate::types::TypeDef;
    use crate::value::Value;

    #[test]
    fn sweep_collects_property_and_hook_problems() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Unit").consistency_check(|rt, id, log| {
            if rt.children(id).map(|c| c.is_empty()).unwrap_or(false) {
                log.report(rt, id, None, "unit has no parts");
            }
        }))
        .unwrap();
        rt.register(TypeDef::new("Part")).unwrap();
        let unit = rt.instantiate("Unit", None, "unit", &[]).unwrap();
        let part = rt.instantiate("Part", Some(unit), "part", &[]).unwrap();
        let empty = rt.instantiate("Unit", Some(unit), "empty", &[]).unwrap();

        rt.setup_property(part, PropertyDef::new("count", "Count", PropertyKind::Int).with_range(1.0, 4.0))
            .unwrap();
        rt.write_prop_value(part, "count", Value::Int(9)).unwrap();

        let mut log = ErrorLog::new();
        assert_eq!(rt.check_consistency(unit, &mut log).unwrap(), 2);
        let part_order = rt.order_id(part).unwrap();
        assert_eq!(log.entries_for(part_order)[0].property, Some(crate::symbol::intern("count")));
        let empty_order = rt.order_id(empty).unwrap();
        assert_eq!(log.entries_for(empty_order)[0].message, "unit has no parts");
        let paths: Vec<&str> = log.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["unit.part", "unit.empty"]);
    }
}
