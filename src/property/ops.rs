//! Property reads, writes, rollback and change tracking.

use std::rc::Rc;

use crate::error::{OfmlResult, PropertyError};
use crate::hierarchy::InstanceId;
use crate::runtime::Runtime;
use crate::symbol::{SymbolId, intern};
use crate::value::Value;

use super::{PropertyDef, PropertyKind, PropertyState, PropertyTable};

/// Keys touched by running `set_prop_value` calls, innermost last.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    frames: Vec<Vec<SymbolId>>,
    last: Vec<SymbolId>,
}

impl ChangeTracker {
    fn record(&mut self, key: SymbolId) {
        if let Some(frame) = self.frames.last_mut() {
            if !frame.contains(&key) {
                frame.push(key);
            }
        }
    }

    fn current(&self) -> Vec<SymbolId> {
        self.frames.last().cloned().unwrap_or_else(|| self.last.clone())
    }
}

/// Property state captured before a change.
struct PropSnapshot {
    table: PropertyTable,
    values: Vec<(SymbolId, Value)>,
}

/// `get` + `width` → `getWidth`.
fn accessor(prefix: &str, key: SymbolId) -> SymbolId {
    let label = key.label();
    let mut chars = label.chars();
    let name = match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    };
    intern(&name)
}

impl Runtime {
    /// Register or overwrite a property definition on `id`. Returns whether
    /// the definition changed.
    pub fn setup_property(&mut self, id: InstanceId, def: PropertyDef) -> OfmlResult<bool> {
        self.ensure_not_busy(id, "declare a property on")?;
        Ok(self.instance_mut(id)?.props.setup(def))
    }

    pub fn prop_def(&self, id: InstanceId, key: impl Into<SymbolId>) -> OfmlResult<Option<PropertyDef>> {
        Ok(self.instance(id)?.props.get(key.into()).cloned())
    }

    /// Keys in presentation order.
    pub fn property_keys(&self, id: InstanceId) -> OfmlResult<Vec<SymbolId>> {
        Ok(self.instance(id)?.props.keys())
    }

    /// Drop a definition and its stored value.
    pub fn remove_property(&mut self, id: InstanceId, key: impl Into<SymbolId>) -> OfmlResult<bool> {
        let key = key.into();
        self.ensure_not_busy(id, "remove a property from")?;
        let inst = self.instance_mut(id)?;
        let removed = inst.props.remove(key).is_some();
        if removed {
            inst.dynamic.remove(&key);
        }
        Ok(removed)
    }

    pub fn set_prop_state(
        &mut self,
        id: InstanceId,
        key: impl Into<SymbolId>,
        state: PropertyState,
    ) -> OfmlResult<()> {
        let key = key.into();
        let instance = self.describe(id);
        let def = self
            .instance_mut(id)?
            .props
            .get_mut(key)
            .ok_or_else(|| PropertyError::Unknown {
                property: key.to_string(),
                instance,
            })?;
        def.state = state;
        Ok(())
    }

    pub fn prop_state(&self, id: InstanceId, key: impl Into<SymbolId>) -> OfmlResult<PropertyState> {
        let key = key.into();
        self.instance(id)?
            .props
            .get(key)
            .map(|def| def.state)
            .ok_or_else(|| {
                PropertyError::Unknown {
                    property: key.to_string(),
                    instance: self.describe(id),
                }
                .into()
            })
    }

    /// Current value of a declared property: the `get<Key>` accessor if the
    /// type has one, else the dynamic hash. `Void` when undeclared or unset.
    pub fn get_prop_value(&mut self, id: InstanceId, key: impl Into<SymbolId>) -> OfmlResult<Value> {
        let key = key.into();
        let inst = self.instance(id)?;
        if !inst.props.contains(key) {
            return Ok(Value::Void);
        }
        if let Some((_, getter)) = self.find_method(inst.type_id, accessor("get", key)) {
            return getter.invoke(self, Some(id), &[]);
        }
        Ok(self
            .instance(id)?
            .dynamic
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    /// Store a value without validation or `propsChanged`, through the
    /// `set<Key>` accessor if there is one. The key is recorded in the
    /// running change list.
    pub fn write_prop_value(
        &mut self,
        id: InstanceId,
        key: impl Into<SymbolId>,
        value: Value,
    ) -> OfmlResult<()> {
        let key = key.into();
        let ty = self.type_of(id)?;
        self.changes.record(key);
        match self.find_method(ty, accessor("set", key)) {
            Some((_, setter)) => {
                setter.invoke(self, Some(id), &[value])?;
            }
            None => {
                self.instance_mut(id)?.dynamic.insert(key, value);
            }
        }
        Ok(())
    }

    /// Change a property under the full protocol.
    ///
    /// Every call starts a fresh change list. Undeclared keys are ignored
    /// (`Ok(false)`); disabled ones are refused.
    /// After the write, the program's product data may propagate the change,
    /// then the type's `propsChanged(keys, 1)` may reject it. A rejection, or
    /// an error from either step, restores every property to its prior state and notifies
    /// `propsChanged(keys, 0)`; errors are returned after that. Returns whether
    /// definitions or values differ from before the call.
    pub fn set_prop_value(
        &mut self,
        id: InstanceId,
        key: impl Into<SymbolId>,
        value: Value,
    ) -> OfmlResult<bool> {
        let key = key.into();
        self.changes.last.clear();
        let Some(def) = self.prop_def(id, key)? else {
            return Ok(false);
        };
        if def.state == PropertyState::Disabled {
            return Err(PropertyError::Disabled {
                property: key.to_string(),
            }
            .into());
        }
        if self.config().validate_properties {
            self.check_prop_value(id, &def, &value)?;
        }

        let before = self.capture_props(id)?;
        self.changes.frames.push(Vec::new());
        let result = self.apply_prop_change(id, key, value, &before);
        let frame = self.changes.frames.pop().unwrap_or_default();
        self.changes.last = frame;
        result
    }

    fn apply_prop_change(
        &mut self,
        id: InstanceId,
        key: SymbolId,
        value: Value,
        before: &PropSnapshot,
    ) -> OfmlResult<bool> {
        let accepted = self.write_and_check(id, key, value);
        if !matches!(accepted, Ok(true)) {
            let keys = self.changes.current();
            self.restore_props(id, before)?;
            let notified = self.props_changed(id, &keys, false);
            tracing::info!(instance = %self.describe(id), key = %key, "property change rolled back");
            accepted?;
            notified?;
        }

        let after = self.capture_props(id)?;
        let values_changed = after.values != before.values;
        if values_changed {
            self.instance_mut(id)?.changed = true;
        }
        Ok(values_changed || after.table != before.table)
    }

    /// Write, let product data propagate, then ask `propsChanged(keys, 1)`.
    fn write_and_check(&mut self, id: InstanceId, key: SymbolId, value: Value) -> OfmlResult<bool> {
        self.write_prop_value(id, key, value)?;
        if let Some(product_data) = self.product_data_for(id)? {
            product_data.evaluate(self, id, key)?;
        }
        let keys = self.changes.current();
        self.props_changed(id, &keys, true)
    }

    /// Keys touched by the innermost running `set_prop_value`, or by the last
    /// completed one.
    pub fn changed_prop_list(&self) -> Vec<SymbolId> {
        self.changes.current()
    }

    /// Allowed values of a choice property.
    pub fn choices(&mut self, id: InstanceId, key: impl Into<SymbolId>) -> OfmlResult<Vec<Value>> {
        let key = key.into();
        let def = self.prop_def(id, key)?.ok_or_else(|| PropertyError::Unknown {
            property: key.to_string(),
            instance: self.describe(id),
        })?;
        match def.kind {
            PropertyKind::Choice(list) => Ok(list),
            PropertyKind::ChoiceFn(method) => {
                match self.call_method(id, method, &[Value::Symbol(key)])? {
                    Value::List(items) => Ok(items),
                    Value::Void => Ok(Vec::new()),
                    other => Ok(vec![other]),
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Validate against the definition, evaluating computed choices.
    pub(crate) fn check_prop_value(
        &mut self,
        id: InstanceId,
        def: &PropertyDef,
        value: &Value,
    ) -> OfmlResult<()> {
        let mut verdict = def.validate(value);
        if verdict.is_ok() && matches!(def.kind, PropertyKind::ChoiceFn(_)) {
            let allowed = self.choices(id, def.key)?;
            if !allowed.iter().any(|c| crate::dispatch::values_equal(c, value)) {
                verdict = Err(format!("{value} is not one of the allowed choices"));
            }
        }
        verdict.map_err(|message| {
            PropertyError::InvalidValue {
                property: def.key.to_string(),
                message,
            }
            .into()
        })
    }

    /// `propsChanged(keys, checks)`; no handler or a `Void` result accepts.
    fn props_changed(&mut self, id: InstanceId, keys: &[SymbolId], checks: bool) -> OfmlResult<bool> {
        let ty = self.type_of(id)?;
        let Some((_, handler)) = self.find_method(ty, intern("propsChanged")) else {
            return Ok(true);
        };
        let args = [
            Value::List(keys.iter().map(|k| Value::Symbol(*k)).collect()),
            Value::Int(i64::from(checks)),
        ];
        let result = handler.invoke(self, Some(id), &args)?;
        Ok(result.is_void() || result.is_truthy())
    }

    fn capture_props(&mut self, id: InstanceId) -> OfmlResult<PropSnapshot> {
        let table = self.instance(id)?.props.clone();
        let mut values = Vec::with_capacity(table.len());
        for key in table.keys() {
            values.push((key, self.get_prop_value(id, key)?));
        }
        Ok(PropSnapshot { table, values })
    }

    fn restore_props(&mut self, id: InstanceId, before: &PropSnapshot) -> OfmlResult<()> {
        let inst = self.instance_mut(id)?;
        let added: Vec<SymbolId> = inst
            .props
            .keys()
            .into_iter()
            .filter(|k| !before.table.contains(*k))
            .collect();
        for key in added {
            inst.dynamic.remove(&key);
        }
        inst.props = before.table.clone();
        for (key, value) in &before.values {
            if self.get_prop_value(id, *key)? != *value {
                self.write_prop_value(id, *key, value.clone())?;
            }
        }
        Ok(())
    }

    fn product_data_for(&self, id: InstanceId) -> OfmlResult<Option<Rc<dyn crate::collab::ProductData>>> {
        let program = self.program_of(id)?;
        Ok(self.product_data.get(&program).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OfmlError;
    use crate::types::TypeDef;

    #[test]
    fn accessor_names_capitalize_the_key() {
        assert_eq!(accessor("get", intern("width")).to_string(), "getWidth");
        assert_eq!(accessor("set", intern("x")).to_string(), "setX");
    }

    fn test_runtime() -> (Runtime, InstanceId) {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Panel")).unwrap();
        let p = rt.instantiate("Panel", None, "panel", &[]).unwrap();
        rt.setup_property(
            p,
            PropertyDef::new("width", "Width", PropertyKind::Float).with_range(0.2, 1.2),
        )
        .unwrap();
        (rt, p)
    }

    #[test]
    fn undeclared_keys_are_ignored() {
        let (mut rt, p) = test_runtime();
        assert!(!rt.set_prop_value(p, "depth", Value::Float(0.5)).unwrap());
        assert!(rt.get_prop_value(p, "depth").unwrap().is_void());
        assert!(!rt.is_changed(p).unwrap());
    }

    #[test]
    fn set_and_get_through_hash() {
        let (mut rt, p) = test_runtime();
        assert!(rt.set_prop_value(p, "width", Value::Float(0.8)).unwrap());
        assert_eq!(rt.get_prop_value(p, "width").unwrap(), Value::Float(0.8));
        assert!(rt.is_changed(p).unwrap());
        assert!(!rt.set_prop_value(p, "width", Value::Float(0.8)).unwrap());
        assert_eq!(rt.changed_prop_list(), vec![intern("width")]);
    }

    #[test]
    fn invalid_and_disabled_writes_are_errors() {
        let (mut rt, p) = test_runtime();
        assert!(matches!(
            rt.set_prop_value(p, "width", Value::Float(3.0)),
            Err(OfmlError::Property(PropertyError::InvalidValue { .. }))
        ));
        rt.set_prop_state(p, "width", PropertyState::Disabled).unwrap();
        assert!(matches!(
            rt.set_prop_value(p, "width", Value::Float(0.5)),
            Err(OfmlError::Property(PropertyError::Disabled { .. }))
        ));
        assert!(matches!(
            rt.prop_state(p, "height"),
            Err(OfmlError::Property(PropertyError::Unknown { .. }))
        ));
    }

    #[test]
    fn remove_property_forgets_value() {
        let (mut rt, p) = test_runtime();
        rt.set_prop_value(p, "width", Value::Float(0.5)).unwrap();
        assert!(rt.remove_property(p, "width").unwrap());
        assert!(!rt.remove_property(p, "width").unwrap());
        assert!(rt.get_prop_value(p, "width").unwrap().is_void());
    }
}
