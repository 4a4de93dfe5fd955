//! Dynamic dispatch: attribute resolution, method calls and operators.
//!
//! # Resolution order
//!
//! [`Runtime::resolve`] looks a name up on an instance in this order:
//!
//! 1. a child with that local name,
//! 2. a dynamic property in the instance's side hash,
//! 3. a declared field,
//! 4. a method, walking the concrete type's chain upward.
//!
//! Method lookups go through a [`DispatchCache`] keyed by `(type, name)`.
//! Entries carry the registry epoch they were computed under and are
//! recomputed when the registry has changed since.

pub mod ops;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{DispatchError, OfmlError, OfmlResult};
use crate::hierarchy::InstanceId;
use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::types::{MethodDef, TypeId, TypeRegistry};
use crate::value::Value;

pub use ops::{BinaryOp, UnaryOp, apply_binary, apply_unary, values_equal};

/// What a name resolved to on an instance.
#[derive(Debug, Clone)]
pub enum Slot {
    Child(InstanceId),
    Dynamic(Value),
    Field(Value),
    Method { owner: TypeId, method: Rc<MethodDef> },
}

impl Slot {
    /// The slot as a value. Methods are not values.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Slot::Child(id) => Some(Value::Instance(id)),
            Slot::Dynamic(v) | Slot::Field(v) => Some(v),
            Slot::Method { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

type Found = Option<(TypeId, Rc<MethodDef>)>;

struct CacheEntry {
    epoch: u64,
    found: Found,
}

/// Memoised method lookups, invalidated lazily by registry epoch.
#[derive(Default)]
pub struct DispatchCache {
    entries: RefCell<HashMap<(TypeId, SymbolId), CacheEntry>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

/// Counters reported by [`DispatchCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl DispatchCache {
    pub fn lookup(&self, types: &TypeRegistry, ty: TypeId, name: SymbolId) -> Found {
        let epoch = types.epoch();
        if let Some(entry) = self.entries.borrow().get(&(ty, name)) {
            if entry.epoch == epoch {
                self.hits.set(self.hits.get() + 1);
                return entry.found.clone();
            }
        }
        self.misses.set(self.misses.get() + 1);
        let found = types.find_method(ty, name);
        self.entries.borrow_mut().insert(
            (ty, name),
            CacheEntry {
                epoch,
                found: found.clone(),
            },
        );
        found
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            entries: self.entries.borrow().len(),
        }
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl std::fmt::Debug for DispatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCache")
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Runtime entry points
// ---------------------------------------------------------------------------

impl Runtime {
    /// Method lookup honouring `dispatch_cache` in the config.
    pub fn find_method(&self, ty: TypeId, name: SymbolId) -> Found {
        if self.config().dispatch_cache {
            self.cache.lookup(&self.types, ty, name)
        } else {
            self.types.find_method(ty, name)
        }
    }

    /// Resolve `name` on `instance`. See the module docs for the order.
    pub fn resolve(&self, instance: InstanceId, name: SymbolId) -> OfmlResult<Slot> {
        let inst = self.instance(instance)?;
        if let Some(child) = self.child_by_name(instance, &name.label())? {
            return Ok(Slot::Child(child));
        }
        if let Some(value) = inst.dynamic.get(&name) {
            return Ok(Slot::Dynamic(value.clone()));
        }
        if let Some(value) = inst.fields.get(&name) {
            return Ok(Slot::Field(value.clone()));
        }
        if let Some((owner, method)) = self.find_method(inst.type_id, name) {
            return Ok(Slot::Method { owner, method });
        }
        Err(DispatchError::NoSuchAttribute {
            receiver: self.describe(instance),
            name: name.to_string(),
        }
        .into())
    }

    /// Read an attribute as a value.
    pub fn get_attr(&self, instance: InstanceId, name: impl Into<SymbolId>) -> OfmlResult<Value> {
        let name = name.into();
        self.resolve(instance, name)?.into_value().ok_or_else(|| {
            DispatchError::MethodAsValue {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Write an attribute: a declared field if there is one, otherwise a
    /// dynamic slot (created on demand).
    pub fn set_attr(
        &mut self,
        instance: InstanceId,
        name: impl Into<SymbolId>,
        value: Value,
    ) -> OfmlResult<()> {
        let name = name.into();
        let inst = self.instance_mut(instance)?;
        if let Some(slot) = inst.fields.get_mut(&name) {
            *slot = value;
        } else {
            inst.dynamic.insert(name, value);
        }
        Ok(())
    }

    /// Call an instance method.
    pub fn call_method(
        &mut self,
        instance: InstanceId,
        name: impl Into<SymbolId>,
        args: &[Value],
    ) -> OfmlResult<Value> {
        let name = name.into();
        let ty = self.type_of(instance)?;
        match self.find_method(ty, name) {
            Some((_, method)) => method.invoke(self, Some(instance), args),
            None => Err(self.not_a_method(instance, name)),
        }
    }

    fn not_a_method(&self, instance: InstanceId, name: SymbolId) -> OfmlError {
        match self.resolve(instance, name) {
            Ok(_) => DispatchError::NotCallable {
                name: name.to_string(),
            }
            .into(),
            Err(err) => err,
        }
    }

    /// Call a method through a type, without a receiver.
    pub fn call_static(
        &mut self,
        type_name: &str,
        name: impl Into<SymbolId>,
        args: &[Value],
    ) -> OfmlResult<Value> {
        let name = name.into();
        let ty = self.lookup_type(type_name)?;
        let (_, method) = self
            .find_method(ty, name)
            .ok_or_else(|| DispatchError::NoSuchAttribute {
                receiver: type_name.to_string(),
                name: name.to_string(),
            })?;
        method.invoke(self, None, args)
    }

    /// Call the implementation `from_type`'s supertype would provide.
    ///
    /// Initializers use this to chain explicitly: `initialize` is never
    /// cascaded automatically.
    pub fn call_super(
        &mut self,
        from_type: &str,
        instance: InstanceId,
        name: impl Into<SymbolId>,
        args: &[Value],
    ) -> OfmlResult<Value> {
        let name = name.into();
        let ty = self.lookup_type(from_type)?;
        let Some(sup) = self.types.supertype(ty) else {
            return Err(DispatchError::NoSuchAttribute {
                receiver: format!("super of {from_type}"),
                name: name.to_string(),
            }
            .into());
        };
        let (_, method) =
            self.find_method(sup, name)
                .ok_or_else(|| DispatchError::NoSuchAttribute {
                    receiver: self.types.name(sup),
                    name: name.to_string(),
                })?;
        method.invoke(self, Some(instance), args)
    }

    /// Like [`call_super`](Self::call_super), but a missing supertype method is
    /// a no-op returning `Void`.
    pub fn call_super_if_any(
        &mut self,
        from_type: &str,
        instance: InstanceId,
        name: impl Into<SymbolId>,
        args: &[Value],
    ) -> OfmlResult<Value> {
        let name = name.into();
        let ty = self.lookup_type(from_type)?;
        match self.types.supertype(ty).and_then(|sup| self.find_method(sup, name)) {
            Some((_, method)) => method.invoke(self, Some(instance), args),
            None => Ok(Value::Void),
        }
    }

    /// Evaluate `left op right`.
    ///
    /// A null operand of `==`/`!=` compares equal only to another null and
    /// never reaches a handler. Otherwise an instance on the left is asked for
    /// an `operator<token>` handler before the built-in semantics apply.
    pub fn eval_binary(&mut self, left: &Value, op: BinaryOp, right: &Value) -> OfmlResult<Value> {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && (left.is_null() || right.is_null()) {
            let equal = left.is_null() && right.is_null();
            return Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }));
        }
        if let Value::Instance(id) = left {
            let ty = self.type_of(*id)?;
            if let Some(handler) = self.types.find_operator(ty, op) {
                return handler.invoke(self, Some(*id), std::slice::from_ref(right));
            }
        }
        Ok(apply_binary(left, op, right)?)
    }

    pub fn eval_unary(&mut self, op: UnaryOp, value: &Value) -> OfmlResult<Value> {
        Ok(apply_unary(op, value)?)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;
    use crate::types::TypeDef;

    fn test_runtime() -> Runtime {
        let mut rt = Runtime::default();
        rt.register(
            TypeDef::new("Base")
                .field("width", 1.0)
                .method("describe", |_, _, _| Ok(Value::str("base")))
                .method("initialize", |rt, this, _| {
                    let this = this.ok_or_else(|| DispatchError::MissingReceiver {
                        name: "initialize".into(),
                    })?;
                    rt.set_attr(this, "initialized", Value::Bool(true))
                        .map(|_| Value::Void)
                }),
        )
        .unwrap();
        rt.register(
            TypeDef::new("Derived")
                .extends("Base")
                .method("describe", |_, _, _| Ok(Value::str("derived")))
                .method_def(MethodDef::new("make", |_, _, _| Ok(Value::Int(42))).static_method())
                .method_def(
                    MethodDef::new("scale", |rt, this, args| {
                        let this = this.ok_or_else(|| DispatchError::MissingReceiver {
                            name: "scale".into(),
                        })?;
                        let width = rt.get_attr(this, "width")?;
                        rt.eval_binary(&width, BinaryOp::Mul, &args[0])
                    })
                    .with_arity(1),
                ),
        )
        .unwrap();
        rt
    }

    #[test]
    fn resolution_prefers_children_then_dynamic_then_fields() {
        let mut rt = test_runtime();
        let root = rt.instantiate("Derived", None, "env", &[]).unwrap();
        let child = rt.instantiate("Base", Some(root), "width", &[]).unwrap();
        assert!(matches!(
            rt.resolve(root, intern("width")).unwrap(),
            Slot::Child(id) if id == child
        ));
        rt.set_attr(child, "width", Value::Float(3.0)).unwrap();
        assert_eq!(rt.get_attr(child, "width").unwrap(), Value::Float(3.0));
        rt.set_attr(child, "color", Value::sym("oak")).unwrap();
        assert!(matches!(
            rt.resolve(child, intern("color")).unwrap(),
            Slot::Dynamic(_)
        ));
    }

    #[test]
    fn most_derived_method_wins() {
        let mut rt = test_runtime();
        let d = rt.instantiate("Derived", None, "d", &[]).unwrap();
        assert_eq!(rt.call_method(d, "describe", &[]).unwrap(), Value::str("derived"));
        assert_eq!(
            rt.call_super("Derived", d, "describe", &[]).unwrap(),
            Value::str("base")
        );
    }

    #[test]
    fn initializer_is_inherited_and_runs_once() {
        let mut rt = test_runtime();
        let d = rt.instantiate("Derived", None, "d", &[]).unwrap();
        assert_eq!(rt.get_attr(d, "initialized").unwrap(), Value::Bool(true));
    }

    #[test]
    fn missing_attribute_and_non_callable() {
        let mut rt = test_runtime();
        let d = rt.instantiate("Derived", None, "d", &[]).unwrap();
        let err = rt.call_method(d, "missing", &[]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::OfmlError::Dispatch(DispatchError::NoSuchAttribute { .. })
        ));
        let err = rt.call_method(d, "width", &[]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::OfmlError::Dispatch(DispatchError::NotCallable { .. })
        ));
    }

    #[test]
    fn reading_a_method_as_a_value_names_the_method() {
        let mut rt = test_runtime();
        let d = rt.instantiate("Derived", None, "d", &[]).unwrap();
        let err = rt.get_attr(d, "scale").unwrap_err();
        assert!(matches!(
            err,
            crate::error::OfmlError::Dispatch(DispatchError::MethodAsValue { .. })
        ));
        assert_eq!(err.to_string(), "attribute scale is a method, not a value");
    }

    #[test]
    fn arity_and_receiver_are_checked() {
        let mut rt = test_runtime();
        let d = rt.instantiate("Derived", None, "d", &[]).unwrap();
        assert_eq!(
            rt.call_method(d, "scale", &[Value::Int(2)]).unwrap(),
            Value::Float(2.0)
        );
        assert!(matches!(
            rt.call_method(d, "scale", &[]),
            Err(crate::error::OfmlError::Dispatch(DispatchError::ArityMismatch { expected: 1, actual: 0, .. }))
        ));
        assert_eq!(rt.call_static("Derived", "make", &[]).unwrap(), Value::Int(42));
        assert!(matches!(
            rt.call_static("Derived", "describe", &[]),
            Err(crate::error::OfmlError::Dispatch(DispatchError::MissingReceiver { .. }))
        ));
    }

    #[test]
    fn cache_is_invalidated_by_redefinition() {
        let mut rt = test_runtime();
        let d = rt.instantiate("Derived", None, "d", &[]).unwrap();
        assert_eq!(rt.call_method(d, "describe", &[]).unwrap(), Value::str("derived"));
        assert_eq!(rt.call_method(d, "describe", &[]).unwrap(), Value::str("derived"));
        assert!(rt.cache_stats().hits >= 1);

        rt.redefine(
            "Derived",
            TypeDef::new("Derived")
                .extends("Base")
                .method("describe", |_, _, _| Ok(Value::str("redefined"))),
        )
        .unwrap();
        assert_eq!(rt.call_method(d, "describe", &[]).unwrap(), Value::str("redefined"));
    }

    #[test]
    fn null_equality_bypasses_handlers() {
        let mut rt = Runtime::default();
        rt.register(
            TypeDef::new("Always").method("operator==", |_, _, _| Ok(Value::Bool(true))),
        )
        .unwrap();
        let a = rt.instantiate("Always", None, "a", &[]).unwrap();
        let inst = Value::Instance(a);
        assert_eq!(
            rt.eval_binary(&inst, BinaryOp::Eq, &Value::Null).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            rt.eval_binary(&Value::Null, BinaryOp::Eq, &Value::Null).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            rt.eval_binary(&inst, BinaryOp::Eq, &Value::Int(5)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn operator_handler_receives_right_operand() {
        let mut rt = Runtime::default();
        rt.register(
            TypeDef::new("Counter")
                .field("count", Value::Int(10))
                .method("operator+", |rt, this, args| {
                    let this = this.ok_or_else(|| DispatchError::MissingReceiver {
                        name: "operator+".into(),
                    })?;
                    let count = rt.get_attr(this, "count")?;
                    rt.eval_binary(&count, BinaryOp::Add, &args[0])
                }),
        )
        .unwrap();
        let c = rt.instantiate("Counter", None, "c", &[]).unwrap();
        assert_eq!(
            rt.eval_binary(&Value::Instance(c), BinaryOp::Add, &Value::Int(5)).unwrap(),
            Value::Int(15)
        );
        assert!(rt
            .eval_binary(&Value::Instance(c), BinaryOp::Sub, &Value::Int(5))
            .is_err());
    }
}
