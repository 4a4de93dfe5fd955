//! Type records: fields, methods, rules, categories.
//!
//! A [`TypeDef`] is built with a fluent builder and handed to the
//! [`TypeRegistry`], which resolves its supertype and freezes it behind an
//! `Rc`. Method and rule bodies are native closures receiving the
//! [`Runtime`](crate::runtime::Runtime), so they can read and mutate instance
//! state through the public API.

pub mod registry;

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::consistency::ErrorLog;
use crate::dispatch::BinaryOp;
use crate::error::{DispatchError, OfmlResult};
use crate::hierarchy::InstanceId;
use crate::rules::RuleDef;
use crate::runtime::Runtime;
use crate::symbol::{SymbolId, intern};
use crate::value::Value;

pub use registry::{TypeRecord, TypeRegistry};

/// Index of a registered type. Stable across redefinition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    /// `None` once the index no longer fits an id.
    pub(crate) fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type:{}", self.0)
    }
}

/// Native method body: runtime, optional receiver, arguments.
pub type NativeMethod = Rc<dyn Fn(&mut Runtime, Option<InstanceId>, &[Value]) -> OfmlResult<Value>>;

/// Per-type consistency check, run by [`Runtime::check_consistency`].
pub type ConsistencyHook = Rc<dyn Fn(&Runtime, InstanceId, &mut ErrorLog)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Instance,
    Static,
}

/// A method table entry.
#[derive(Clone)]
pub struct MethodDef {
    pub name: SymbolId,
    /// Required argument count; `None` accepts any.
    pub arity: Option<usize>,
    pub kind: MethodKind,
    body: NativeMethod,
}

impl MethodDef {
    pub fn new(
        name: &str,
        body: impl Fn(&mut Runtime, Option<InstanceId>, &[Value]) -> OfmlResult<Value> + 'static,
    ) -> Self {
        Self {
            name: intern(name),
            arity: None,
            kind: MethodKind::Instance,
            body: Rc::new(body),
        }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn static_method(mut self) -> Self {
        self.kind = MethodKind::Static;
        self
    }

    /// Check arity and receiver, then run the body.
    pub fn invoke(
        &self,
        rt: &mut Runtime,
        receiver: Option<InstanceId>,
        args: &[Value],
    ) -> OfmlResult<Value> {
        if let Some(expected) = self.arity {
            if expected != args.len() {
                return Err(DispatchError::ArityMismatch {
                    name: self.name.to_string(),
                    expected,
                    actual: args.len(),
                }
                .into());
            }
        }
        if self.kind == MethodKind::Instance && receiver.is_none() {
            return Err(DispatchError::MissingReceiver {
                name: self.name.to_string(),
            }
            .into());
        }
        (self.body)(rt, receiver, args)
    }
}

impl std::fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// An instance-variable declaration with its initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: SymbolId,
    pub init: Value,
    pub visibility: Visibility,
}

/// A type definition before (and after) registration.
#[derive(Clone, Default)]
pub struct TypeDef {
    name: String,
    package: String,
    supertype: Option<String>,
    is_abstract: bool,
    is_final: bool,
    fields: Vec<FieldDecl>,
    methods: HashMap<SymbolId, Rc<MethodDef>>,
    rules: HashMap<SymbolId, Vec<Rc<RuleDef>>>,
    categories: BTreeSet<SymbolId>,
    consistency: Option<ConsistencyHook>,
    operators: HashMap<BinaryOp, Rc<MethodDef>>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Place the type in a package such as `::vendor::series`.
    pub fn in_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark the type non-extensible.
    pub fn final_type(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn field(mut self, name: &str, init: impl Into<Value>) -> Self {
        self.fields.push(FieldDecl {
            name: intern(name),
            init: init.into(),
            visibility: Visibility::Public,
        });
        self
    }

    pub fn private_field(mut self, name: &str, init: impl Into<Value>) -> Self {
        self.fields.push(FieldDecl {
            name: intern(name),
            init: init.into(),
            visibility: Visibility::Private,
        });
        self
    }

    /// Add an instance method with any arity.
    pub fn method(
        self,
        name: &str,
        body: impl Fn(&mut Runtime, Option<InstanceId>, &[Value]) -> OfmlResult<Value> + 'static,
    ) -> Self {
        self.method_def(MethodDef::new(name, body))
    }

    pub fn method_def(mut self, def: MethodDef) -> Self {
        self.methods.insert(def.name, Rc::new(def));
        self
    }

    /// Add a rule. Rules for the same reason accumulate in declaration order.
    pub fn rule(mut self, rule: RuleDef) -> Self {
        self.rules.entry(rule.reason).or_default().push(Rc::new(rule));
        self
    }

    /// Declare a category (capability tag) checked by `is_cat`.
    pub fn category(mut self, category: &str) -> Self {
        self.categories.insert(intern(category));
        self
    }

    pub fn consistency_check(
        mut self,
        hook: impl Fn(&Runtime, InstanceId, &mut ErrorLog) + 'static,
    ) -> Self {
        self.consistency = Some(Rc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Package-qualified name, e.g. `::vendor::series::Cabinet`.
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.package, self.name)
        }
    }

    pub fn supertype_name(&self) -> Option<&str> {
        self.supertype.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn method_named(&self, name: SymbolId) -> Option<&Rc<MethodDef>> {
        self.methods.get(&name)
    }

    pub fn has_method(&self, name: SymbolId) -> bool {
        self.methods.contains_key(&name)
    }

    /// Rules declared directly on this type for `reason`, in declaration order.
    pub fn rules_for(&self, reason: SymbolId) -> &[Rc<RuleDef>] {
        self.rules.get(&reason).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn categories(&self) -> &BTreeSet<SymbolId> {
        &self.categories
    }

    pub fn consistency_hook(&self) -> Option<&ConsistencyHook> {
        self.consistency.as_ref()
    }

    pub fn operator(&self, op: BinaryOp) -> Option<&Rc<MethodDef>> {
        self.operators.get(&op)
    }

    /// Build the operator table from methods named `operator<token>`.
    ///
    /// Returns the offending method label on an unknown token.
    pub(crate) fn collect_operators(&mut self) -> Result<(), String> {
        let mut operators = HashMap::new();
        for (name, method) in &self.methods {
            let label = name.label();
            if let Some(token) = label.strip_prefix("operator") {
                let op = BinaryOp::from_token(token).ok_or_else(|| label.to_string())?;
                operators.insert(op, Rc::clone(method));
            }
        }
        self.operators = operators;
        Ok(())
    }
}

impl std::fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.qualified_name())
            .field("supertype", &self.supertype)
            .field("abstract", &self.is_abstract)
            .field("final", &self.is_final)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("categories", &self.categories)
            .finish()
    }
}
