//! Creation, element insertion, removal and renaming.

use std::collections::{HashMap, HashSet};

use crate::error::{HierarchyError, InstantiationError, OfmlResult};
use crate::rules::{ChainOutcome, Reason, RuleFailure};
use crate::runtime::Runtime;
use crate::symbol::intern;
use crate::types::TypeId;
use crate::value::Value;

use super::naming::{next_element_name, validate_local_name};
use super::{Instance, InstanceId, InstanceState};

/// Result of [`Runtime::add_element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementCreation {
    /// `CREATE_ELEMENT` rejected the type; nothing was constructed.
    Rejected(RuleFailure),
    Accepted(InstanceId),
    /// Constructed, but `NEW_ELEMENT` rejected it: it stays a plain child.
    Demoted {
        instance: InstanceId,
        failure: RuleFailure,
    },
}

impl ElementCreation {
    /// The constructed instance, element or not.
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            ElementCreation::Rejected(_) => None,
            ElementCreation::Accepted(id) | ElementCreation::Demoted { instance: id, .. } => {
                Some(*id)
            }
        }
    }
}

/// Result of [`Runtime::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Destroyed instances, children before their father.
    Removed { destroyed: Vec<InstanceId> },
    Vetoed(RuleFailure),
}

impl RemoveOutcome {
    pub fn is_removed(&self) -> bool {
        matches!(self, RemoveOutcome::Removed { .. })
    }
}

impl Runtime {
    /// Create an instance of `type_name` named `name` under `father` (or as a
    /// root), then run the type's `initialize` method with `args`.
    ///
    /// Only the most specific `initialize` runs; it calls its supertype's
    /// explicitly through [`call_super`](Self::call_super) when it wants to.
    pub fn instantiate(
        &mut self,
        type_name: &str,
        father: Option<InstanceId>,
        name: &str,
        args: &[Value],
    ) -> OfmlResult<InstanceId> {
        let ty = self.instantiable_type(type_name)?;
        validate_local_name(name)?;
        match father {
            Some(f) => {
                self.ensure_accepts_children(f, "create a child of")?;
                if self.child_by_name(f, name)?.is_some() {
                    return Err(InstantiationError::DuplicateName {
                        father: self.describe(f),
                        name: name.to_string(),
                    }
                    .into());
                }
            }
            None => {
                if self.root_by_name(name).is_some() {
                    return Err(InstantiationError::DuplicateRoot {
                        name: name.to_string(),
                    }
                    .into());
                }
            }
        }
        self.create_instance(ty, father, name.to_string(), args, false)
    }

    /// Insert an element of `type_name` under `father`, gated by the father's
    /// `CREATE_ELEMENT` rules (argument: the type name as a symbol) and
    /// confirmed by its `NEW_ELEMENT` rules (argument: the new instance).
    pub fn add_element(
        &mut self,
        father: InstanceId,
        type_name: &str,
        args: &[Value],
    ) -> OfmlResult<ElementCreation> {
        self.ensure_accepts_children(father, "add an element to")?;
        let ty = self.instantiable_type(type_name)?;
        let type_symbol = intern(&self.types.name(ty));

        if let ChainOutcome::Failed(failure) =
            self.call_rules(father, Reason::CREATE_ELEMENT, Value::Symbol(type_symbol))?
        {
            tracing::info!(father = %self.describe(father), ty = %type_symbol, "element creation rejected");
            return Ok(ElementCreation::Rejected(failure));
        }

        let taken: HashSet<String> = self
            .children(father)?
            .into_iter()
            .filter_map(|c| self.arena.get(c).map(|i| i.local_name().to_string()))
            .collect();
        let name = next_element_name(|n| taken.contains(n));
        let child = self.create_instance(ty, Some(father), name, args, true)?;

        match self.call_rules(father, Reason::NEW_ELEMENT, Value::Instance(child))? {
            ChainOutcome::Completed { .. } => Ok(ElementCreation::Accepted(child)),
            ChainOutcome::Failed(failure) => {
                self.instance_mut(child)?.element = false;
                tracing::info!(child = %self.describe(child), "new element demoted to child");
                Ok(ElementCreation::Demoted {
                    instance: child,
                    failure,
                })
            }
        }
    }

    /// Remove an instance and its whole subtree.
    ///
    /// Elements ask their father's `REMOVE_ELEMENT` rules first; a rejection
    /// leaves everything in place.
    pub fn remove(&mut self, id: InstanceId) -> OfmlResult<RemoveOutcome> {
        let inst = self.instance(id)?;
        if inst.state != InstanceState::Live {
            return Err(HierarchyError::InvalidState {
                instance: self.describe(id),
                state: inst.state.to_string(),
                operation: "remove",
            }
            .into());
        }
        let father = inst.father;
        let element = inst.element;

        for node in self.subtree(id)? {
            self.ensure_not_busy(node, "remove")?;
        }
        if let Some(f) = father {
            self.ensure_not_busy(f, "remove a child of")?;
        }

        if let (true, Some(f)) = (element, father) {
            if let ChainOutcome::Failed(failure) =
                self.call_rules(f, Reason::REMOVE_ELEMENT, Value::Instance(id))?
            {
                tracing::info!(instance = %self.describe(id), "removal vetoed");
                return Ok(RemoveOutcome::Vetoed(failure));
            }
            // A rule may already have taken the instance away.
            self.instance(id)?;
        }

        let name = self.describe(id);
        let mut destroyed = Vec::new();
        self.destroy_subtree(id, &mut destroyed);
        if let Some(f) = father {
            if let Ok(father) = self.instance_mut(f) {
                father.children.retain(|c| *c != id);
            }
        }
        tracing::debug!(instance = %name, destroyed = destroyed.len(), "instance removed");
        Ok(RemoveOutcome::Removed { destroyed })
    }

    /// Change the local name of `id`. Absolute names below it are recomputed
    /// on next access.
    pub fn rename(&mut self, id: InstanceId, name: &str) -> OfmlResult<()> {
        validate_local_name(name)?;
        self.ensure_not_busy(id, "rename")?;
        let inst = self.instance(id)?;
        if inst.local_name() == name {
            return Ok(());
        }
        match inst.father {
            Some(f) => {
                self.ensure_not_busy(f, "rename a child of")?;
                if self.child_by_name(f, name)?.is_some() {
                    return Err(InstantiationError::DuplicateName {
                        father: self.describe(f),
                        name: name.to_string(),
                    }
                    .into());
                }
            }
            None => {
                if self.root_by_name(name).is_some() {
                    return Err(InstantiationError::DuplicateRoot {
                        name: name.to_string(),
                    }
                    .into());
                }
            }
        }

        let subtree = self.subtree(id)?;
        self.instance_mut(id)?.set_local_name(name.to_string());
        for node in subtree {
            if let Some(inst) = self.arena.get_mut(node) {
                inst.forget_absolute_name();
            }
        }
        Ok(())
    }

    /// Flag an existing child as an element of its father.
    pub fn be_element(&mut self, id: InstanceId) -> OfmlResult<()> {
        let inst = self.instance(id)?;
        if inst.father.is_none() {
            return Err(HierarchyError::InvalidState {
                instance: self.describe(id),
                state: "root".into(),
                operation: "make an element of",
            }
            .into());
        }
        self.ensure_not_busy(id, "make an element of")?;
        self.instance_mut(id)?.element = true;
        Ok(())
    }

    pub fn un_be_element(&mut self, id: InstanceId) -> OfmlResult<()> {
        if !self.instance(id)?.element {
            return Err(HierarchyError::NotAnElement {
                instance: self.describe(id),
            }
            .into());
        }
        self.ensure_not_busy(id, "detach an element from")?;
        self.instance_mut(id)?.element = false;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn instantiable_type(&self, type_name: &str) -> OfmlResult<TypeId> {
        let ty = self.lookup_type(type_name)?;
        if self.types.def(ty).is_abstract() {
            return Err(InstantiationError::AbstractType {
                name: self.types.name(ty),
            }
            .into());
        }
        Ok(ty)
    }

    fn ensure_accepts_children(&self, father: InstanceId, operation: &'static str) -> OfmlResult<()> {
        let inst = self.instance(father)?;
        if !matches!(inst.state, InstanceState::Initializing | InstanceState::Live) {
            return Err(HierarchyError::InvalidState {
                instance: self.describe(father),
                state: inst.state.to_string(),
                operation,
            }
            .into());
        }
        self.ensure_not_busy(father, operation)
    }

    fn create_instance(
        &mut self,
        ty: TypeId,
        father: Option<InstanceId>,
        name: String,
        args: &[Value],
        element: bool,
    ) -> OfmlResult<InstanceId> {
        // Root-first, so derived initial values win.
        let mut fields = HashMap::new();
        for t in self.types.lineage(ty) {
            for field in self.types.def(t).fields() {
                fields.insert(field.name, field.init.clone());
            }
        }

        let order = self.arena.next_order();
        let mut instance = Instance::new(ty, father, name, order);
        instance.fields = fields;
        instance.element = element;
        let id = self.arena.insert(instance)?;
        match father {
            Some(f) => self.instance_mut(f)?.children.push(id),
            None => self.arena.add_root(id),
        }

        self.instance_mut(id)?.state = InstanceState::Initializing;
        if let Some((_, init)) = self.find_method(ty, intern("initialize")) {
            if let Err(err) = init.invoke(self, Some(id), args) {
                tracing::warn!(instance = %self.describe(id), error = %err, "initializer failed");
                self.discard(id);
                return Err(err);
            }
        }
        if let Ok(inst) = self.instance_mut(id) {
            inst.state = InstanceState::Live;
        }
        tracing::debug!(
            instance = %self.describe(id),
            ty = %self.types.name(ty),
            order,
            "instance created"
        );
        Ok(id)
    }

    /// Tear down a subtree without consulting rules.
    fn discard(&mut self, id: InstanceId) {
        let father = self.arena.get(id).and_then(|i| i.father);
        let mut destroyed = Vec::new();
        self.destroy_subtree(id, &mut destroyed);
        if let Some(f) = father {
            if let Some(father) = self.arena.get_mut(f) {
                father.children.retain(|c| *c != id);
            }
        }
    }

    fn destroy_subtree(&mut self, id: InstanceId, destroyed: &mut Vec<InstanceId>) {
        let children = match self.arena.get_mut(id) {
            Some(inst) => {
                inst.state = InstanceState::Removing;
                inst.children.clone()
            }
            None => return,
        };
        for child in children {
            self.destroy_subtree(child, destroyed);
        }
        self.arena.remove(id);
        self.product_data.remove(&id);
        destroyed.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OfmlError;
    use crate::rules::{RuleDef, RuleVerdict};
    use crate::types::TypeDef;

    fn test_runtime() -> Runtime {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Node")).unwrap();
        rt.register(TypeDef::new("Abstract").abstract_type()).unwrap();
        rt
    }

    #[test]
    fn names_are_validated() {
        let mut rt = test_runtime();
        let env = rt.instantiate("Node", None, "env", &[]).unwrap();
        assert!(matches!(
            rt.instantiate("Node", Some(env), "9lives", &[]),
            Err(OfmlError::Instantiation(InstantiationError::MalformedName { .. }))
        ));
        assert!(matches!(
            rt.instantiate("Node", Some(env), "e4", &[]),
            Err(OfmlError::Instantiation(InstantiationError::ReservedName { .. }))
        ));
        assert!(matches!(
            rt.instantiate("Node", None, "env", &[]),
            Err(OfmlError::Instantiation(InstantiationError::DuplicateRoot { .. }))
        ));
    }

    #[test]
    fn abstract_and_unknown_types_cannot_be_instantiated() {
        let mut rt = test_runtime();
        assert!(matches!(
            rt.instantiate("Abstract", None, "a", &[]),
            Err(OfmlError::Instantiation(InstantiationError::AbstractType { .. }))
        ));
        assert!(matches!(
            rt.instantiate("Missing", None, "m", &[]),
            Err(OfmlError::Instantiation(InstantiationError::UnknownType { .. }))
        ));
    }

    #[test]
    fn failed_initializer_leaves_no_trace() {
        let mut rt = test_runtime();
        rt.register(TypeDef::new("Broken").method("initialize", |rt, this, _| {
            let this = this.unwrap();
            rt.instantiate("Node", Some(this), "part", &[])?;
            Err(crate::error::DispatchError::DivisionByZero.into())
        }))
        .unwrap();
        let env = rt.instantiate("Node", None, "env", &[]).unwrap();
        assert!(rt.instantiate("Broken", Some(env), "b", &[]).is_err());
        assert!(rt.children(env).unwrap().is_empty());
        assert_eq!(rt.instance_count(), 1);
    }

    #[test]
    fn elements_get_generated_names() {
        let mut rt = test_runtime();
        let env = rt.instantiate("Node", None, "env", &[]).unwrap();
        let first = rt.add_element(env, "Node", &[]).unwrap().instance().unwrap();
        let second = rt.add_element(env, "Node", &[]).unwrap().instance().unwrap();
        assert_eq!(&*rt.absolute_name(first).unwrap(), "env.e1");
        assert_eq!(&*rt.absolute_name(second).unwrap(), "env.e2");
        assert_eq!(rt.elements(env).unwrap(), vec![first, second]);

        rt.remove(first).unwrap();
        let third = rt.add_element(env, "Node", &[]).unwrap().instance().unwrap();
        assert_eq!(rt.local_name(third).unwrap(), "e1");
    }

    #[test]
    fn new_element_rejection_demotes() {
        let mut rt = test_runtime();
        rt.register(
            TypeDef::new("Picky")
                .rule(RuleDef::posterior(Reason::NEW_ELEMENT, |_, _| Ok(RuleVerdict::Reject))),
        )
        .unwrap();
        let p = rt.instantiate("Picky", None, "p", &[]).unwrap();
        let outcome = rt.add_element(p, "Node", &[]).unwrap();
        let ElementCreation::Demoted { instance, .. } = outcome else {
            panic!("expected demotion, got {outcome:?}");
        };
        assert_eq!(rt.children(p).unwrap(), vec![instance]);
        assert!(rt.elements(p).unwrap().is_empty());
    }

    #[test]
    fn rename_invalidates_descendant_names() {
        let mut rt = test_runtime();
        let env = rt.instantiate("Node", None, "env", &[]).unwrap();
        let a = rt.instantiate("Node", Some(env), "a", &[]).unwrap();
        let b = rt.instantiate("Node", Some(a), "b", &[]).unwrap();
        assert_eq!(&*rt.absolute_name(b).unwrap(), "env.a.b");
        rt.rename(a, "left").unwrap();
        assert_eq!(&*rt.absolute_name(b).unwrap(), "env.left.b");

        rt.instantiate("Node", Some(env), "right", &[]).unwrap();
        assert!(matches!(
            rt.rename(a, "right"),
            Err(OfmlError::Instantiation(InstantiationError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn element_flag_can_be_toggled() {
        let mut rt = test_runtime();
        let env = rt.instantiate("Node", None, "env", &[]).unwrap();
        let a = rt.instantiate("Node", Some(env), "a", &[]).unwrap();
        assert!(matches!(
            rt.un_be_element(a),
            Err(OfmlError::Hierarchy(HierarchyError::NotAnElement { .. }))
        ));
        rt.be_element(a).unwrap();
        assert_eq!(rt.elements(env).unwrap(), vec![a]);
        assert!(rt.be_element(env).is_err());
    }

    #[test]
    fn stale_handles_report_destroyed() {
        let mut rt = test_runtime();
        let env = rt.instantiate("Node", None, "env", &[]).unwrap();
        let a = rt.instantiate("Node", Some(env), "a", &[]).unwrap();
        rt.remove(a).unwrap();
        assert_eq!(rt.state(a), InstanceState::Destroyed);
        assert!(matches!(
            rt.remove(a),
            Err(OfmlError::Hierarchy(HierarchyError::Destroyed { .. }))
        ));
    }
}
