//! Chain assembly and execution.

use crate::error::OfmlResult;
use crate::hierarchy::InstanceId;
use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::types::TypeId;
use crate::value::Value;

use super::{ChainLink, ChainOutcome, ParamShape, Reason, RuleCall, RuleFailure, RuleKind, RuleVerdict};

impl Runtime {
    /// Rules for `reason` along `ty`'s lineage: root type first, each type's
    /// rules in declaration order. `phase` keeps only rules of that kind.
    pub fn rule_chain(
        &self,
        ty: TypeId,
        reason: impl Into<SymbolId>,
        phase: Option<RuleKind>,
    ) -> Vec<ChainLink> {
        let reason = reason.into();
        self.types
            .lineage(ty)
            .into_iter()
            .flat_map(|t| {
                self.types
                    .def(t)
                    .rules_for(reason)
                    .iter()
                    .filter(|rule| phase.is_none_or(|kind| rule.kind == kind))
                    .map(move |rule| ChainLink {
                        defining_type: t,
                        rule: rule.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Run every rule for `reason` on `instance`, stopping at the first
    /// rejection. Errors raised by a rule body propagate unchanged.
    pub fn call_rules(
        &mut self,
        instance: InstanceId,
        reason: impl Into<SymbolId>,
        arg: Value,
    ) -> OfmlResult<ChainOutcome> {
        self.run_chain(instance, reason.into(), None, arg)
    }

    /// Like [`call_rules`](Self::call_rules), restricted to one rule kind.
    pub fn call_rules_phase(
        &mut self,
        instance: InstanceId,
        reason: impl Into<SymbolId>,
        kind: RuleKind,
        arg: Value,
    ) -> OfmlResult<ChainOutcome> {
        self.run_chain(instance, reason.into(), Some(kind), arg)
    }

    fn run_chain(
        &mut self,
        instance: InstanceId,
        reason: SymbolId,
        phase: Option<RuleKind>,
        arg: Value,
    ) -> OfmlResult<ChainOutcome> {
        let ty = self.type_of(instance)?;
        let chain = self.rule_chain(ty, reason, phase);
        if chain.is_empty() {
            return Ok(ChainOutcome::Completed { executed: 0 });
        }

        self.instance_mut(instance)?.busy += 1;
        let result = self.execute_chain(instance, reason, &chain, arg);
        if let Ok(inst) = self.instance_mut(instance) {
            inst.busy = inst.busy.saturating_sub(1);
        }
        result
    }

    fn execute_chain(
        &mut self,
        instance: InstanceId,
        reason: SymbolId,
        chain: &[ChainLink],
        arg: Value,
    ) -> OfmlResult<ChainOutcome> {
        for (position, link) in chain.iter().enumerate() {
            let call = RuleCall {
                instance,
                reason,
                arg: match link.rule.params {
                    ParamShape::Nullary => Value::Void,
                    ParamShape::Unary => arg.clone(),
                },
                defining_type: link.defining_type,
            };
            if self.config().trace_rules {
                tracing::trace!(
                    reason = %reason,
                    ty = %self.types.name(link.defining_type),
                    position,
                    "running rule"
                );
            }
            if link.rule.run(self, &call)? == RuleVerdict::Reject {
                let failure = RuleFailure {
                    instance,
                    reason,
                    defining_type: self.types.name(link.defining_type),
                    position,
                };
                tracing::debug!(
                    reason = %reason,
                    ty = %failure.defining_type,
                    position,
                    "rule chain rejected"
                );
                return Ok(ChainOutcome::Failed(failure));
            }
        }
        Ok(ChainOutcome::Completed {
            executed: chain.len(),
        })
    }

    // -----------------------------------------------------------------------
    // Persistence boundary
    // -----------------------------------------------------------------------

    /// Run `START_DUMP` over the subtree, father before children. Instances
    /// are storable until [`finish_dump`](Self::finish_dump).
    pub fn start_dump(&mut self, root: InstanceId) -> OfmlResult<ChainOutcome> {
        self.enter_storable(root, Reason::START_DUMP)
    }

    pub fn finish_dump(&mut self, root: InstanceId) -> OfmlResult<ChainOutcome> {
        self.leave_storable(root, Reason::FINISH_DUMP)
    }

    /// Run `START_EVAL` over a freshly read subtree. Instances stay in their
    /// storable form until [`finish_eval`](Self::finish_eval).
    pub fn start_eval(&mut self, root: InstanceId) -> OfmlResult<ChainOutcome> {
        self.enter_storable(root, Reason::START_EVAL)
    }

    pub fn finish_eval(&mut self, root: InstanceId) -> OfmlResult<ChainOutcome> {
        self.leave_storable(root, Reason::FINISH_EVAL)
    }

    pub fn is_storable(&self, instance: InstanceId) -> OfmlResult<bool> {
        Ok(self.instance(instance)?.storable)
    }

    /// A rejection aborts the sweep and clears the flags already set.
    fn enter_storable(&mut self, root: InstanceId, reason: Reason) -> OfmlResult<ChainOutcome> {
        let nodes = self.subtree(root)?;
        let mut executed = 0;
        for (done, id) in nodes.iter().enumerate() {
            match self.call_rules(*id, reason, Value::Void)? {
                ChainOutcome::Completed { executed: n } => {
                    executed += n;
                    self.instance_mut(*id)?.storable = true;
                }
                failed @ ChainOutcome::Failed(_) => {
                    for prior in &nodes[..done] {
                        self.instance_mut(*prior)?.storable = false;
                    }
                    tracing::warn!(%reason, root = %self.describe(root), "storable sweep aborted");
                    return Ok(failed);
                }
            }
        }
        Ok(ChainOutcome::Completed { executed })
    }

    /// Runs on every instance; the first rejection is reported.
    fn leave_storable(&mut self, root: InstanceId, reason: Reason) -> OfmlResult<ChainOutcome> {
        let nodes = self.subtree(root)?;
        let mut executed = 0;
        let mut first_failure = None;
        for id in nodes {
            match self.call_rules(id, reason, Value::Void)? {
                ChainOutcome::Completed { executed: n } => executed += n,
                ChainOutcome::Failed(failure) => {
                    first_failure.get_or_insert(failure);
                }
            }
            self.instance_mut(id)?.storable = false;
        }
        Ok(match first_failure {
            Some(failure) => ChainOutcome::Failed(failure),
            None => ChainOutcome::Completed { executed },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::{HierarchyError, OfmlError};
    use crate::rules::RuleDef;
    use crate::types::TypeDef;

    #[test]
    fn unknown_reason_completes_trivially() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Base").rule(RuleDef::anterior("CHECK", |_, _| Ok(RuleVerdict::Reject))))
            .unwrap();
        let b = rt.instantiate("Base", None, "b", &[]).unwrap();
        assert_eq!(
            rt.call_rules(b, "UNUSED", Value::Int(1)).unwrap(),
            ChainOutcome::Completed { executed: 0 }
        );
    }

    #[test]
    fn phase_filter_and_nullary_params() {
        let seen: Rc<RefCell<Vec<Value>>> = Rc::default();
        let mut rt = Runtime::default();
        let a = Rc::clone(&seen);
        let p = Rc::clone(&seen);
        rt.register(
            TypeDef::new("Box")
                .rule(RuleDef::anterior(Reason::TRANSLATE, move |_, call| {
                    a.borrow_mut().push(call.arg.clone());
                    Ok(RuleVerdict::Accept)
                }))
                .rule(
                    RuleDef::posterior(Reason::TRANSLATE, move |_, call| {
                        p.borrow_mut().push(call.arg.clone());
                        Ok(RuleVerdict::Accept)
                    })
                    .nullary(),
                ),
        )
        .unwrap();
        let b = rt.instantiate("Box", None, "b", &[]).unwrap();
        let outcome = rt
            .call_rules_phase(b, Reason::TRANSLATE, RuleKind::Anterior, Value::Int(7))
            .unwrap();
        assert_eq!(outcome, ChainOutcome::Completed { executed: 1 });
        rt.call_rules(b, Reason::TRANSLATE, Value::Int(8)).unwrap();
        assert_eq!(*seen.borrow(), [Value::Int(7), Value::Int(8), Value::Void]);
    }

    #[test]
    fn structural_mutation_during_chain_is_rejected() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Leaf")).unwrap();
        rt.register(TypeDef::new("Holder").rule(RuleDef::anterior("PRUNE", |rt, call| {
            let child = rt.child_by_name(call.instance, "leaf")?.unwrap();
            rt.remove(child)?;
            Ok(RuleVerdict::Accept)
        })))
        .unwrap();
        let h = rt.instantiate("Holder", None, "h", &[]).unwrap();
        rt.instantiate("Leaf", Some(h), "leaf", &[]).unwrap();

        let err = rt.call_rules(h, "PRUNE", Value::Void).unwrap_err();
        assert!(matches!(
            err,
            OfmlError::Hierarchy(HierarchyError::ReentrancyViolation { .. })
        ));
        // The busy flag is released after a failing body.
        assert!(rt.child_by_name(h, "leaf").unwrap().is_some());
        assert!(rt.instantiate("Leaf", Some(h), "leaf2", &[]).is_ok());
    }
}
