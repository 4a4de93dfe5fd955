//! Rules: reason-keyed hooks run in base-before-derived chains.
//!
//! A rule belongs to the type that declares it and fires for one reason.
//! Rules never override each other: every rule declared for a reason along an
//! instance's lineage runs, the most general type's rules first, each type's
//! rules in declaration order. The first rule that rejects stops the chain.
//!
//! Whether a reason gates an action (anterior) or reacts to it (posterior) is
//! a contract on the caller; [`RuleKind`] tags rules so callers can run one
//! phase at a time via [`Runtime::call_rules_phase`](crate::runtime::Runtime::call_rules_phase).

mod engine;
pub mod reason;

use std::rc::Rc;

use crate::error::OfmlResult;
use crate::hierarchy::InstanceId;
use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::types::TypeId;
use crate::value::Value;

pub use reason::Reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Runs before the action and can prevent it.
    Anterior,
    /// Runs after the action; a rejection asks for correction.
    Posterior,
}

/// Formal parameter shape of a rule body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamShape {
    /// The body ignores the argument and sees `Value::Void`.
    Nullary,
    #[default]
    Unary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    Accept,
    Reject,
}

impl From<bool> for RuleVerdict {
    fn from(ok: bool) -> Self {
        if ok { RuleVerdict::Accept } else { RuleVerdict::Reject }
    }
}

/// Everything a rule body learns about its invocation.
#[derive(Debug, Clone)]
pub struct RuleCall {
    pub instance: InstanceId,
    pub reason: SymbolId,
    pub arg: Value,
    /// The type that declared the running rule.
    pub defining_type: TypeId,
}

pub type RuleBody = Rc<dyn Fn(&mut Runtime, &RuleCall) -> OfmlResult<RuleVerdict>>;

#[derive(Clone)]
pub struct RuleDef {
    pub reason: SymbolId,
    pub kind: RuleKind,
    pub params: ParamShape,
    body: RuleBody,
}

impl RuleDef {
    pub fn new(
        reason: impl Into<SymbolId>,
        kind: RuleKind,
        body: impl Fn(&mut Runtime, &RuleCall) -> OfmlResult<RuleVerdict> + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            kind,
            params: ParamShape::Unary,
            body: Rc::new(body),
        }
    }

    pub fn anterior(
        reason: impl Into<SymbolId>,
        body: impl Fn(&mut Runtime, &RuleCall) -> OfmlResult<RuleVerdict> + 'static,
    ) -> Self {
        Self::new(reason, RuleKind::Anterior, body)
    }

    pub fn posterior(
        reason: impl Into<SymbolId>,
        body: impl Fn(&mut Runtime, &RuleCall) -> OfmlResult<RuleVerdict> + 'static,
    ) -> Self {
        Self::new(reason, RuleKind::Posterior, body)
    }

    pub fn nullary(mut self) -> Self {
        self.params = ParamShape::Nullary;
        self
    }

    pub fn run(&self, rt: &mut Runtime, call: &RuleCall) -> OfmlResult<RuleVerdict> {
        (self.body)(rt, call)
    }
}

impl std::fmt::Debug for RuleDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDef")
            .field("reason", &self.reason)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

/// One link of an assembled chain.
#[derive(Debug, Clone)]
pub struct ChainLink {
    pub defining_type: TypeId,
    pub rule: Rc<RuleDef>,
}

/// A rejected chain: which rule said no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub instance: InstanceId,
    pub reason: SymbolId,
    pub defining_type: String,
    /// Index of the rejecting rule within the chain.
    pub position: usize,
}

impl std::fmt::Display for RuleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rule #{} of {} rejected",
            self.reason, self.position, self.defining_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed { executed: usize },
    Failed(RuleFailure),
}

impl ChainOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChainOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&RuleFailure> {
        match self {
            ChainOutcome::Failed(failure) => Some(failure),
            ChainOutcome::Completed { .. } => None,
        }
    }
}
