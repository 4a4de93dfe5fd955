//! Rule chain tests: ordering across the supertype chain, short-circuiting,
//! phases, custom reasons and the dump protocol.

use std::cell::RefCell;
use std::rc::Rc;

use ofml_core::error::{HierarchyError, OfmlError};
use ofml_core::rules::{ChainOutcome, Reason, RuleDef, RuleKind, RuleVerdict};
use ofml_core::runtime::Runtime;
use ofml_core::symbol::intern;
use ofml_core::types::TypeDef;
use ofml_core::value::Value;

type Trace = Rc<RefCell<Vec<String>>>;

fn traced(trace: &Trace, reason: &str, tag: &str, verdict: RuleVerdict) -> RuleDef {
    let trace = Rc::clone(trace);
    let tag = tag.to_string();
    RuleDef::anterior(reason, move |_, _| {
        trace.borrow_mut().push(tag.clone());
        Ok(verdict)
    })
}

#[test]
fn supertype_rules_precede_subtype_rules() {
    let trace: Trace = Rc::default();
    let mut rt = Runtime::default();
    rt.register(
        TypeDef::new("S")
            .rule(traced(&trace, "CHECK", "S1", RuleVerdict::Accept))
            .rule(traced(&trace, "CHECK", "S2", RuleVerdict::Accept)),
    )
    .unwrap();
    rt.register(
        TypeDef::new("T")
            .extends("S")
            .rule(traced(&trace, "CHECK", "T1", RuleVerdict::Accept)),
    )
    .unwrap();
    rt.register(
        TypeDef::new("U")
            .extends("T")
            .rule(traced(&trace, "CHECK", "U1", RuleVerdict::Accept)),
    )
    .unwrap();

    let u = rt.instantiate("U", None, "u", &[]).unwrap();
    let ty = rt.type_of(u).unwrap();
    let owners: Vec<String> = rt
        .rule_chain(ty, "CHECK", None)
        .iter()
        .map(|link| rt.types().name(link.defining_type))
        .collect();
    assert_eq!(owners, ["S", "S", "T", "U"]);

    let outcome = rt.call_rules(u, "CHECK", Value::Void).unwrap();
    assert_eq!(outcome, ChainOutcome::Completed { executed: 4 });
    assert_eq!(*trace.borrow(), ["S1", "S2", "T1", "U1"]);
}

#[test]
fn first_rejection_stops_the_chain() {
    let trace: Trace = Rc::default();
    let mut rt = Runtime::default();
    rt.register(
        TypeDef::new("Gate")
            .rule(traced(&trace, "OPEN", "one", RuleVerdict::Accept))
            .rule(traced(&trace, "OPEN", "two", RuleVerdict::Reject))
            .rule(traced(&trace, "OPEN", "three", RuleVerdict::Accept)),
    )
    .unwrap();
    let gate = rt.instantiate("Gate", None, "gate", &[]).unwrap();

    let outcome = rt.call_rules(gate, "OPEN", Value::Void).unwrap();
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.position, 1);
    assert_eq!(failure.reason, intern("OPEN"));
    assert_eq!(failure.defining_type, "Gate");
    assert_eq!(*trace.borrow(), ["one", "two"]);
}

#[test]
fn reasons_without_rules_succeed() {
    let mut rt = Runtime::default();
    rt.register(TypeDef::new("Plain")).unwrap();
    let p = rt.instantiate("Plain", None, "p", &[]).unwrap();
    for reason in Reason::ALL {
        assert!(rt.call_rules(p, reason, Value::Void).unwrap().is_success());
    }
}

#[test]
fn phases_split_anterior_and_posterior_rules() {
    let trace: Trace = Rc::default();
    let mut rt = Runtime::default();
    let after = Rc::clone(&trace);
    rt.register(
        TypeDef::new("Door")
            .rule(traced(&trace, "SWING", "before", RuleVerdict::Accept))
            .rule(RuleDef::posterior("SWING", move |_, call| {
                after.borrow_mut().push(format!("after {}", call.arg));
                Ok(RuleVerdict::Accept)
            })),
    )
    .unwrap();
    let door = rt.instantiate("Door", None, "door", &[]).unwrap();

    rt.call_rules_phase(door, "SWING", RuleKind::Anterior, Value::Int(90))
        .unwrap();
    assert_eq!(*trace.borrow(), ["before"]);
    rt.call_rules_phase(door, "SWING", RuleKind::Posterior, Value::Int(90))
        .unwrap();
    assert_eq!(*trace.borrow(), ["before", "after 90"]);
}

#[test]
fn rules_may_not_remove_their_own_instance() {
    let mut rt = Runtime::default();
    rt.register(TypeDef::new("Fragile").rule(RuleDef::anterior(
        Reason::PICK,
        |rt, call| {
            rt.remove(call.instance)?;
            Ok(RuleVerdict::Accept)
        },
    )))
    .unwrap();
    let f = rt.instantiate("Fragile", None, "f", &[]).unwrap();
    let err = rt.call_rules(f, Reason::PICK, Value::Void).unwrap_err();
    assert!(matches!(
        err,
        OfmlError::Hierarchy(HierarchyError::ReentrancyViolation { .. })
    ));
    assert!(rt.contains(f));
    // The busy mark is released after the failed chain.
    assert!(rt.remove(f).unwrap().is_removed());
}

#[test]
fn dump_flags_cover_the_whole_subtree() {
    let mut rt = Runtime::default();
    rt.register(TypeDef::new("Part")).unwrap();
    let root = rt.instantiate("Part", None, "root", &[]).unwrap();
    let child = rt.instantiate("Part", Some(root), "child", &[]).unwrap();

    assert!(!rt.is_storable(child).unwrap());
    assert!(rt.start_dump(root).unwrap().is_success());
    assert!(rt.is_storable(root).unwrap());
    assert!(rt.is_storable(child).unwrap());
    assert!(rt.finish_dump(root).unwrap().is_success());
    assert!(!rt.is_storable(child).unwrap());
}

#[test]
fn rejected_dump_leaves_nothing_storable() {
    let mut rt = Runtime::default();
    rt.register(TypeDef::new("Part")).unwrap();
    rt.register(TypeDef::new("Locked").rule(RuleDef::anterior(
        Reason::START_DUMP,
        |_, _| Ok(RuleVerdict::Reject),
    )))
    .unwrap();
    let root = rt.instantiate("Part", None, "root", &[]).unwrap();
    let locked = rt.instantiate("Locked", Some(root), "locked", &[]).unwrap();

    let outcome = rt.start_dump(root).unwrap();
    assert_eq!(outcome.failure().unwrap().instance, locked);
    assert!(!rt.is_storable(root).unwrap());
    assert!(!rt.is_storable(locked).unwrap());
}
