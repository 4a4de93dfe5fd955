//! A small furniture program: an environment holding a cabinet with shelves.
//!
//! Used by the `ofml demo` command, the benchmarks and the integration tests.
//!
//! - `Furniture` (abstract) accepts every element removal.
//! - `Cabinet extends Furniture` keeps at least one shelf, only takes
//!   `Insertable` shelves as elements, and refuses double doors wider than
//!   [`MAX_DOOR_WIDTH`].
//! - `Shelf` is `Insertable`.

use std::rc::Rc;

use serde::Serialize;

use crate::collab::{Bounds, Geometry, ProductData};
use crate::error::{DispatchError, OfmlResult};
use crate::hierarchy::InstanceId;
use crate::property::{PropertyDef, PropertyKind};
use crate::rules::{Reason, RuleDef, RuleVerdict};
use crate::runtime::Runtime;
use crate::symbol::{SymbolId, intern};
use crate::types::TypeDef;
use crate::value::Value;

/// Widest cabinet that may carry doors.
pub const MAX_DOOR_WIDTH: f64 = 1.2;

const SHELF_DEPTH: f64 = 0.38;
const SHELF_THICKNESS: f64 = 0.02;

fn receiver(this: Option<InstanceId>, method: &str) -> OfmlResult<InstanceId> {
    this.ok_or_else(|| {
        DispatchError::MissingReceiver {
            name: method.to_string(),
        }
        .into()
    })
}

/// Elements of `id` that are shelves.
fn shelves_of(rt: &Runtime, id: InstanceId) -> OfmlResult<Vec<InstanceId>> {
    let mut shelves = Vec::new();
    for e in rt.elements(id)? {
        if rt.is_a(e, "Shelf")? {
            shelves.push(e);
        }
    }
    Ok(shelves)
}

fn furniture() -> TypeDef {
    TypeDef::new("Furniture")
        .abstract_type()
        .field("article", Value::Null)
        .method("initialize", |rt, this, args| {
            let id = receiver(this, "initialize")?;
            if let Some(article) = args.first() {
                rt.set_attr(id, "article", article.clone())?;
            }
            Ok(Value::Void)
        })
        .rule(RuleDef::anterior(Reason::REMOVE_ELEMENT, |_, _| {
            Ok(RuleVerdict::Accept)
        }))
}

fn cabinet() -> TypeDef {
    TypeDef::new("Cabinet")
        .extends("Furniture")
        .method("initialize", |rt, this, args| {
            let id = receiver(this, "initialize")?;
            rt.call_super("Cabinet", id, "initialize", args)?;
            rt.setup_property(
                id,
                PropertyDef::new("width", "Width", PropertyKind::Float)
                    .with_range(0.4, 2.0)
                    .with_format("%.2f m"),
            )?;
            rt.setup_property(
                id,
                PropertyDef::new(
                    "color",
                    "Color",
                    PropertyKind::Choice(vec![
                        Value::sym("oak"),
                        Value::sym("white"),
                        Value::sym("graphite"),
                    ]),
                ),
            )?;
            rt.setup_property(id, PropertyDef::new("doors", "Doors", PropertyKind::Bool))?;
            rt.write_prop_value(id, "width", Value::Float(0.8))?;
            rt.write_prop_value(id, "color", Value::sym("oak"))?;
            rt.write_prop_value(id, "doors", Value::Bool(false))?;
            Ok(Value::Void)
        })
        .method("propsChanged", |rt, this, args| {
            let id = receiver(this, "propsChanged")?;
            if args.get(1).and_then(Value::as_int) != Some(1) {
                // Rolled back: shelves may still carry the refused width.
                let width = rt.get_prop_value(id, "width")?;
                for shelf in shelves_of(rt, id)? {
                    rt.write_prop_value(shelf, "width", width.clone())?;
                }
                return Ok(Value::Void);
            }
            let doors = rt.get_prop_value(id, "doors")?.is_truthy();
            let width = rt.get_prop_value(id, "width")?.as_float().unwrap_or(0.0);
            Ok(Value::Bool(!(doors && width > MAX_DOOR_WIDTH)))
        })
        .rule(RuleDef::anterior(Reason::CREATE_ELEMENT, |rt, call| {
            let Some(ty) = call.arg.as_symbol().and_then(|s| rt.types().lookup(&s.label())) else {
                return Ok(RuleVerdict::Reject);
            };
            Ok(rt.types().has_category(ty, intern("Insertable")).into())
        }))
        .rule(RuleDef::anterior(Reason::REMOVE_ELEMENT, |rt, call| {
            let Some(target) = call.arg.as_instance() else {
                return Ok(RuleVerdict::Accept);
            };
            if !rt.is_a(target, "Shelf")? {
                return Ok(RuleVerdict::Accept);
            }
            Ok((shelves_of(rt, call.instance)?.len() > 1).into())
        }))
        .consistency_check(|rt, id, log| {
            if shelves_of(rt, id).map(|s| s.is_empty()).unwrap_or(false) {
                log.report(rt, id, None, "cabinet has no shelves");
            }
        })
}

fn shelf() -> TypeDef {
    TypeDef::new("Shelf")
        .extends("Furniture")
        .category("Insertable")
        .method("initialize", |rt, this, args| {
            let id = receiver(this, "initialize")?;
            rt.call_super("Shelf", id, "initialize", args)?;
            rt.setup_property(
                id,
                PropertyDef::new("height", "Height", PropertyKind::Float).with_range(0.05, 2.0),
            )?;
            rt.setup_property(id, PropertyDef::new("width", "Width", PropertyKind::Float))?;
            let width = match rt.father(id)? {
                Some(f) => rt.get_prop_value(f, "width")?,
                None => Value::Void,
            };
            rt.write_prop_value(id, "height", Value::Float(0.3))?;
            rt.write_prop_value(
                id,
                "width",
                if width.is_void() { Value::Float(0.8) } else { width },
            )?;
            Ok(Value::Void)
        })
}

/// Register the showroom types. Call once per runtime.
pub fn install(rt: &mut Runtime) -> OfmlResult<()> {
    rt.register(TypeDef::new("Environment"))?;
    rt.register(furniture())?;
    rt.register(cabinet())?;
    rt.register(shelf())?;
    Ok(())
}

/// A box from the origin to `size`, sized from the instance's properties when
/// the runtime asks.
#[derive(Debug, Clone, Copy)]
pub struct Board {
    pub size: [f64; 3],
}

impl Geometry for Board {
    fn local_bounds(&self) -> Bounds {
        Bounds::new([0.0; 3], self.size)
    }
}

/// Article catalog for the showroom. Propagates cabinet width to its shelves.
#[derive(Debug, Default)]
pub struct Catalog;

impl ProductData for Catalog {
    fn article_to_type(&self, article: &str) -> Option<String> {
        match article {
            "CAB-80" | "CAB-120" => Some("Cabinet".into()),
            "SHF-01" => Some("Shelf".into()),
            _ => None,
        }
    }

    fn evaluate(&self, rt: &mut Runtime, instance: InstanceId, changed: SymbolId) -> OfmlResult<()> {
        if changed != intern("width") || !rt.is_a(instance, "Cabinet")? {
            return Ok(());
        }
        let width = rt.get_prop_value(instance, "width")?;
        for shelf in shelves_of(rt, instance)? {
            rt.write_prop_value(shelf, "width", width.clone())?;
        }
        Ok(())
    }
}

/// Handles of a built showroom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Showroom {
    pub env: InstanceId,
    pub cabinet: InstanceId,
    pub shelves: Vec<InstanceId>,
}

/// Install the types and build `env.cabinet` with `shelves` shelf elements.
pub fn build(rt: &mut Runtime, shelves: usize) -> OfmlResult<Showroom> {
    install(rt)?;
    let env = rt.instantiate("Environment", None, "env", &[])?;
    rt.set_product_data(env, Rc::new(Catalog))?;
    let cabinet = rt.instantiate("Cabinet", Some(env), "cabinet", &[Value::str("CAB-80")])?;
    rt.attach_geometry(
        cabinet,
        Rc::new(Board {
            size: [0.8, 2.0, SHELF_DEPTH + SHELF_THICKNESS],
        }),
    )?;

    let mut handles = Vec::with_capacity(shelves);
    for i in 0..shelves {
        let Some(shelf) = rt.add_element(cabinet, "Shelf", &[Value::str("SHF-01")])?.instance() else {
            continue;
        };
        rt.set_position(shelf, [0.0, 0.3 * (i + 1) as f64, 0.0])?;
        rt.attach_geometry(
            shelf,
            Rc::new(Board {
                size: [0.8, SHELF_THICKNESS, SHELF_DEPTH],
            }),
        )?;
        handles.push(shelf);
    }
    tracing::debug!(cabinet = %rt.describe(cabinet), shelves = handles.len(), "showroom built");
    Ok(Showroom {
        env,
        cabinet,
        shelves: handles,
    })
}

/// [`build`] with two shelves.
pub fn build_demo(rt: &mut Runtime) -> OfmlResult<Showroom> {
    build(rt, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::ElementCreation;

    #[test]
    fn demo_builds_named_elements() {
        let mut rt = Runtime::default();
        let room = build_demo(&mut rt).unwrap();
        assert_eq!(rt.absolute_name(room.cabinet).unwrap().as_ref(), "env.cabinet");
        let names: Vec<String> = room
            .shelves
            .iter()
            .map(|s| rt.absolute_name(*s).unwrap().to_string())
            .collect();
        assert_eq!(names, ["env.cabinet.e1", "env.cabinet.e2"]);
        assert_eq!(rt.get_attr(room.cabinet, "article").unwrap(), Value::str("CAB-80"));
    }

    #[test]
    fn cabinet_only_takes_insertables() {
        let mut rt = Runtime::default();
        let room = build_demo(&mut rt).unwrap();
        let outcome = rt.add_element(room.cabinet, "Cabinet", &[]).unwrap();
        assert!(matches!(outcome, ElementCreation::Rejected(_)));
        assert_eq!(rt.elements(room.cabinet).unwrap().len(), 2);
    }

    #[test]
    fn wide_cabinet_with_doors_is_rolled_back() {
        let mut rt = Runtime::default();
        let room = build_demo(&mut rt).unwrap();
        assert!(rt.set_prop_value(room.cabinet, "doors", Value::Bool(true)).unwrap());
        let changed = rt
            .set_prop_value(room.cabinet, "width", Value::Float(1.6))
            .unwrap();
        assert!(!changed);
        assert_eq!(rt.get_prop_value(room.cabinet, "width").unwrap(), Value::Float(0.8));
        let shelf = room.shelves[0];
        assert_eq!(rt.get_prop_value(shelf, "width").unwrap(), Value::Float(0.8));
    }

    #[test]
    fn width_propagates_to_shelves() {
        let mut rt = Runtime::default();
        let room = build_demo(&mut rt).unwrap();
        assert!(rt.set_prop_value(room.cabinet, "width", Value::Float(1.0)).unwrap());
        for shelf in &room.shelves {
            assert_eq!(rt.get_prop_value(*shelf, "width").unwrap(), Value::Float(1.0));
        }
        assert_eq!(rt.article_to_type(room.cabinet, "SHF-01").unwrap().as_deref(), Some("Shelf"));
    }
}
