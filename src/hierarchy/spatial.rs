//! Local placement, rule-gated transforms and picking.
//!
//! Each instance carries a position and Euler rotation (radians, applied
//! X, then Y, then Z) relative to its father. `translate` and `rotate` run the
//! anterior rules of their reason before changing anything and the posterior
//! ones afterwards.

use crate::error::OfmlResult;
use crate::rules::{ChainOutcome, Reason, RuleKind};
use crate::runtime::Runtime;
use crate::symbol::intern;
use crate::value::Value;

use super::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

type Mat3 = [[f64; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn apply(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|i| (0..3).map(|k| m[i][k] * v[k]).sum())
}

fn euler(rotation: [f64; 3]) -> Mat3 {
    let [x, y, z] = rotation;
    let (sx, cx) = x.sin_cos();
    let (sy, cy) = y.sin_cos();
    let (sz, cz) = z.sin_cos();
    let rx = [[1.0, 0.0, 0.0], [0.0, cx, -sx], [0.0, sx, cx]];
    let ry = [[cy, 0.0, sy], [0.0, 1.0, 0.0], [-sy, 0.0, cy]];
    let rz = [[cz, -sz, 0.0], [sz, cz, 0.0], [0.0, 0.0, 1.0]];
    mul(&rz, &mul(&ry, &rx))
}

impl Runtime {
    pub fn position(&self, id: InstanceId) -> OfmlResult<[f64; 3]> {
        Ok(self.instance(id)?.position)
    }

    pub fn rotation(&self, id: InstanceId) -> OfmlResult<[f64; 3]> {
        Ok(self.instance(id)?.rotation)
    }

    /// Place `id` without consulting rules.
    pub fn set_position(&mut self, id: InstanceId, position: [f64; 3]) -> OfmlResult<()> {
        self.instance_mut(id)?.position = position;
        Ok(())
    }

    /// Move by `delta` in the father's frame, gated by `TRANSLATE` rules.
    /// Rules receive the delta as a three-element list.
    pub fn translate(&mut self, id: InstanceId, delta: [f64; 3]) -> OfmlResult<ChainOutcome> {
        let arg = Value::List(delta.iter().map(|d| Value::Float(*d)).collect());
        let gate = self.call_rules_phase(id, Reason::TRANSLATE, RuleKind::Anterior, arg.clone())?;
        if !gate.is_success() {
            return Ok(gate);
        }
        let inst = self.instance_mut(id)?;
        for (p, d) in inst.position.iter_mut().zip(delta) {
            *p += d;
        }
        self.notify_geometry(id)?;
        self.call_rules_phase(id, Reason::TRANSLATE, RuleKind::Posterior, arg)
    }

    /// Rotate by `angle` radians about `axis`, gated by `ROTATE` rules.
    /// Rules receive `[@axis, angle]`.
    pub fn rotate(&mut self, id: InstanceId, axis: Axis, angle: f64) -> OfmlResult<ChainOutcome> {
        let arg = Value::List(vec![Value::Symbol(intern(axis.label())), Value::Float(angle)]);
        let gate = self.call_rules_phase(id, Reason::ROTATE, RuleKind::Anterior, arg.clone())?;
        if !gate.is_success() {
            return Ok(gate);
        }
        self.instance_mut(id)?.rotation[axis.index()] += angle;
        self.notify_geometry(id)?;
        self.call_rules_phase(id, Reason::ROTATE, RuleKind::Posterior, arg)
    }

    fn notify_geometry(&self, id: InstanceId) -> OfmlResult<()> {
        let inst = self.instance(id)?;
        if let Some(geometry) = &inst.geometry {
            geometry.transformed(inst.position, inst.rotation);
        }
        Ok(())
    }

    fn world_frame(&self, id: InstanceId) -> OfmlResult<([f64; 3], Mat3)> {
        let inst = self.instance(id)?;
        let (origin, basis) = match inst.father {
            Some(father) => self.world_frame(father)?,
            None => ([0.0; 3], IDENTITY),
        };
        let offset = apply(&basis, inst.position);
        let position = [0, 1, 2].map(|i| origin[i] + offset[i]);
        Ok((position, mul(&basis, &euler(inst.rotation))))
    }

    /// Position in the root's frame.
    pub fn world_position(&self, id: InstanceId) -> OfmlResult<[f64; 3]> {
        Ok(self.world_frame(id)?.0)
    }

    /// The instance a pick on `id` selects, after `PICK` rules agree.
    ///
    /// Selection climbs through hierarchically selectable instances to their
    /// fathers. `None` if the target is not selectable or a rule rejects.
    pub fn pick(&mut self, id: InstanceId) -> OfmlResult<Option<InstanceId>> {
        let mut target = id;
        loop {
            let inst = self.instance(target)?;
            match inst.father {
                Some(father) if inst.flags.hier_selectable => target = father,
                _ => break,
            }
        }
        if !self.instance(target)?.flags.selectable {
            return Ok(None);
        }
        let outcome = self.call_rules(target, Reason::PICK, Value::Instance(id))?;
        Ok(outcome.is_success().then_some(target))
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;
    use crate::rules::{RuleDef, RuleVerdict};
    use crate::types::TypeDef;

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn anterior_translate_rule_can_block() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Anchored").rule(RuleDef::anterior(Reason::TRANSLATE, |_, call| {
            let dy = match &call.arg {
                Value::List(items) => items[1].as_float().unwrap_or(0.0),
                _ => 0.0,
            };
            Ok((dy == 0.0).into())
        })))
        .unwrap();
        let a = rt.instantiate("Anchored", None, "a", &[]).unwrap();
        assert!(rt.translate(a, [1.0, 0.0, 0.0]).unwrap().is_success());
        assert!(!rt.translate(a, [0.0, 2.0, 0.0]).unwrap().is_success());
        assert_eq!(rt.position(a).unwrap(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn world_position_composes_rotation() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Part")).unwrap();
        let root = rt.instantiate("Part", None, "root", &[]).unwrap();
        let arm = rt.instantiate("Part", Some(root), "arm", &[]).unwrap();
        rt.set_position(root, [10.0, 0.0, 0.0]).unwrap();
        rt.rotate(root, Axis::Y, FRAC_PI_2).unwrap();
        rt.set_position(arm, [1.0, 0.0, 0.0]).unwrap();
        assert!(close(rt.world_position(arm).unwrap(), [10.0, 0.0, -1.0]));
    }

    #[test]
    fn pick_climbs_hierarchically_selectable_instances() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Part")).unwrap();
        rt.register(
            TypeDef::new("Locked").rule(RuleDef::anterior(Reason::PICK, |_, _| Ok(RuleVerdict::Reject))),
        )
        .unwrap();
        let root = rt.instantiate("Part", None, "root", &[]).unwrap();
        let handle = rt.instantiate("Part", Some(root), "handle", &[]).unwrap();
        assert_eq!(rt.pick(handle).unwrap(), Some(handle));
        rt.flags_mut(handle).unwrap().hier_selectable = true;
        assert_eq!(rt.pick(handle).unwrap(), Some(root));

        let locked = rt.instantiate("Locked", None, "locked", &[]).unwrap();
        assert_eq!(rt.pick(locked).unwrap(), None);
    }
}
