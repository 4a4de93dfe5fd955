//! Collaborator interfaces: geometry and product data.
//!
//! The object model does not build shapes or read product databases. It talks
//! to them through these two traits, attached per instance (geometry) or per
//! program instance (product data).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::OfmlResult;
use crate::hierarchy::InstanceId;
use crate::runtime::Runtime;
use crate::symbol::SymbolId;

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: [0, 1, 2].map(|i| self.min[i].min(other.min[i])),
            max: [0, 1, 2].map(|i| self.max[i].max(other.max[i])),
        }
    }

    pub fn offset(&self, by: [f64; 3]) -> Bounds {
        Bounds {
            min: [0, 1, 2].map(|i| self.min[i] + by[i]),
            max: [0, 1, 2].map(|i| self.max[i] + by[i]),
        }
    }

    pub fn size(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.max[i] - self.min[i])
    }
}

/// Geometry attached to an instance.
pub trait Geometry {
    /// Bounds in the instance's own frame.
    fn local_bounds(&self) -> Bounds;

    /// Bounds after placing the instance at `position`.
    fn world_bounds(&self, position: [f64; 3]) -> Bounds {
        self.local_bounds().offset(position)
    }

    /// Called after the instance was translated or rotated, with its new local
    /// position and rotation.
    fn transformed(&self, _position: [f64; 3], _rotation: [f64; 3]) {}
}

/// Product database behind a program.
pub trait ProductData {
    /// Type implementing an article number, if known.
    fn article_to_type(&self, article: &str) -> Option<String>;

    /// Propagate a change of `changed` on `instance`. May read and write other
    /// properties through the runtime.
    fn evaluate(&self, rt: &mut Runtime, instance: InstanceId, changed: SymbolId) -> OfmlResult<()>;
}

impl Runtime {
    pub fn attach_geometry(&mut self, id: InstanceId, geometry: Rc<dyn Geometry>) -> OfmlResult<()> {
        self.instance_mut(id)?.geometry = Some(geometry);
        Ok(())
    }

    /// Register product data for instances whose program is `program`.
    pub fn set_product_data(&mut self, program: InstanceId, data: Rc<dyn ProductData>) -> OfmlResult<()> {
        self.instance(program)?;
        self.product_data.insert(program, data);
        Ok(())
    }

    pub fn set_program(&mut self, id: InstanceId, program: InstanceId) -> OfmlResult<()> {
        self.instance(program)?;
        self.instance_mut(id)?.program = Some(program);
        Ok(())
    }

    /// The explicitly assigned program, or the root. A program that has been
    /// removed falls back to the root as well.
    pub fn program_of(&self, id: InstanceId) -> OfmlResult<InstanceId> {
        match self.instance(id)?.program {
            Some(program) if self.contains(program) => Ok(program),
            _ => self.root(id),
        }
    }

    pub fn article_to_type(&self, id: InstanceId, article: &str) -> OfmlResult<Option<String>> {
        let program = self.program_of(id)?;
        Ok(self
            .product_data
            .get(&program)
            .and_then(|data| data.article_to_type(article)))
    }

    /// Union of attached geometry over the subtree, in `id`'s frame.
    /// Child offsets are applied; rotations are not.
    pub fn local_bounds(&self, id: InstanceId) -> OfmlResult<Option<Bounds>> {
        let inst = self.instance(id)?;
        let mut bounds = inst.geometry.as_ref().map(|g| g.local_bounds());
        for child in &inst.children {
            let Some(child_bounds) = self.local_bounds(*child)? else {
                continue;
            };
            let placed = child_bounds.offset(self.position(*child)?);
            bounds = Some(match bounds {
                Some(b) => b.union(&placed),
                None => placed,
            });
        }
        Ok(bounds)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::types::TypeDef;

    struct Block {
        size: [f64; 3],
        moves: RefCell<usize>,
    }

    impl Geometry for Block {
        fn local_bounds(&self) -> Bounds {
            Bounds::new([0.0; 3], self.size)
        }

        fn transformed(&self, _position: [f64; 3], _rotation: [f64; 3]) {
            *self.moves.borrow_mut() += 1;
        }
    }

    struct Catalog;

    impl ProductData for Catalog {
        fn article_to_type(&self, article: &str) -> Option<String> {
            (article == "SH-100").then(|| "Shelf".to_string())
        }

        fn evaluate(&self, _: &mut Runtime, _: InstanceId, _: SymbolId) -> OfmlResult<()> {
            Ok(())
        }
    }

    fn block(size: [f64; 3]) -> Rc<Block> {
        Rc::new(Block {
            size,
            moves: RefCell::new(0),
        })
    }

    #[test]
    fn bounds_union_over_subtree() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Part")).unwrap();
        let root = rt.instantiate("Part", None, "root", &[]).unwrap();
        let side = rt.instantiate("Part", Some(root), "side", &[]).unwrap();
        rt.attach_geometry(root, block([1.0, 1.0, 1.0])).unwrap();
        rt.attach_geometry(side, block([1.0, 2.0, 1.0])).unwrap();
        rt.set_position(side, [1.0, 0.0, 0.0]).unwrap();

        let bounds = rt.local_bounds(root).unwrap().unwrap();
        assert_eq!(bounds, Bounds::new([0.0; 3], [2.0, 2.0, 1.0]));
    }

    #[test]
    fn geometry_is_told_about_transforms() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Part")).unwrap();
        let p = rt.instantiate("Part", None, "p", &[]).unwrap();
        let geometry = block([1.0; 3]);
        rt.attach_geometry(p, geometry.clone()).unwrap();
        rt.translate(p, [0.5, 0.0, 0.0]).unwrap();
        assert_eq!(*geometry.moves.borrow(), 1);
    }

    #[test]
    fn program_defaults_to_root() {
        let mut rt = Runtime::default();
        rt.register(TypeDef::new("Part")).unwrap();
        let root = rt.instantiate("Part", None, "root", &[]).unwrap();
        let child = rt.instantiate("Part", Some(root), "child", &[]).unwrap();
        let other = rt.instantiate("Part", None, "program", &[]).unwrap();
        assert_eq!(rt.program_of(child).unwrap(), root);

        rt.set_product_data(other, Rc::new(Catalog)).unwrap();
        assert_eq!(rt.article_to_type(child, "SH-100").unwrap(), None);
        rt.set_program(child, other).unwrap();
        assert_eq!(rt.article_to_type(child, "SH-100").unwrap().as_deref(), Some("Shelf"));
    }
}
