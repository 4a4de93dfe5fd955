//! Versioned type registry.
//!
//! Records live in a `Vec` indexed by [`TypeId`], so ids stay valid when a
//! type is redefined: `redefine` swaps the record in place, bumps the type's
//! generation and the registry-wide epoch. Dispatch caches compare the epoch
//! to discard stale entries on their next lookup.

use std::collections::HashMap;
use std::rc::Rc;

use crate::dispatch::BinaryOp;
use crate::error::TranslationError;
use crate::symbol::SymbolId;

use super::{MethodDef, TypeDef, TypeId};

/// A registered type: frozen definition plus resolved supertype.
#[derive(Debug, Clone)]
pub struct TypeRecord {
    pub def: Rc<TypeDef>,
    pub supertype: Option<TypeId>,
    pub generation: u64,
}

/// Registry of all types known to a runtime.
#[derive(Default)]
pub struct TypeRegistry {
    records: Vec<TypeRecord>,
    /// Qualified name → id.
    by_name: HashMap<String, TypeId>,
    /// Short name → ids sharing it (across packages).
    by_short: HashMap<String, Vec<TypeId>>,
    epoch: u64,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new type.
    ///
    /// Fails on a duplicate qualified name, an unknown or final supertype, a
    /// type naming itself as supertype, or a malformed operator handler.
    pub fn register(&mut self, mut def: TypeDef) -> Result<TypeId, TranslationError> {
        let name = def.qualified_name();
        if self.by_name.contains_key(&name) {
            return Err(TranslationError::DuplicateType { name });
        }
        let supertype = match def.supertype_name() {
            Some(sup) if sup == name || sup == def.name() => {
                return Err(TranslationError::CyclicSupertype {
                    supertype: sup.to_string(),
                    name,
                });
            }
            Some(sup) => Some(self.resolve_supertype(&name, sup)?),
            None => None,
        };
        def.collect_operators()
            .map_err(|method| TranslationError::InvalidOperator {
                name: name.clone(),
                method,
            })?;

        let id = TypeId::from_index(self.records.len())
            .ok_or_else(|| TranslationError::TooManyTypes { name: name.clone() })?;
        self.by_short
            .entry(def.name().to_string())
            .or_default()
            .push(id);
        self.by_name.insert(name.clone(), id);
        self.records.push(TypeRecord {
            def: Rc::new(def),
            supertype,
            generation: 0,
        });
        self.epoch += 1;

        tracing::debug!(ty = %name, id = %id, "type registered");
        Ok(id)
    }

    /// Atomically replace the record of an existing type.
    ///
    /// The replacement must keep the qualified name. Its supertype must exist,
    /// must not be final and must not lie below the redefined type. A type with
    /// registered subtypes cannot become final.
    pub fn redefine(&mut self, name: &str, mut def: TypeDef) -> Result<TypeId, TranslationError> {
        let id = self
            .lookup(name)
            .ok_or_else(|| TranslationError::UnknownType {
                name: name.to_string(),
            })?;
        let current = self.name(id);
        let new_name = def.qualified_name();
        if new_name != current {
            return Err(TranslationError::RenamedRedefinition {
                name: current,
                new_name,
            });
        }

        let supertype = match def.supertype_name() {
            Some(sup) => {
                let sup_id = self.resolve_supertype(&current, sup)?;
                if self.is_subtype_of(sup_id, id) {
                    return Err(TranslationError::CyclicSupertype {
                        name: current,
                        supertype: self.name(sup_id),
                    });
                }
                Some(sup_id)
            }
            None => None,
        };
        if def.is_final() {
            let sub = self
                .records
                .iter()
                .position(|r| r.supertype == Some(id))
                .and_then(TypeId::from_index);
            if let Some(sub) = sub {
                return Err(TranslationError::FinalSupertype {
                    name: self.name(sub),
                    supertype: current,
                });
            }
        }
        def.collect_operators()
            .map_err(|method| TranslationError::InvalidOperator {
                name: current.clone(),
                method,
            })?;

        let record = &mut self.records[id.index()];
        record.def = Rc::new(def);
        record.supertype = supertype;
        record.generation += 1;
        let generation = record.generation;
        self.epoch += 1;

        tracing::debug!(ty = %current, generation, epoch = self.epoch, "type redefined");
        Ok(id)
    }

    fn resolve_supertype(&self, name: &str, supertype: &str) -> Result<TypeId, TranslationError> {
        let sup_id = self
            .lookup(supertype)
            .ok_or_else(|| TranslationError::UnknownSupertype {
                name: name.to_string(),
                supertype: supertype.to_string(),
            })?;
        if self.def(sup_id).is_final() {
            return Err(TranslationError::FinalSupertype {
                name: name.to_string(),
                supertype: self.name(sup_id),
            });
        }
        Ok(sup_id)
    }

    /// Find a type by qualified name, or by short name when it is unambiguous.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        if let Some(id) = self.by_name.get(name) {
            return Some(*id);
        }
        match self.by_short.get(name).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    /// The record of `id`.
    ///
    /// # Panics
    ///
    /// Panics when `id` was issued by a different registry.
    pub fn record(&self, id: TypeId) -> &TypeRecord {
        &self.records[id.index()]
    }

    pub fn def(&self, id: TypeId) -> &Rc<TypeDef> {
        &self.record(id).def
    }

    /// Qualified name of `id`.
    pub fn name(&self, id: TypeId) -> String {
        self.def(id).qualified_name()
    }

    pub fn supertype(&self, id: TypeId) -> Option<TypeId> {
        self.record(id).supertype
    }

    pub fn generation(&self, id: TypeId) -> u64 {
        self.record(id).generation
    }

    /// Incremented on every registration and redefinition.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Supertype chain from the most general ancestor down to `id`.
    pub fn lineage(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = self.ancestors(id).collect::<Vec<_>>();
        chain.reverse();
        chain
    }

    /// `id` followed by its supertypes, most specific first.
    pub fn ancestors(&self, id: TypeId) -> impl Iterator<Item = TypeId> + '_ {
        std::iter::successors(Some(id), move |t| self.supertype(*t))
    }

    /// True if `b` is `a` or one of its ancestors.
    pub fn is_subtype_of(&self, a: TypeId, b: TypeId) -> bool {
        self.ancestors(a).any(|t| t == b)
    }

    /// Categories are inherited: a type carries every tag declared along its
    /// lineage.
    pub fn has_category(&self, id: TypeId, category: SymbolId) -> bool {
        self.ancestors(id)
            .any(|t| self.def(t).categories().contains(&category))
    }

    /// First method named `name` walking from `id` upward, with its defining type.
    pub fn find_method(&self, id: TypeId, name: SymbolId) -> Option<(TypeId, Rc<MethodDef>)> {
        self.ancestors(id)
            .find_map(|t| self.def(t).method_named(name).map(|m| (t, Rc::clone(m))))
    }

    /// Operator handler for `op`, inherited like ordinary methods.
    pub fn find_operator(&self, id: TypeId, op: BinaryOp) -> Option<Rc<MethodDef>> {
        self.ancestors(id)
            .find_map(|t| self.def(t).operator(op).map(Rc::clone))
    }

    pub fn declares_field(&self, id: TypeId, name: SymbolId) -> bool {
        self.ancestors(id)
            .any(|t| self.def(t).fields().iter().any(|f| f.name == name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.records.len()).filter_map(TypeId::from_index)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.records.len())
            .field("epoch", &self.epoch)
            .finish()
    }
}
