//! # ofml-core
//!
//! Runtime core of the OFML object model: the layer that turns registered
//! types into a live tree of configurable product instances.
//!
//! ## Architecture
//!
//! - **Symbols** (`symbol`): process-wide interned identifiers
//! - **Types** (`types`): single-inheritance type registry with redefinition
//! - **Dispatch** (`dispatch`): slot lookup, method calls, operators, epoch-stamped cache
//! - **Hierarchy** (`hierarchy`): generational instance arena, naming, lifecycle, placement
//! - **Rules** (`rules`): reason-keyed rule chains, base type first, first reject wins
//! - **Properties** (`property`): per-instance definitions, guarded writes with rollback
//! - **Collaborators** (`collab`): geometry and product data behind traits
//!
//! ## Library usage
//!
//! ```no_run
//! use ofml_core::runtime::Runtime;
//! use ofml_core::rules::{Reason, RuleDef, RuleVerdict};
//! use ofml_core::types::TypeDef;
//!
//! let mut rt = Runtime::default();
//! rt.register(TypeDef::new("Desk")).unwrap();
//! rt.register(TypeDef::new("Drawer").extends("Desk").rule(RuleDef::anterior(
//!     Reason::TRANSLATE,
//!     |_, _| Ok(RuleVerdict::Reject),
//! )))
//! .unwrap();
//! let desk = rt.instantiate("Desk", None, "desk", &[]).unwrap();
//! let drawer = rt.instantiate("Drawer", Some(desk), "drawer", &[]).unwrap();
//! assert!(!rt.translate(drawer, [0.1, 0.0, 0.0]).unwrap().is_success());
//! ```

pub mod collab;
pub mod config;
pub mod consistency;
pub mod dispatch;
pub mod error;
pub mod hierarchy;
pub mod property;
pub mod rules;
pub mod runtime;
pub mod showroom;
pub mod symbol;
pub mod types;
pub mod value;
