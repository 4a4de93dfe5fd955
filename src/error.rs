//! Rich diagnostic error types for the OFML runtime core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Rule failures are deliberately absent:
//! a failing rule chain is an ordinary return value (see [`crate::rules::ChainOutcome`]),
//! and consistency problems are accumulated in an [`crate::consistency::ErrorLog`].

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the OFML runtime.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum OfmlError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Instantiation(#[from] InstantiationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Translation errors (type registration time)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TranslationError {
    #[error("type {name} is already defined")]
    #[diagnostic(
        code(ofml::translation::duplicate_type),
        help("Type names are unique within their package. Use `redefine` to replace a type.")
    )]
    DuplicateType { name: String },

    #[error("type {name} extends unknown type {supertype}")]
    #[diagnostic(
        code(ofml::translation::unknown_supertype),
        help("Register the supertype before any type that extends it.")
    )]
    UnknownSupertype { name: String, supertype: String },

    #[error("type {name} cannot extend final type {supertype}")]
    #[diagnostic(
        code(ofml::translation::final_supertype),
        help("The supertype is declared non-extensible. Derive from one of its ancestors instead.")
    )]
    FinalSupertype { name: String, supertype: String },

    #[error("making {supertype} the supertype of {name} closes a cycle")]
    #[diagnostic(
        code(ofml::translation::cyclic_supertype),
        help("The supertype relation must form a tree. Check the chain starting at {supertype}.")
    )]
    CyclicSupertype { name: String, supertype: String },

    #[error("cannot redefine unknown type {name}")]
    #[diagnostic(
        code(ofml::translation::unknown_type),
        help("Only registered types can be redefined. Register it first.")
    )]
    UnknownType { name: String },

    #[error("redefinition of {name} would rename it to {new_name}")]
    #[diagnostic(
        code(ofml::translation::renamed_redefinition),
        help("A type name is immutable once registered; the replacement record must keep it.")
    )]
    RenamedRedefinition { name: String, new_name: String },

    #[error("method {method} of type {name} is not a valid operator handler")]
    #[diagnostic(
        code(ofml::translation::invalid_operator),
        help("Operator handlers are named `operator<token>`, e.g. `operator+` or `operator==`.")
    )]
    InvalidOperator { name: String, method: String },

    #[error("cannot register {name}: the type table is full")]
    #[diagnostic(code(ofml::translation::too_many_types))]
    TooManyTypes { name: String },
}

// ---------------------------------------------------------------------------
// Instantiation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InstantiationError {
    #[error("cannot instantiate abstract type {name}")]
    #[diagnostic(
        code(ofml::instantiation::abstract_type),
        help("Instantiate one of the concrete subtypes of {name}.")
    )]
    AbstractType { name: String },

    #[error("unknown type {name}")]
    #[diagnostic(
        code(ofml::instantiation::unknown_type),
        help("Check the spelling, or use the package-qualified name if the short name is ambiguous.")
    )]
    UnknownType { name: String },

    #[error("malformed instance name \"{name}\"")]
    #[diagnostic(
        code(ofml::instantiation::malformed_name),
        help("Names start with a letter, followed by letters, digits or underscores.")
    )]
    MalformedName { name: String },

    #[error("instance name \"{name}\" is reserved for elements")]
    #[diagnostic(
        code(ofml::instantiation::reserved_name),
        help("Names of the form e<digits> are generated for elements. Choose another name.")
    )]
    ReservedName { name: String },

    #[error("{father} already has a child named \"{name}\"")]
    #[diagnostic(
        code(ofml::instantiation::duplicate_name),
        help("Sibling names must be unique. Choose another name or remove the existing child.")
    )]
    DuplicateName { father: String, name: String },

    #[error("a root instance named \"{name}\" already exists")]
    #[diagnostic(
        code(ofml::instantiation::duplicate_root),
        help("Root names must be unique among roots.")
    )]
    DuplicateRoot { name: String },
}

// ---------------------------------------------------------------------------
// Dispatch / evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("{receiver} has no attribute {name}")]
    #[diagnostic(
        code(ofml::dispatch::no_such_attribute),
        help(
            "Neither a child, a dynamic property, a field nor a method of that name \
             exists on the receiver or its supertypes."
        )
    )]
    NoSuchAttribute { receiver: String, name: String },

    #[error("type mismatch in {operation}: {operands}")]
    #[diagnostic(
        code(ofml::dispatch::type_mismatch),
        help("The operands are not supported by the built-in semantics and no operator handler is declared.")
    )]
    TypeMismatch { operation: String, operands: String },

    #[error("integer division by zero")]
    #[diagnostic(
        code(ofml::dispatch::division_by_zero),
        help("Guard the divisor, or use a floating-point operand to get IEEE semantics.")
    )]
    DivisionByZero,

    #[error("attribute {name} is not callable")]
    #[diagnostic(
        code(ofml::dispatch::not_callable),
        help("Only methods can be called; fields, children and dynamic properties are values.")
    )]
    NotCallable { name: String },

    #[error("attribute {name} is a method, not a value")]
    #[diagnostic(
        code(ofml::dispatch::method_as_value),
        help("Call the method through `call_method` instead of reading it.")
    )]
    MethodAsValue { name: String },

    #[error("{name} expects {expected} argument(s), got {actual}")]
    #[diagnostic(code(ofml::dispatch::arity))]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("instance method {name} called without a receiver")]
    #[diagnostic(
        code(ofml::dispatch::missing_receiver),
        help("Call instance methods through `call_method` with an instance.")
    )]
    MissingReceiver { name: String },
}

// ---------------------------------------------------------------------------
// Hierarchy errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum HierarchyError {
    #[error("cannot {operation} {instance} while a rule chain is running on it")]
    #[diagnostic(
        code(ofml::hierarchy::reentrancy),
        help(
            "Structural changes to an instance are rejected while rules run against it. \
             Perform the change after the chain returns."
        )
    )]
    ReentrancyViolation {
        instance: String,
        operation: &'static str,
    },

    #[error("instance {id} has been destroyed")]
    #[diagnostic(
        code(ofml::hierarchy::destroyed),
        help("Instance references held in values are non-owning and go stale on removal.")
    )]
    Destroyed { id: String },

    #[error("{instance} is not an element of its father")]
    #[diagnostic(code(ofml::hierarchy::not_an_element))]
    NotAnElement { instance: String },

    #[error("cannot {operation} {instance} in state {state}")]
    #[diagnostic(code(ofml::hierarchy::invalid_state))]
    InvalidState {
        instance: String,
        state: String,
        operation: &'static str,
    },

    #[error("the instance arena is full ({live} live instances)")]
    #[diagnostic(
        code(ofml::hierarchy::arena_full),
        help("Remove unused instances; their slots are reused.")
    )]
    ArenaFull { live: usize },
}

// ---------------------------------------------------------------------------
// Property errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PropertyError {
    #[error("invalid value for property {property}: {message}")]
    #[diagnostic(
        code(ofml::property::invalid_value),
        help("Check the property definition's type, bounds and choice list.")
    )]
    InvalidValue { property: String, message: String },

    #[error("property {property} is disabled")]
    #[diagnostic(
        code(ofml::property::disabled),
        help("Enable the property with `set_prop_state` before editing it.")
    )]
    Disabled { property: String },

    #[error("property {property} is not defined on {instance}")]
    #[diagnostic(code(ofml::property::unknown))]
    Unknown { property: String, instance: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read runtime config: {path}")]
    #[diagnostic(
        code(ofml::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse runtime config {path}: {message}")]
    #[diagnostic(
        code(ofml::config::parse),
        help("Check the TOML syntax and field names of the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to render runtime config: {message}")]
    #[diagnostic(code(ofml::config::render))]
    Render { message: String },
}

/// Convenience alias for functions returning OFML results.
pub type OfmlResult<T> = std::result::Result<T, OfmlError>;
