//! Predefined rule reasons.

use crate::symbol::{SymbolId, intern};

/// Reasons the runtime itself fires. User reasons are any other symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Reason {
    TRANSLATE,
    ROTATE,
    CREATE_ELEMENT,
    NEW_ELEMENT,
    REMOVE_ELEMENT,
    SPATIAL_MODELING,
    PICK,
    SELECT,
    START_DUMP,
    FINISH_DUMP,
    START_EVAL,
    FINISH_EVAL,
}

impl Reason {
    pub const ALL: [Reason; 12] = [
        Reason::TRANSLATE,
        Reason::ROTATE,
        Reason::CREATE_ELEMENT,
        Reason::NEW_ELEMENT,
        Reason::REMOVE_ELEMENT,
        Reason::SPATIAL_MODELING,
        Reason::PICK,
        Reason::SELECT,
        Reason::START_DUMP,
        Reason::FINISH_DUMP,
        Reason::START_EVAL,
        Reason::FINISH_EVAL,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Reason::TRANSLATE => "TRANSLATE",
            Reason::ROTATE => "ROTATE",
            Reason::CREATE_ELEMENT => "CREATE_ELEMENT",
            Reason::NEW_ELEMENT => "NEW_ELEMENT",
            Reason::REMOVE_ELEMENT => "REMOVE_ELEMENT",
            Reason::SPATIAL_MODELING => "SPATIAL_MODELING",
            Reason::PICK => "PICK",
            Reason::SELECT => "SELECT",
            Reason::START_DUMP => "START_DUMP",
            Reason::FINISH_DUMP => "FINISH_DUMP",
            Reason::START_EVAL => "START_EVAL",
            Reason::FINISH_EVAL => "FINISH_EVAL",
        }
    }

    pub fn symbol(self) -> SymbolId {
        intern(self.label())
    }

    /// Map an interned symbol back to a predefined reason.
    pub fn from_symbol(symbol: SymbolId) -> Option<Self> {
        let label = symbol.label();
        Self::ALL.into_iter().find(|r| r.label() == &*label)
    }
}

impl From<Reason> for SymbolId {
    fn from(reason: Reason) -> Self {
        reason.symbol()
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_symbols_and_back() {
        for reason in Reason::ALL {
            assert_eq!(Reason::from_symbol(reason.symbol()), Some(reason));
        }
        assert_eq!(Reason::from_symbol(intern("MY_REASON")), None);
    }
}
