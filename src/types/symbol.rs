use serde::{Deserialize, Serialize};
use std::fmt;

/// Futures contract symbol (e.g. "ES", "NQ", "MES").
/// Uses NewType pattern for type safety.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Basic shape check: futures root symbols are short uppercase strings.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 10
            && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> String {
        s.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_creation() {
        let symbol = Symbol::new("ES");
        assert_eq!(symbol.as_str(), "ES");
        assert_eq!(format!("{}", symbol), "ES");
    }

    #[test]
    fn test_symbol_validation() {
        assert!(Symbol::new("ES").is_valid());
        assert!(Symbol::new("MNQ").is_valid());
        assert!(!Symbol::new("").is_valid());
        assert!(!Symbol::new("WAY-TOO-LONG-SYMBOL").is_valid());
    }

    #[test]
    fn test_symbol_serde() {
        let symbol = Symbol::new("ES");
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"ES\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, symbol);
    }
}
