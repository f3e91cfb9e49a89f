//! Hierarchical identifiers shared by compile and tracker plan nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical, appendable name used as the handle for every plan node and
/// every generated table or view.
///
/// Derived names are built with [`Identifier::append`] /
/// [`Identifier::appended`]; tokens concatenate without a separator, so an
/// operator `R` yields the output table `ROUT` and the partition view prefix
/// `RP0OUT`. Equality, ordering, and hashing follow the rendered string
/// form: two identifiers are equal iff they render identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Creates an identifier from its base token.
    pub fn new(base: impl Into<String>) -> Self {
        Self(base.into())
    }

    /// Appends a token in place and returns `self` for chaining.
    pub fn append(&mut self, token: impl AsRef<str>) -> &mut Self {
        self.0.push_str(token.as_ref());
        self
    }

    /// Returns a new identifier with `token` appended, leaving `self`
    /// untouched.
    #[must_use]
    pub fn appended(&self, token: impl AsRef<str>) -> Self {
        let mut id = self.clone();
        id.append(token);
        id
    }

    /// Rendered string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Identifier;

    #[test]
    fn append_derives_without_mutating_original() {
        let id = Identifier::new("Op1");
        let out = id.appended("OUT");
        assert_eq!(id.as_str(), "Op1");
        assert_eq!(out.as_str(), "Op1OUT");
    }

    #[test]
    fn equality_is_name_based() {
        let a = Identifier::new("R").appended("OUT");
        let b = Identifier::new("ROUT");
        assert_eq!(a, b);
    }

    #[test]
    fn partition_suffix_precedes_out_suffix() {
        let mut id = Identifier::new("Op1");
        id.append("P0").append("OUT");
        assert_eq!(id.as_str(), "Op1P0OUT");
    }
}
