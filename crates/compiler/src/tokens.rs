//! Attribute and type tokens referenced by expressions, predicates, and
//! result descriptions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A (possibly qualified) attribute reference.
///
/// The qualifier names the operator whose output carries the attribute; it
/// doubles as the FROM-clause alias in generated SQL. Attribute names are
/// disambiguated by upstream analysis (`ALIAS_COLUMN`) and collapsed back to
/// their original column names by the re-renaming pass just before code
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute {
    /// Qualifying table/operator name, if any.
    pub table: Option<String>,
    /// Attribute name.
    pub name: String,
}

impl Attribute {
    /// Unqualified attribute.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    /// Qualified attribute.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Re-qualifies the attribute in place.
    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = Some(table.into());
    }

    /// Replaces qualifier `old` with `new`, leaving other qualifiers alone.
    pub fn rename_table(&mut self, old: &str, new: &str) {
        if self.table.as_deref() == Some(old) {
            self.table = Some(new.to_string());
        }
    }

    /// Applies an old-name → new-name substitution to the attribute name.
    pub fn rename(&mut self, renames: &BTreeMap<String, String>) -> bool {
        match renames.get(&self.name) {
            Some(new) => {
                self.name = new.clone();
                true
            }
            None => false,
        }
    }

    /// SQL rendering with qualifier.
    pub fn to_sql(&self) -> String {
        match &self.table {
            Some(table) => format!("{table}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// SQL column types carried by result descriptions and rendered into DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Decimal,
    Varchar,
    Date,
}

impl SqlType {
    /// DDL keyword for the type.
    pub fn ddl(&self) -> &'static str {
        match self {
            SqlType::Integer => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::Decimal => "DECIMAL",
            SqlType::Varchar => "VARCHAR",
            SqlType::Date => "DATE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Attribute, SqlType};

    #[test]
    fn qualified_rendering() {
        assert_eq!(Attribute::qualified("Op1", "R_A").to_sql(), "Op1.R_A");
        assert_eq!(Attribute::new("R_A").to_sql(), "R_A");
    }

    #[test]
    fn type_ddl_keywords() {
        assert_eq!(SqlType::Integer.ddl(), "INT");
        assert_eq!(SqlType::Varchar.ddl(), "VARCHAR");
    }
}
