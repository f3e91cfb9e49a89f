//! Scalar and aggregate expressions rendered into generated SQL.

use crate::tokens::Attribute;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Literal values appearing in expressions and predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Decimal(f64),
    Varchar(String),
}

impl Literal {
    fn to_sql(&self) -> String {
        match self {
            Literal::Int(v) => v.to_string(),
            Literal::Decimal(v) => v.to_string(),
            Literal::Varchar(v) => format!("'{v}'"),
        }
    }
}

/// Aggregate functions supported by the SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    fn keyword(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::Avg => "AVG",
        }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl ArithOp {
    fn keyword(&self) -> &'static str {
        match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
        }
    }
}

/// Scalar/aggregate expression tree.
///
/// Rewrites consume and rebuild the tree; the combine passes use
/// [`Expression::replace_attributes`] to substitute folded-operator aliases
/// with the expressions that produce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Attribute(Attribute),
    Literal(Literal),
    Aggregation {
        func: AggFunc,
        arg: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: ArithOp,
        right: Box<Expression>,
    },
}

impl Expression {
    /// Attribute-reference shorthand.
    pub fn attr(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expression::Attribute(Attribute::qualified(table, name))
    }

    /// SQL rendering.
    pub fn to_sql(&self) -> String {
        match self {
            Expression::Attribute(att) => att.to_sql(),
            Expression::Literal(lit) => lit.to_sql(),
            Expression::Aggregation { func, arg } => {
                format!("{}({})", func.keyword(), arg.to_sql())
            }
            Expression::Binary { left, op, right } => {
                format!("{} {} {}", left.to_sql(), op.keyword(), right.to_sql())
            }
        }
    }

    /// Returns true for a bare attribute reference.
    pub fn is_attribute(&self) -> bool {
        matches!(self, Expression::Attribute(_))
    }

    /// The bare attribute, when the expression is one.
    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            Expression::Attribute(att) => Some(att),
            _ => None,
        }
    }

    /// Collects every attribute referenced by the expression.
    pub fn attributes(&self) -> Vec<&Attribute> {
        let mut atts = Vec::new();
        self.collect_attributes(&mut atts);
        atts
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a Attribute>) {
        match self {
            Expression::Attribute(att) => out.push(att),
            Expression::Literal(_) => {}
            Expression::Aggregation { arg, .. } => arg.collect_attributes(out),
            Expression::Binary { left, right, .. } => {
                left.collect_attributes(out);
                right.collect_attributes(out);
            }
        }
    }

    /// True when the expression contains an aggregate call.
    pub fn is_aggregation(&self) -> bool {
        match self {
            Expression::Aggregation { .. } => true,
            Expression::Attribute(_) | Expression::Literal(_) => false,
            Expression::Binary { left, right, .. } => {
                left.is_aggregation() || right.is_aggregation()
            }
        }
    }

    /// Replaces attribute references whose name appears in `exprs` with the
    /// mapped expression.
    #[must_use]
    pub fn replace_attributes(self, exprs: &BTreeMap<String, Expression>) -> Expression {
        match self {
            Expression::Attribute(att) => match exprs.get(&att.name) {
                Some(replacement) => replacement.clone(),
                None => Expression::Attribute(att),
            },
            lit @ Expression::Literal(_) => lit,
            Expression::Aggregation { func, arg } => Expression::Aggregation {
                func,
                arg: Box::new(arg.replace_attributes(exprs)),
            },
            Expression::Binary { left, op, right } => Expression::Binary {
                left: Box::new(left.replace_attributes(exprs)),
                op,
                right: Box::new(right.replace_attributes(exprs)),
            },
        }
    }

    /// Applies an old-name → new-name substitution to every attribute.
    pub fn rename_attributes(&mut self, renames: &BTreeMap<String, String>) -> bool {
        match self {
            Expression::Attribute(att) => att.rename(renames),
            Expression::Literal(_) => false,
            Expression::Aggregation { arg, .. } => arg.rename_attributes(renames),
            Expression::Binary { left, right, .. } => {
                let l = left.rename_attributes(renames);
                let r = right.rename_attributes(renames);
                l || r
            }
        }
    }

    /// Drops the qualifier from every attribute reference.
    pub fn strip_tables(&mut self) {
        match self {
            Expression::Attribute(att) => att.table = None,
            Expression::Literal(_) => {}
            Expression::Aggregation { arg, .. } => arg.strip_tables(),
            Expression::Binary { left, right, .. } => {
                left.strip_tables();
                right.strip_tables();
            }
        }
    }

    /// Replaces qualifier `old` with `new` on every attribute reference.
    pub fn rename_table(&mut self, old: &str, new: &str) {
        match self {
            Expression::Attribute(att) => att.rename_table(old, new),
            Expression::Literal(_) => {}
            Expression::Aggregation { arg, .. } => arg.rename_table(old, new),
            Expression::Binary { left, right, .. } => {
                left.rename_table(old, new);
                right.rename_table(old, new);
            }
        }
    }
}
