//! Predicates for WHERE/HAVING clauses and join conditions.

use crate::expr::Expression;
use crate::tokens::Attribute;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompOp {
    fn keyword(&self) -> &'static str {
        match self {
            CompOp::Eq => "=",
            CompOp::NotEq => "<>",
            CompOp::Lt => "<",
            CompOp::LtEq => "<=",
            CompOp::Gt => ">",
            CompOp::GtEq => ">=",
        }
    }
}

/// Boolean predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        left: Expression,
        op: CompOp,
        right: Expression,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Equality-comparison shorthand.
    pub fn eq(left: Expression, right: Expression) -> Self {
        Predicate::Compare {
            left,
            op: CompOp::Eq,
            right,
        }
    }

    /// SQL rendering.
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Compare { left, op, right } => {
                format!("{} {} {}", left.to_sql(), op.keyword(), right.to_sql())
            }
            Predicate::And(preds) => join_rendered(preds, " AND "),
            Predicate::Or(preds) => join_rendered(preds, " OR "),
            Predicate::Not(inner) => format!("NOT ({})", inner.to_sql()),
        }
    }

    /// Collects every attribute referenced by the predicate.
    pub fn attributes(&self) -> Vec<&Attribute> {
        let mut atts = Vec::new();
        self.collect_attributes(&mut atts);
        atts
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a Attribute>) {
        match self {
            Predicate::Compare { left, right, .. } => {
                out.extend(left.attributes());
                out.extend(right.attributes());
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                for p in preds {
                    p.collect_attributes(out);
                }
            }
            Predicate::Not(inner) => inner.collect_attributes(out),
        }
    }

    /// Replaces attribute references whose name appears in `exprs` with the
    /// mapped expression.
    #[must_use]
    pub fn replace_attributes(self, exprs: &BTreeMap<String, Expression>) -> Predicate {
        match self {
            Predicate::Compare { left, op, right } => Predicate::Compare {
                left: left.replace_attributes(exprs),
                op,
                right: right.replace_attributes(exprs),
            },
            Predicate::And(preds) => Predicate::And(
                preds
                    .into_iter()
                    .map(|p| p.replace_attributes(exprs))
                    .collect(),
            ),
            Predicate::Or(preds) => Predicate::Or(
                preds
                    .into_iter()
                    .map(|p| p.replace_attributes(exprs))
                    .collect(),
            ),
            Predicate::Not(inner) => Predicate::Not(Box::new(inner.replace_attributes(exprs))),
        }
    }

    /// Applies an old-name → new-name substitution to every attribute.
    pub fn rename_attributes(&mut self, renames: &BTreeMap<String, String>) -> bool {
        match self {
            Predicate::Compare { left, right, .. } => {
                let l = left.rename_attributes(renames);
                let r = right.rename_attributes(renames);
                l || r
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                let mut renamed = false;
                for p in preds {
                    renamed |= p.rename_attributes(renames);
                }
                renamed
            }
            Predicate::Not(inner) => inner.rename_attributes(renames),
        }
    }

    /// Drops the qualifier from every attribute reference.
    pub fn strip_tables(&mut self) {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.strip_tables();
                right.strip_tables();
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                for p in preds {
                    p.strip_tables();
                }
            }
            Predicate::Not(inner) => inner.strip_tables(),
        }
    }

    /// Replaces qualifier `old` with `new` on every attribute reference.
    pub fn rename_table(&mut self, old: &str, new: &str) {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.rename_table(old, new);
                right.rename_table(old, new);
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                for p in preds {
                    p.rename_table(old, new);
                }
            }
            Predicate::Not(inner) => inner.rename_table(old, new),
        }
    }
}

fn join_rendered(preds: &[Predicate], sep: &str) -> String {
    preds
        .iter()
        .map(|p| p.to_sql())
        .collect::<Vec<_>>()
        .join(sep)
}
