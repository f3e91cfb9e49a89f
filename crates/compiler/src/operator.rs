//! The compile-operator arena node and its closed kind enum.
//!
//! Operators live in the [`CompilePlan`](crate::plan::CompilePlan) arena and
//! reference each other by [`Identifier`]; no pass ever holds object
//! pointers across mutations. SQL rendering embeds `<child-id>` placeholders
//! that the code generator later substitutes with inlined child SQL or
//! resolves to local input table names.

use crate::connection::ConnectionDesc;
use crate::expr::Expression;
use crate::pred::Predicate;
use crate::result::ResultDesc;
use crate::tokens::{Attribute, SqlType};
use quarry_common::{CompilerError, Identifier, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// One node of the logical operator DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOperator {
    /// Unique operator id; also the namespace of its result attributes.
    pub id: Identifier,
    /// Ordered child operator ids.
    pub children: Vec<Identifier>,
    /// Parent operator ids (more than one makes this a shared result).
    pub parents: Vec<Identifier>,
    /// Output descriptions; the first entry is the primary output.
    pub results: Vec<ResultDesc>,
    /// Estimated runtime.
    pub runtime: f64,
    /// Estimated materialization time.
    pub mattime: f64,
    /// Wished connections, one list per partition.
    pub wished: Vec<Vec<ConnectionDesc>>,
    /// Operator kind and kind-specific payload.
    pub kind: OperatorKind,
}

impl CompileOperator {
    /// Creates an operator with no edges and a default result.
    pub fn new(id: impl Into<Identifier>, kind: OperatorKind) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
            parents: Vec::new(),
            results: vec![ResultDesc::default()],
            runtime: 0.0,
            mattime: 0.0,
            wished: Vec::new(),
            kind,
        }
    }

    /// Creates an operator with the given children.
    pub fn with_children(
        id: impl Into<Identifier>,
        kind: OperatorKind,
        children: Vec<Identifier>,
    ) -> Self {
        let mut op = Self::new(id, kind);
        op.children = children;
        op
    }

    /// Primary output description.
    pub fn result(&self) -> &ResultDesc {
        &self.results[0]
    }

    /// Primary output description, mutable.
    pub fn result_mut(&mut self) -> &mut ResultDesc {
        &mut self.results[0]
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, OperatorKind::Table(_))
    }

    /// Kind name for diagnostics and errors.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Wished connections for one partition; empty when not annotated.
    pub fn wished_connections(&self, partition: usize) -> &[ConnectionDesc] {
        self.wished.get(partition).map_or(&[], Vec::as_slice)
    }

    /// Appends wished connections for one partition, growing the per-partition
    /// table as needed.
    pub fn add_wished_connections(&mut self, partition: usize, conns: Vec<ConnectionDesc>) {
        if self.wished.len() <= partition {
            self.wished.resize_with(partition + 1, Vec::new);
        }
        self.wished[partition].extend(conns);
    }

    /// Index of `child` in the child list.
    pub fn find_child(&self, child: &Identifier) -> Option<usize> {
        self.children.iter().position(|c| c == child)
    }

    /// Replaces every child edge pointing at `old` with `new`.
    pub fn replace_child(&mut self, old: &Identifier, new: &Identifier) {
        for c in &mut self.children {
            if c == old {
                *c = new.clone();
            }
        }
    }

    /// Replaces every parent edge pointing at `old` with `new`.
    pub fn replace_parent(&mut self, old: &Identifier, new: &Identifier) {
        for p in &mut self.parents {
            if p == old {
                *p = new.clone();
            }
        }
    }

    /// Applies an old-name → new-name attribute substitution across results
    /// and kind payload. Returns true when anything changed.
    pub fn rename_attributes(&mut self, renames: &BTreeMap<String, String>) -> bool {
        let mut renamed = false;
        for result in &mut self.results {
            renamed |= result.rename_attributes(renames);
        }
        renamed |= self.kind.rename_attributes(renames);
        renamed
    }

    /// Renders the operator's SQL text with `<child-id>` placeholders.
    ///
    /// Coarse operators reference their inputs through the frontier tables
    /// recorded in their join pairs; everything else references
    /// `self.children` directly.
    pub fn sql_text(&self) -> Result<String> {
        self.kind.sql_text(&self.id, &self.children, self.result())
    }
}

/// A join-key pair recorded while combining equi-join chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPair {
    pub left: Attribute,
    pub right: Attribute,
}

/// One physical partition of a base table: catalog table name plus storage
/// locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePartition {
    pub name: String,
    pub uris: Vec<String>,
}

/// Base-table scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOp {
    /// Catalog table name.
    pub table: String,
    /// Statement-level alias the source columns were disambiguated with.
    pub alias: String,
    /// Column names and types from the catalog.
    pub columns: Vec<(String, SqlType)>,
    /// Physical partitions; one entry for an unpartitioned table.
    pub partitions: Vec<TablePartition>,
}

impl TableOp {
    /// Whether the catalog splits this table across several partitions.
    pub fn is_partitioned(&self) -> bool {
        self.partitions.len() > 1
    }

    /// Catalog table name for one partition.
    pub fn partition_name(&self, partition: usize) -> &str {
        match self.partitions.get(partition) {
            Some(part) => &part.name,
            None => &self.table,
        }
    }

    /// Storage locations for one partition.
    pub fn partition_uris(&self, partition: usize) -> &[String] {
        let idx = if partition < self.partitions.len() {
            partition
        } else {
            0
        };
        self.partitions.get(idx).map_or(&[], |p| p.uris.as_slice())
    }
}

/// Row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOp {
    pub predicate: Predicate,
}

/// Projection with aliased expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionOp {
    pub exprs: Vec<Expression>,
    pub aliases: Vec<String>,
}

/// Aggregation with aliased aggregate and group expressions. Result
/// attributes list aggregate aliases first, then group aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationOp {
    pub agg_exprs: Vec<Expression>,
    pub group_exprs: Vec<Expression>,
    pub aliases: Vec<String>,
}

/// Attribute rename, `(old, new)` per output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameOp {
    pub aliases: Vec<(String, String)>,
}

/// Binary equi-join on one key pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquiJoinOp {
    pub left: Attribute,
    pub right: Attribute,
}

/// Multi-way join produced by the join-combine pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlJoinOp {
    /// Join-key pairs in bottom-up chain order.
    pub pairs: Vec<JoinPair>,
}

/// Coarse unary operator produced by the unary-combine pass.
///
/// Folds at most one selection, one projection, and one aggregation (renames
/// fold repeatedly); `replace_map` carries the running alias → expression
/// substitution so later folds see the effect of earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlUnaryOp {
    pub select_exprs: Vec<Expression>,
    pub select_aliases: Vec<String>,
    pub agg_exprs: Vec<Expression>,
    pub group_exprs: Vec<Expression>,
    pub where_pred: Option<Predicate>,
    pub having_pred: Option<Predicate>,
    pub replace_map: BTreeMap<String, Expression>,
    pub folded_selection: bool,
    pub folded_projection: bool,
    pub folded_aggregation: bool,
    pub folded_ops: usize,
}

impl SqlUnaryOp {
    /// Initializes the fold state from the child's output attributes.
    pub fn seeded_from(child: &ResultDesc) -> Self {
        let mut op = Self {
            select_exprs: Vec::new(),
            select_aliases: Vec::new(),
            agg_exprs: Vec::new(),
            group_exprs: Vec::new(),
            where_pred: None,
            having_pred: None,
            replace_map: BTreeMap::new(),
            folded_selection: false,
            folded_projection: false,
            folded_aggregation: false,
            folded_ops: 0,
        };
        for att in child.attributes() {
            let expr = Expression::Attribute(att.clone());
            op.replace_map.insert(att.name.clone(), expr.clone());
            op.select_aliases.push(att.name.clone());
            op.select_exprs.push(expr);
        }
        op
    }

    /// Effective select list: explicit expressions, or aggregate plus group
    /// expressions once an aggregation has been folded.
    pub fn effective_select(&self) -> Vec<&Expression> {
        if !self.select_exprs.is_empty() {
            self.select_exprs.iter().collect()
        } else {
            self.agg_exprs.iter().chain(self.group_exprs.iter()).collect()
        }
    }
}

/// Fused join + unary produced by the SQL-combine pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCombinedOp {
    pub pairs: Vec<JoinPair>,
    pub select_exprs: Vec<Expression>,
    pub select_aliases: Vec<String>,
    pub where_preds: Vec<Predicate>,
    pub having_pred: Option<Predicate>,
    pub group_exprs: Vec<Expression>,
}

/// Closed set of operator kinds.
///
/// Every pass is an exhaustive match over these variants; a kind a pass
/// cannot handle in a given position is an explicit
/// [`CompilerError::UnsupportedOperator`] arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorKind {
    Table(TableOp),
    Selection(SelectionOp),
    Projection(ProjectionOp),
    Aggregation(AggregationOp),
    Rename(RenameOp),
    EquiJoin(EquiJoinOp),
    SqlJoin(SqlJoinOp),
    SqlUnary(SqlUnaryOp),
    SqlCombined(SqlCombinedOp),
}

impl OperatorKind {
    /// Kind name for diagnostics and errors.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Table(_) => "Table",
            OperatorKind::Selection(_) => "Selection",
            OperatorKind::Projection(_) => "Projection",
            OperatorKind::Aggregation(_) => "Aggregation",
            OperatorKind::Rename(_) => "Rename",
            OperatorKind::EquiJoin(_) => "EquiJoin",
            OperatorKind::SqlJoin(_) => "SqlJoin",
            OperatorKind::SqlUnary(_) => "SqlUnary",
            OperatorKind::SqlCombined(_) => "SqlCombined",
        }
    }

    fn rename_attributes(&mut self, renames: &BTreeMap<String, String>) -> bool {
        let mut renamed = false;
        match self {
            OperatorKind::Table(_) => {}
            OperatorKind::Selection(s) => renamed |= s.predicate.rename_attributes(renames),
            OperatorKind::Projection(p) => {
                for e in &mut p.exprs {
                    renamed |= e.rename_attributes(renames);
                }
                renamed |= rename_aliases(&mut p.aliases, renames);
            }
            OperatorKind::Aggregation(a) => {
                for e in a.agg_exprs.iter_mut().chain(a.group_exprs.iter_mut()) {
                    renamed |= e.rename_attributes(renames);
                }
                renamed |= rename_aliases(&mut a.aliases, renames);
            }
            OperatorKind::Rename(r) => {
                for (old, new) in &mut r.aliases {
                    if let Some(renamed_old) = renames.get(old) {
                        *old = renamed_old.clone();
                        renamed = true;
                    }
                    if let Some(renamed_new) = renames.get(new) {
                        *new = renamed_new.clone();
                        renamed = true;
                    }
                }
            }
            OperatorKind::EquiJoin(j) => {
                renamed |= j.left.rename(renames);
                renamed |= j.right.rename(renames);
            }
            OperatorKind::SqlJoin(j) => {
                for pair in &mut j.pairs {
                    renamed |= pair.left.rename(renames);
                    renamed |= pair.right.rename(renames);
                }
            }
            OperatorKind::SqlUnary(u) => {
                for e in u
                    .select_exprs
                    .iter_mut()
                    .chain(u.agg_exprs.iter_mut())
                    .chain(u.group_exprs.iter_mut())
                {
                    renamed |= e.rename_attributes(renames);
                }
                renamed |= rename_aliases(&mut u.select_aliases, renames);
                if let Some(p) = &mut u.where_pred {
                    renamed |= p.rename_attributes(renames);
                }
                if let Some(p) = &mut u.having_pred {
                    renamed |= p.rename_attributes(renames);
                }
            }
            OperatorKind::SqlCombined(c) => {
                for pair in &mut c.pairs {
                    renamed |= pair.left.rename(renames);
                    renamed |= pair.right.rename(renames);
                }
                for e in c.select_exprs.iter_mut().chain(c.group_exprs.iter_mut()) {
                    renamed |= e.rename_attributes(renames);
                }
                renamed |= rename_aliases(&mut c.select_aliases, renames);
                for p in &mut c.where_preds {
                    renamed |= p.rename_attributes(renames);
                }
                if let Some(p) = &mut c.having_pred {
                    renamed |= p.rename_attributes(renames);
                }
            }
        }
        renamed
    }

    fn sql_text(
        &self,
        id: &Identifier,
        children: &[Identifier],
        result: &ResultDesc,
    ) -> Result<String> {
        match self {
            // A table renders as its local input table name; the generator
            // wraps root-level table scans as SELECT * FROM <name>.
            OperatorKind::Table(_) => Ok(id.to_string()),

            OperatorKind::Selection(s) => {
                let child = only_child(id, children)?;
                Ok(format!(
                    "SELECT {} FROM <{child}> AS {child} WHERE {}",
                    bare_names(result),
                    s.predicate.to_sql()
                ))
            }

            OperatorKind::Projection(p) => {
                let child = only_child(id, children)?;
                Ok(format!(
                    "SELECT {} FROM <{child}> AS {child}",
                    alias_list(&p.exprs, &p.aliases)
                ))
            }

            OperatorKind::Aggregation(a) => {
                let child = only_child(id, children)?;
                let exprs: Vec<Expression> = a
                    .agg_exprs
                    .iter()
                    .chain(a.group_exprs.iter())
                    .cloned()
                    .collect();
                let mut sql = format!(
                    "SELECT {} FROM <{child}> AS {child}",
                    alias_list(&exprs, &a.aliases)
                );
                if !a.group_exprs.is_empty() {
                    sql.push_str(&format!(" GROUP BY {}", expr_list(&a.group_exprs)));
                }
                Ok(sql)
            }

            OperatorKind::Rename(r) => {
                let child = only_child(id, children)?;
                let list = r
                    .aliases
                    .iter()
                    .map(|(old, new)| format!("{old} AS {new}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!("SELECT {list} FROM <{child}> AS {child}"))
            }

            OperatorKind::EquiJoin(j) => {
                if children.len() != 2 {
                    return Err(CompilerError::InvalidPlan(format!(
                        "equi-join {id} must have two children"
                    )));
                }
                let (l, r) = (&children[0], &children[1]);
                Ok(format!(
                    "SELECT {} FROM <{l}> AS {l} INNER JOIN <{r}> AS {r} ON {} = {}",
                    bare_names(result),
                    j.left.to_sql(),
                    j.right.to_sql()
                ))
            }

            OperatorKind::SqlJoin(j) => {
                render_join_chain(id, &j.pairs, &bare_names(result), "", "", "")
            }

            OperatorKind::SqlUnary(u) => {
                let child = only_child(id, children)?;
                let exprs: Vec<Expression> =
                    u.effective_select().into_iter().cloned().collect();
                let mut sql = format!(
                    "SELECT {} FROM <{child}> AS {child}",
                    alias_list(&exprs, &u.select_aliases)
                );
                if let Some(p) = &u.where_pred {
                    sql.push_str(&format!(" WHERE {}", p.to_sql()));
                }
                if !u.group_exprs.is_empty() {
                    sql.push_str(&format!(" GROUP BY {}", expr_list(&u.group_exprs)));
                }
                if let Some(p) = &u.having_pred {
                    sql.push_str(&format!(" HAVING {}", p.to_sql()));
                }
                Ok(sql)
            }

            OperatorKind::SqlCombined(c) => {
                let where_sql = if c.where_preds.is_empty() {
                    String::new()
                } else {
                    format!(
                        " WHERE {}",
                        c.where_preds
                            .iter()
                            .map(|p| p.to_sql())
                            .collect::<Vec<_>>()
                            .join(" AND ")
                    )
                };
                let group_sql = if c.group_exprs.is_empty() {
                    String::new()
                } else {
                    format!(" GROUP BY {}", expr_list(&c.group_exprs))
                };
                let having_sql = match &c.having_pred {
                    Some(p) => format!(" HAVING {}", p.to_sql()),
                    None => String::new(),
                };
                render_join_chain(
                    id,
                    &c.pairs,
                    &alias_list(&c.select_exprs, &c.select_aliases),
                    &where_sql,
                    &group_sql,
                    &having_sql,
                )
            }
        }
    }
}

fn rename_aliases(aliases: &mut [String], renames: &BTreeMap<String, String>) -> bool {
    let mut renamed = false;
    for alias in aliases {
        if let Some(new) = renames.get(alias) {
            *alias = new.clone();
            renamed = true;
        }
    }
    renamed
}

fn only_child<'a>(id: &Identifier, children: &'a [Identifier]) -> Result<&'a Identifier> {
    children.first().ok_or_else(|| {
        CompilerError::InvalidPlan(format!("operator {id} has no child to render FROM"))
    })
}

fn bare_names(result: &ResultDesc) -> String {
    result
        .attributes()
        .iter()
        .map(|a| a.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

fn alias_list(exprs: &[Expression], aliases: &[String]) -> String {
    exprs
        .iter()
        .zip(aliases.iter())
        .map(|(e, a)| format!("{} AS {a}", e.to_sql()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn expr_list(exprs: &[Expression]) -> String {
    exprs
        .iter()
        .map(Expression::to_sql)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders a linear multi-way join chain from bottom-up join pairs.
///
/// The first pair introduces both base tables; every later pair must join one
/// new table against one already in the chain.
fn render_join_chain(
    id: &Identifier,
    pairs: &[JoinPair],
    select_list: &str,
    where_sql: &str,
    group_sql: &str,
    having_sql: &str,
) -> Result<String> {
    let first = pairs.first().ok_or_else(|| {
        CompilerError::InvalidPlan(format!("combined join {id} has no join pairs"))
    })?;
    let table_of = |att: &Attribute| -> Result<String> {
        att.table.clone().ok_or_else(|| {
            CompilerError::InvalidPlan(format!(
                "join key {} of {id} has no table qualifier",
                att.name
            ))
        })
    };

    let mut joined: BTreeSet<String> = BTreeSet::new();
    let (t0, t1) = (table_of(&first.left)?, table_of(&first.right)?);
    let mut sql = format!(
        "SELECT {select_list} FROM <{t0}> AS {t0} INNER JOIN <{t1}> AS {t1} ON {} = {}",
        first.left.to_sql(),
        first.right.to_sql()
    );
    joined.insert(t0);
    joined.insert(t1);

    for pair in &pairs[1..] {
        let (lt, rt) = (table_of(&pair.left)?, table_of(&pair.right)?);
        let (new_table, on_known, on_new) = if joined.contains(&lt) && !joined.contains(&rt) {
            (rt, pair.left.to_sql(), pair.right.to_sql())
        } else if joined.contains(&rt) && !joined.contains(&lt) {
            (lt, pair.right.to_sql(), pair.left.to_sql())
        } else {
            return Err(CompilerError::InvalidPlan(format!(
                "join chain of {id} is not linear at {} = {}",
                pair.left.to_sql(),
                pair.right.to_sql()
            )));
        };
        sql.push_str(&format!(
            " INNER JOIN <{new_table}> AS {new_table} ON {on_known} = {on_new}"
        ));
        joined.insert(new_table);
    }

    sql.push_str(where_sql);
    sql.push_str(group_sql);
    sql.push_str(having_sql);
    Ok(sql)
}
