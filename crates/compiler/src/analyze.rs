//! Bottom-up result construction and materialization annotation.

use crate::operator::OperatorKind;
use crate::plan::CompilePlan;
use crate::tokens::{Attribute, SqlType};
use crate::expr::{AggFunc, Expression, Literal};
use quarry_common::{CompilerError, Identifier, Result};
use std::collections::{BTreeMap, BTreeSet};

type Columns = Vec<(Attribute, SqlType)>;

/// Builds every operator's result description bottom-up.
///
/// Base tables produce `ALIAS_COLUMN` attribute names; selections and joins
/// inherit their children's attributes; projections and aggregations produce
/// their alias names with inferred types. All attributes end up namespaced by
/// the owning operator's id. Partition descriptors and materialize flags
/// already present are preserved.
///
/// Rename and the coarse combine kinds are not supported here; encountering
/// one returns an error and leaves the plan unmodified.
pub fn build_results(plan: &mut CompilePlan) -> Result<()> {
    let mut computed: BTreeMap<Identifier, Columns> = BTreeMap::new();
    let mut visited: BTreeSet<Identifier> = BTreeSet::new();
    for root in plan.root_ids().to_vec() {
        build_visit(plan, &root, &mut visited, &mut computed)?;
    }
    // All kinds handled; commit in one pass.
    for (id, columns) in computed {
        let op = plan.operator_mut(&id)?;
        let table = op.id.to_string();
        let result = op.result_mut();
        result.set_columns(columns);
        result.set_attribute_table(&table);
    }
    Ok(())
}

fn build_visit(
    plan: &CompilePlan,
    id: &Identifier,
    visited: &mut BTreeSet<Identifier>,
    computed: &mut BTreeMap<Identifier, Columns>,
) -> Result<()> {
    if !visited.insert(id.clone()) {
        return Ok(());
    }
    let op = plan.operator(id)?;
    for child in &op.children {
        build_visit(plan, child, visited, computed)?;
    }

    let columns = match &op.kind {
        OperatorKind::Table(table) => table
            .columns
            .iter()
            .map(|(name, ty)| (Attribute::new(format!("{}_{name}", table.alias)), *ty))
            .collect(),

        OperatorKind::Selection(_) => child_columns(plan, op.children.first(), computed, id)?,

        OperatorKind::Projection(p) => {
            let input = child_columns(plan, op.children.first(), computed, id)?;
            aliased_columns(&p.exprs, &p.aliases, &input, id)?
        }

        OperatorKind::Aggregation(a) => {
            let input = child_columns(plan, op.children.first(), computed, id)?;
            let exprs: Vec<Expression> = a
                .agg_exprs
                .iter()
                .chain(a.group_exprs.iter())
                .cloned()
                .collect();
            aliased_columns(&exprs, &a.aliases, &input, id)?
        }

        OperatorKind::EquiJoin(_) => {
            if op.children.len() != 2 {
                return Err(CompilerError::InvalidPlan(format!(
                    "equi-join {id} must have two children"
                )));
            }
            let mut cols = child_columns(plan, op.children.first(), computed, id)?;
            cols.extend(child_columns(plan, op.children.get(1), computed, id)?);
            cols
        }

        OperatorKind::Rename(_)
        | OperatorKind::SqlJoin(_)
        | OperatorKind::SqlUnary(_)
        | OperatorKind::SqlCombined(_) => {
            return Err(CompilerError::unsupported(op.kind_name(), "result builder"));
        }
    };

    computed.insert(id.clone(), columns);
    Ok(())
}

fn child_columns(
    plan: &CompilePlan,
    child: Option<&Identifier>,
    computed: &BTreeMap<Identifier, Columns>,
    parent: &Identifier,
) -> Result<Columns> {
    let child = child.ok_or_else(|| {
        CompilerError::InvalidPlan(format!("operator {parent} is missing a child"))
    })?;
    if let Some(cols) = computed.get(child) {
        return Ok(cols.clone());
    }
    // Shared child already carrying a result from a previous build.
    let result = plan.operator(child)?.result();
    Ok(result
        .attributes()
        .iter()
        .cloned()
        .zip(result.types().iter().copied())
        .collect())
}

fn aliased_columns(
    exprs: &[Expression],
    aliases: &[String],
    input: &Columns,
    id: &Identifier,
) -> Result<Columns> {
    if exprs.len() != aliases.len() {
        return Err(CompilerError::InvalidPlan(format!(
            "operator {id} has {} expressions but {} aliases",
            exprs.len(),
            aliases.len()
        )));
    }
    exprs
        .iter()
        .zip(aliases.iter())
        .map(|(expr, alias)| Ok((Attribute::new(alias.clone()), infer_type(expr, input, id)?)))
        .collect()
}

fn infer_type(expr: &Expression, input: &Columns, id: &Identifier) -> Result<SqlType> {
    match expr {
        Expression::Attribute(att) => input
            .iter()
            .find(|(a, _)| a.name == att.name)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| {
                CompilerError::InvalidPlan(format!(
                    "operator {id} references unknown attribute {}",
                    att.name
                ))
            }),
        Expression::Literal(Literal::Int(_)) => Ok(SqlType::Integer),
        Expression::Literal(Literal::Decimal(_)) => Ok(SqlType::Decimal),
        Expression::Literal(Literal::Varchar(_)) => Ok(SqlType::Varchar),
        Expression::Aggregation { func, arg } => match func {
            AggFunc::Count => Ok(SqlType::Integer),
            AggFunc::Avg => Ok(SqlType::Decimal),
            AggFunc::Sum | AggFunc::Min | AggFunc::Max => infer_type(arg, input, id),
        },
        Expression::Binary { left, .. } => infer_type(left, input, id),
    }
}

/// Marks every declared root's result for materialization; final outputs are
/// always persisted.
pub fn annotate_materialization(plan: &mut CompilePlan) -> Result<()> {
    for root in plan.root_ids().to_vec() {
        plan.operator_mut(&root)?.result_mut().materialize = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{annotate_materialization, build_results};
    use crate::operator::{
        AggregationOp, CompileOperator, OperatorKind, RenameOp, SqlUnaryOp, TableOp,
        TablePartition,
    };
    use crate::expr::{AggFunc, Expression};
    use crate::plan::CompilePlan;
    use crate::result::ResultDesc;
    use crate::tokens::SqlType;
    use quarry_common::{CompilerError, Identifier};

    fn scan(id: &str, alias: &str) -> CompileOperator {
        CompileOperator::new(
            id,
            OperatorKind::Table(TableOp {
                table: "R".to_string(),
                alias: alias.to_string(),
                columns: vec![
                    ("A".to_string(), SqlType::Integer),
                    ("B".to_string(), SqlType::Varchar),
                ],
                partitions: vec![TablePartition {
                    name: "R".to_string(),
                    uris: vec![],
                }],
            }),
        )
    }

    #[test]
    fn table_columns_are_alias_prefixed_and_namespaced() {
        let mut plan = CompilePlan::new();
        plan.add_operator(scan("T", "R1"));
        plan.add_root("T");
        plan.link_parents().unwrap();
        build_results(&mut plan).unwrap();

        let result = plan.operator(&Identifier::new("T")).unwrap().result().clone();
        let names: Vec<_> = result.attributes().iter().map(|a| a.to_sql()).collect();
        assert_eq!(names, vec!["T.R1_A", "T.R1_B"]);
        assert_eq!(result.types(), &[SqlType::Integer, SqlType::Varchar]);
    }

    #[test]
    fn aggregation_infers_alias_types() {
        let mut plan = CompilePlan::new();
        plan.add_operator(scan("T", "R1"));
        let mut agg = CompileOperator::with_children(
            "G",
            OperatorKind::Aggregation(AggregationOp {
                agg_exprs: vec![Expression::Aggregation {
                    func: AggFunc::Sum,
                    arg: Box::new(Expression::attr("T", "R1_A")),
                }],
                group_exprs: vec![Expression::attr("T", "R1_B")],
                aliases: vec!["S".to_string(), "G1".to_string()],
            }),
            vec![Identifier::new("T")],
        );
        agg.results = vec![ResultDesc::default()];
        plan.add_operator(agg);
        plan.add_root("G");
        plan.link_parents().unwrap();
        build_results(&mut plan).unwrap();

        let result = plan.operator(&Identifier::new("G")).unwrap().result().clone();
        let names: Vec<_> = result.attributes().iter().map(|a| a.to_sql()).collect();
        assert_eq!(names, vec!["G.S", "G.G1"]);
        assert_eq!(result.types(), &[SqlType::Integer, SqlType::Varchar]);
    }

    #[test]
    fn coarse_operators_error_without_mutation() {
        let mut plan = CompilePlan::new();
        plan.add_operator(scan("T", "R1"));
        let unary = CompileOperator::with_children(
            "U",
            OperatorKind::SqlUnary(SqlUnaryOp::seeded_from(&ResultDesc::default())),
            vec![Identifier::new("T")],
        );
        plan.add_operator(unary);
        plan.add_root("U");
        plan.link_parents().unwrap();

        let before = format!("{plan:?}");
        let err = build_results(&mut plan).unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedOperator { .. }));
        assert_eq!(before, format!("{plan:?}"), "plan must not be mutated");
    }

    #[test]
    fn rename_errors_in_result_builder() {
        let mut plan = CompilePlan::new();
        plan.add_operator(scan("T", "R1"));
        let rename = CompileOperator::with_children(
            "N",
            OperatorKind::Rename(RenameOp { aliases: vec![] }),
            vec![Identifier::new("T")],
        );
        plan.add_operator(rename);
        plan.add_root("N");
        plan.link_parents().unwrap();
        assert!(build_results(&mut plan).is_err());
    }

    #[test]
    fn roots_are_marked_materialized() {
        let mut plan = CompilePlan::new();
        plan.add_operator(scan("T", "R1"));
        plan.add_root("T");
        plan.link_parents().unwrap();
        annotate_materialization(&mut plan).unwrap();
        assert!(plan.operator(&Identifier::new("T")).unwrap().result().materialize);
    }
}
