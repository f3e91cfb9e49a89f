//! Operator-combining passes run between split points before generation.
//!
//! Three passes run in fixed order for every split point, each re-rooted at
//! the (possibly replaced) split operator: join-combine, unary-combine, and
//! SQL-combine. Each pass preserves parent/child symmetry, stops at other
//! split points, and is idempotent: re-running a pass over an
//! already-combined subtree changes nothing.
//!
//! A coarse node always takes over the id, result, costs, and wished
//! connections of the top-most operator it replaces, so split ids stay valid
//! across replacement.

use crate::explain::{explain_plan, PlanTracer};
use crate::operator::{
    CompileOperator, JoinPair, OperatorKind, SelectionOp, SqlCombinedOp, SqlJoinOp, SqlUnaryOp,
};
use crate::plan::CompilePlan;
use crate::result::ResultDesc;
use quarry_common::{CompilerError, Identifier, Result};
use std::collections::BTreeSet;
use tracing::debug;

/// Runs the three combine passes for every split point, tracing the plan
/// after each pass when the tracer is enabled.
pub fn run_combine_passes(
    plan: &mut CompilePlan,
    split_ids: &[Identifier],
    tracer: &dyn PlanTracer,
) -> Result<()> {
    let split: BTreeSet<Identifier> = split_ids.iter().cloned().collect();
    for (i, split_id) in split_ids.iter().enumerate() {
        debug!(split = %split_id, "combining operators under split point");

        combine_joins(plan, &split, split_id)?;
        if tracer.enabled() {
            tracer.trace(&format!("phase{}-combined-joins", i + 1), &explain_plan(plan));
        }

        combine_unaries(plan, &split, split_id)?;
        if tracer.enabled() {
            tracer.trace(
                &format!("phase{}-combined-unaries", i + 1),
                &explain_plan(plan),
            );
        }

        combine_sql(plan, &split, split_id)?;
        if tracer.enabled() {
            tracer.trace(&format!("phase{}-combined", i + 1), &explain_plan(plan));
        }
    }
    Ok(())
}

fn dedup_parents(op: &mut CompileOperator) {
    let mut seen: BTreeSet<Identifier> = BTreeSet::new();
    op.parents.retain(|p| seen.insert(p.clone()));
}

// -----------------------------
// 1) Join-combine
// -----------------------------

/// Merges every chain of binary equi-joins under `root` into one multi-way
/// [`SqlJoinOp`], recording join-key pairs bottom-up.
pub fn combine_joins(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    root: &Identifier,
) -> Result<()> {
    join_walk(plan, split, root, root)
}

fn join_walk(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    root: &Identifier,
    id: &Identifier,
) -> Result<()> {
    if id != root && split.contains(id) {
        return Ok(());
    }
    let op = plan.operator(id)?;
    match &op.kind {
        OperatorKind::EquiJoin(_) => {
            let frontier = absorb_join_chain(plan, split, id)?;
            for child in frontier {
                join_walk(plan, split, root, &child)?;
            }
            Ok(())
        }
        _ => {
            for child in op.children.clone() {
                join_walk(plan, split, root, &child)?;
            }
            Ok(())
        }
    }
}

/// Collapses the maximal linear equi-join chain rooted at `top` into one
/// `SqlJoin` that reuses `top`'s id, and returns the frontier children.
fn absorb_join_chain(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    top: &Identifier,
) -> Result<Vec<Identifier>> {
    let mut absorbed: Vec<Identifier> = Vec::new();
    let mut pairs: Vec<JoinPair> = Vec::new();
    let mut frontier: Vec<Identifier> = Vec::new();
    collect_join_chain(plan, split, top, &mut absorbed, &mut pairs, &mut frontier)?;

    // Re-home pair keys that still reference absorbed joins to the frontier
    // child actually carrying the attribute.
    let absorbed_names: BTreeSet<String> =
        absorbed.iter().map(|id| id.to_string()).collect();
    for pair in &mut pairs {
        for att in [&mut pair.left, &mut pair.right] {
            let Some(table) = att.table.clone() else {
                continue;
            };
            if !absorbed_names.contains(&table) {
                continue;
            }
            let home = frontier
                .iter()
                .find(|f| {
                    plan.operator(f).is_ok_and(|c| {
                        c.result().attributes().iter().any(|a| a.name == att.name)
                    })
                })
                .cloned()
                .ok_or_else(|| {
                    CompilerError::Generic(format!(
                        "no combined join input carries attribute {}",
                        att.name
                    ))
                })?;
            att.set_table(home.to_string());
        }
    }

    let top_op = plan.operator(top)?.clone();
    let node = CompileOperator {
        id: top_op.id.clone(),
        children: frontier.clone(),
        parents: top_op.parents.clone(),
        results: top_op.results.clone(),
        runtime: top_op.runtime,
        mattime: top_op.mattime,
        wished: top_op.wished.clone(),
        kind: OperatorKind::SqlJoin(SqlJoinOp { pairs }),
    };
    for id in &absorbed {
        plan.remove_operator(id);
    }
    plan.add_operator(node);

    for child_id in &frontier {
        let child = plan.operator_mut(child_id)?;
        for a in &absorbed {
            child.replace_parent(a, top);
        }
        dedup_parents(child);
    }
    Ok(frontier)
}

fn collect_join_chain(
    plan: &CompilePlan,
    split: &BTreeSet<Identifier>,
    id: &Identifier,
    absorbed: &mut Vec<Identifier>,
    pairs: &mut Vec<JoinPair>,
    frontier: &mut Vec<Identifier>,
) -> Result<()> {
    let op = plan.operator(id)?;
    let OperatorKind::EquiJoin(join) = &op.kind else {
        return Err(CompilerError::unsupported(op.kind_name(), "join-combine chain"));
    };
    absorbed.push(id.clone());

    // Absorb at most one child join so the chain stays linear; a second join
    // child stays on the frontier and is combined as its own chain.
    let mut absorbed_children = 0;
    for child_id in op.children.clone() {
        let child = plan.operator(&child_id)?;
        let absorbable = matches!(child.kind, OperatorKind::EquiJoin(_))
            && !split.contains(&child_id)
            && child.parents.len() == 1
            && absorbed_children == 0;
        if absorbable {
            collect_join_chain(plan, split, &child_id, absorbed, pairs, frontier)?;
            absorbed_children += 1;
        } else if !frontier.contains(&child_id) {
            frontier.push(child_id);
        }
    }

    pairs.push(JoinPair {
        left: join.left.clone(),
        right: join.right.clone(),
    });
    Ok(())
}

// -----------------------------
// 2) Unary-combine
// -----------------------------

/// Merges every maximal chain of selection/projection/aggregation/rename
/// operators under `root` into [`SqlUnaryOp`] nodes.
pub fn combine_unaries(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    root: &Identifier,
) -> Result<()> {
    unary_walk(plan, split, root, root)
}

fn is_foldable(kind: &OperatorKind) -> bool {
    matches!(
        kind,
        OperatorKind::Selection(_)
            | OperatorKind::Projection(_)
            | OperatorKind::Aggregation(_)
            | OperatorKind::Rename(_)
    )
}

fn unary_walk(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    root: &Identifier,
    id: &Identifier,
) -> Result<()> {
    if id != root && split.contains(id) {
        return Ok(());
    }
    let op = plan.operator(id)?;
    if is_foldable(&op.kind) {
        let input = absorb_unary_chain(plan, split, id)?;
        return unary_walk(plan, split, root, &input);
    }
    for child in op.children.clone() {
        unary_walk(plan, split, root, &child)?;
    }
    Ok(())
}

/// Collapses the downward chain of foldable operators starting at `top` and
/// returns the id of the combined node's input.
fn absorb_unary_chain(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    top: &Identifier,
) -> Result<Identifier> {
    // Collect top-down, then fold bottom-up.
    let mut chain: Vec<Identifier> = vec![top.clone()];
    loop {
        let cur = plan.operator(chain.last().ok_or_else(|| {
            CompilerError::Generic("empty unary chain".to_string())
        })?)?;
        let child_id = match cur.children.as_slice() {
            [child] => child.clone(),
            _ => {
                return Err(CompilerError::InvalidPlan(format!(
                    "unary operator {} must have one child",
                    cur.id
                )))
            }
        };
        let child = plan.operator(&child_id)?;
        if split.contains(&child_id) || child.parents.len() != 1 || !is_foldable(&child.kind) {
            break;
        }
        chain.push(child_id);
    }

    let bottom = chain.last().cloned().unwrap_or_else(|| top.clone());
    let mut input = plan.operator(&bottom)?.children[0].clone();
    let input_result = plan.operator(&input)?.result().clone();

    let mut unary = SqlUnaryOp::seeded_from(&input_result);
    let mut folded: Vec<Identifier> = Vec::new();
    for op_id in chain.iter().rev() {
        let op = plan.operator(op_id)?;
        let accepted = fold_into_unary(&mut unary, op)?;
        if !accepted {
            // Fold-once limit hit: close the current combined node and stack
            // a fresh one above it.
            input = finalize_unary(plan, unary, &folded, &input)?;
            let stacked_result = plan.operator(&input)?.result().clone();
            unary = SqlUnaryOp::seeded_from(&stacked_result);
            folded.clear();
            let op = plan.operator(op_id)?;
            if !fold_into_unary(&mut unary, op)? {
                return Err(CompilerError::Generic(format!(
                    "operator {op_id} rejected by a fresh combined unary"
                )));
            }
        }
        folded.push(op_id.clone());
    }
    finalize_unary(plan, unary, &folded, &input)?;
    Ok(input)
}

fn fold_into_unary(unary: &mut SqlUnaryOp, op: &CompileOperator) -> Result<bool> {
    match &op.kind {
        OperatorKind::Selection(s) => Ok(add_selection(unary, s)),
        OperatorKind::Projection(p) => Ok(add_projection(unary, p, op.result())),
        OperatorKind::Aggregation(a) => Ok(add_aggregation(unary, a, op.result())?),
        OperatorKind::Rename(r) => add_rename(unary, r).map(|()| true),
        _ => Err(CompilerError::unsupported(op.kind_name(), "unary-combine fold")),
    }
}

fn add_selection(unary: &mut SqlUnaryOp, op: &SelectionOp) -> bool {
    if unary.folded_selection {
        return false;
    }
    unary.folded_selection = true;
    unary.folded_ops += 1;

    let pred = op.predicate.clone().replace_attributes(&unary.replace_map);
    // A selection folded after an aggregation filters groups, not rows.
    if unary.where_pred.is_some() || !unary.agg_exprs.is_empty() {
        unary.having_pred = Some(pred);
    } else {
        unary.where_pred = Some(pred);
    }
    true
}

fn add_projection(
    unary: &mut SqlUnaryOp,
    op: &crate::operator::ProjectionOp,
    result: &ResultDesc,
) -> bool {
    if unary.folded_projection {
        return false;
    }
    unary.folded_projection = true;
    unary.folded_ops += 1;

    unary.select_exprs.clear();
    unary.select_aliases.clear();
    let mut new_map = std::collections::BTreeMap::new();
    for (expr, att) in op.exprs.iter().zip(result.attributes()) {
        let alias = att.name.clone();
        let new_expr = expr.clone().replace_attributes(&unary.replace_map);
        unary.select_aliases.push(alias.clone());
        unary.select_exprs.push(new_expr.clone());
        new_map.insert(alias, new_expr);
    }
    unary.replace_map = new_map;
    true
}

fn add_aggregation(
    unary: &mut SqlUnaryOp,
    op: &crate::operator::AggregationOp,
    result: &ResultDesc,
) -> Result<bool> {
    if unary.folded_aggregation {
        return Ok(false);
    }
    let atts = result.attributes();
    if atts.len() != op.agg_exprs.len() + op.group_exprs.len() {
        return Err(CompilerError::InvalidPlan(format!(
            "aggregation result arity {} does not cover {} aggregate and {} group expressions",
            atts.len(),
            op.agg_exprs.len(),
            op.group_exprs.len()
        )));
    }
    unary.folded_aggregation = true;
    unary.folded_ops += 1;

    unary.select_exprs.clear();
    unary.select_aliases.clear();
    let mut new_map = std::collections::BTreeMap::new();
    for (i, expr) in op.agg_exprs.iter().enumerate() {
        let alias = atts[i].name.clone();
        let new_expr = expr.clone().replace_attributes(&unary.replace_map);
        unary.select_aliases.push(alias.clone());
        unary.agg_exprs.push(new_expr.clone());
        new_map.insert(alias, new_expr);
    }
    for (j, expr) in op.group_exprs.iter().enumerate() {
        let alias = atts[op.agg_exprs.len() + j].name.clone();
        let new_expr = expr.clone().replace_attributes(&unary.replace_map);
        unary.select_aliases.push(alias.clone());
        unary.group_exprs.push(new_expr.clone());
        new_map.insert(alias, new_expr);
    }
    unary.replace_map = new_map;
    Ok(true)
}

fn add_rename(unary: &mut SqlUnaryOp, op: &crate::operator::RenameOp) -> Result<()> {
    unary.folded_ops += 1;

    let mut new_aliases = Vec::with_capacity(op.aliases.len());
    let mut new_map = std::collections::BTreeMap::new();
    for (old, new) in &op.aliases {
        let expr = unary.replace_map.get(old).cloned().ok_or_else(|| {
            CompilerError::InvalidPlan(format!("rename references unknown alias {old}"))
        })?;
        new_aliases.push(new.clone());
        new_map.insert(new.clone(), expr);
    }
    unary.select_aliases = new_aliases;
    unary.replace_map = new_map;
    Ok(())
}

fn finalize_unary(
    plan: &mut CompilePlan,
    unary: SqlUnaryOp,
    folded: &[Identifier],
    input: &Identifier,
) -> Result<Identifier> {
    let top_id = folded.last().ok_or_else(|| {
        CompilerError::Generic("combined unary folded no operators".to_string())
    })?;
    let bottom_id = &folded[0];
    let top = plan.operator(top_id)?.clone();

    let node = CompileOperator {
        id: top.id.clone(),
        children: vec![input.clone()],
        parents: top.parents.clone(),
        results: top.results.clone(),
        runtime: top.runtime,
        mattime: top.mattime,
        wished: top.wished.clone(),
        kind: OperatorKind::SqlUnary(unary),
    };
    for id in folded {
        plan.remove_operator(id);
    }
    plan.add_operator(node);

    let input_op = plan.operator_mut(input)?;
    input_op.replace_parent(bottom_id, top_id);
    dedup_parents(input_op);
    Ok(top_id.clone())
}

// -----------------------------
// 3) SQL-combine
// -----------------------------

/// Fuses `SqlUnary` → `SqlJoin` (plus single-parent selections directly
/// beneath the join) sandwiches under `root` into [`SqlCombinedOp`] nodes.
pub fn combine_sql(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    root: &Identifier,
) -> Result<()> {
    sql_walk(plan, split, root, root)
}

fn sql_walk(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    root: &Identifier,
    id: &Identifier,
) -> Result<()> {
    if id != root && split.contains(id) {
        return Ok(());
    }
    let op = plan.operator(id)?;
    if let OperatorKind::SqlUnary(_) = &op.kind {
        if let [child_id] = op.children.as_slice() {
            let child_id = child_id.clone();
            let child = plan.operator(&child_id)?;
            if matches!(child.kind, OperatorKind::SqlJoin(_))
                && !split.contains(&child_id)
                && child.parents.len() == 1
            {
                let children = fuse_combined(plan, split, Some(id), &child_id)?;
                for grand in children {
                    sql_walk(plan, split, root, &grand)?;
                }
                return Ok(());
            }
        }
    }
    for child in op.children.clone() {
        sql_walk(plan, split, root, &child)?;
    }
    Ok(())
}

/// Builds the fused `SqlCombined` node and re-homes all links; returns the
/// fused node's children.
fn fuse_combined(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    unary_id: Option<&Identifier>,
    join_id: &Identifier,
) -> Result<Vec<Identifier>> {
    let join = plan.operator(join_id)?.clone();
    let OperatorKind::SqlJoin(join_kind) = &join.kind else {
        return Err(CompilerError::unsupported(join.kind_name(), "sql-combine fuse"));
    };
    let fused_id = unary_id.unwrap_or(join_id).clone();

    // Absorb single-parent selections directly beneath the join: their
    // predicates move into the WHERE conjunction and the join reads the
    // selection inputs directly.
    let mut pairs = join_kind.pairs.clone();
    let mut where_preds = Vec::new();
    let mut children: Vec<Identifier> = Vec::new();
    let mut removed: Vec<Identifier> = Vec::new();
    for child_id in &join.children {
        let child = plan.operator(child_id)?;
        let absorbable = matches!(child.kind, OperatorKind::Selection(_))
            && !split.contains(child_id)
            && child.parents.len() == 1
            && child.children.len() == 1;
        if absorbable {
            let grand = child.children[0].clone();
            if let OperatorKind::Selection(sel) = &child.kind {
                where_preds.push(sel.predicate.clone());
            }
            for pair in &mut pairs {
                pair.left.rename_table(child_id.as_str(), grand.as_str());
                pair.right.rename_table(child_id.as_str(), grand.as_str());
            }
            removed.push(child_id.clone());
            children.push(grand);
        } else {
            children.push(child_id.clone());
        }
    }

    // Relocate the enclosing unary's clauses.
    let mut select_exprs = Vec::new();
    let mut select_aliases = Vec::new();
    let mut having_pred = None;
    let mut group_exprs = Vec::new();
    let top = match unary_id {
        Some(uid) => {
            let unary_op = plan.operator(uid)?.clone();
            let OperatorKind::SqlUnary(unary) = &unary_op.kind else {
                return Err(CompilerError::unsupported(
                    unary_op.kind_name(),
                    "sql-combine merge",
                ));
            };
            select_exprs = unary.effective_select().into_iter().cloned().collect();
            select_aliases = unary.select_aliases.clone();
            if let Some(p) = &unary.where_pred {
                where_preds.push(p.clone());
            }
            having_pred = unary.having_pred.clone();
            group_exprs = unary.group_exprs.clone();
            unary_op
        }
        None => join.clone(),
    };

    // The fused FROM clause aliases the frontier tables directly; relocated
    // clauses lose their now-dangling qualifiers.
    for e in select_exprs.iter_mut().chain(group_exprs.iter_mut()) {
        e.strip_tables();
    }
    for p in &mut where_preds {
        p.strip_tables();
    }
    if let Some(p) = &mut having_pred {
        p.strip_tables();
    }

    let node = CompileOperator {
        id: fused_id.clone(),
        children: children.clone(),
        parents: top.parents.clone(),
        results: top.results.clone(),
        runtime: top.runtime,
        mattime: top.mattime,
        wished: top.wished.clone(),
        kind: OperatorKind::SqlCombined(SqlCombinedOp {
            pairs,
            select_exprs,
            select_aliases,
            where_preds,
            having_pred,
            group_exprs,
        }),
    };

    plan.remove_operator(join_id);
    if let Some(uid) = unary_id {
        plan.remove_operator(uid);
    }
    for id in &removed {
        plan.remove_operator(id);
    }
    plan.add_operator(node);

    for child_id in &children {
        let child = plan.operator_mut(child_id)?;
        child.replace_parent(join_id, &fused_id);
        for r in &removed {
            child.replace_parent(r, &fused_id);
        }
        dedup_parents(child);
    }
    Ok(children)
}
