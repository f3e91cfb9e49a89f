//! Runtime-cost propagation for simulation mode.

use crate::plan::CompilePlan;
use quarry_common::{CompilerConfig, Identifier, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Externally measured per-operator cost statistics, keyed by operator id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanStats {
    pub runtimes: BTreeMap<Identifier, f64>,
    pub mattimes: BTreeMap<Identifier, f64>,
}

impl PlanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, id: impl Into<Identifier>, runtime: f64) -> Self {
        self.runtimes.insert(id.into(), runtime);
        self
    }

    pub fn with_mattime(mut self, id: impl Into<Identifier>, mattime: f64) -> Self {
        self.mattimes.insert(id.into(), mattime);
        self
    }
}

/// Propagates measured costs onto split operators.
///
/// Walks each root post-order with an explicitly threaded accumulator: every
/// non-split operator adds its stat runtime; a split operator's runtime
/// becomes `accumulated + stat_runtime × pipeline constant`, its
/// materialization time comes from the stats, and the accumulator resets.
///
/// The accumulator is carried across sibling subtrees and across roots by
/// default, so cost attribution depends on traversal order; shared subtrees
/// are revisited once per parent. Set
/// `CompilerConfig::reset_cost_accumulator_per_root` to scope the
/// accumulation to each root.
pub fn propagate_costs(
    plan: &mut CompilePlan,
    split: &BTreeSet<Identifier>,
    stats: &PlanStats,
    cfg: &CompilerConfig,
) -> Result<()> {
    let mut acc = 0.0;
    for root in plan.root_ids().to_vec() {
        if cfg.reset_cost_accumulator_per_root {
            acc = 0.0;
        }
        acc = visit(plan, &root, split, stats, cfg, acc)?;
    }
    Ok(())
}

fn visit(
    plan: &mut CompilePlan,
    id: &Identifier,
    split: &BTreeSet<Identifier>,
    stats: &PlanStats,
    cfg: &CompilerConfig,
    mut acc: f64,
) -> Result<f64> {
    for child in plan.operator(id)?.children.clone() {
        acc = visit(plan, &child, split, stats, cfg, acc)?;
    }

    let stat_runtime = stats.runtimes.get(id).copied();
    if split.contains(id) {
        let mattime = stats.mattimes.get(id).copied().unwrap_or(0.0);
        let op = plan.operator_mut(id)?;
        op.runtime = acc + stat_runtime.unwrap_or(0.0) * cfg.pipeline_cost_constant;
        op.mattime = mattime;
        acc = 0.0;
    } else if let Some(runtime) = stat_runtime {
        acc += runtime;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::{propagate_costs, PlanStats};
    use crate::operator::{CompileOperator, OperatorKind, SelectionOp, TableOp, TablePartition};
    use crate::expr::{Expression, Literal};
    use crate::plan::CompilePlan;
    use crate::pred::Predicate;
    use quarry_common::{CompilerConfig, Identifier};
    use std::collections::BTreeSet;

    fn scan(id: &str) -> CompileOperator {
        CompileOperator::new(
            id,
            OperatorKind::Table(TableOp {
                table: "R".to_string(),
                alias: "R1".to_string(),
                columns: vec![],
                partitions: vec![TablePartition {
                    name: "R".to_string(),
                    uris: vec![],
                }],
            }),
        )
    }

    fn filter(id: &str, child: &str) -> CompileOperator {
        CompileOperator::with_children(
            id,
            OperatorKind::Selection(SelectionOp {
                predicate: Predicate::eq(
                    Expression::attr(child, "R1_A"),
                    Expression::Literal(Literal::Int(1)),
                ),
            }),
            vec![Identifier::new(child)],
        )
    }

    #[test]
    fn accumulates_into_split_and_resets() {
        let mut plan = CompilePlan::new();
        plan.add_operator(scan("T"));
        plan.add_operator(filter("F", "T"));
        plan.add_root("F");
        plan.link_parents().unwrap();

        let stats = PlanStats::new()
            .with_runtime("T", 2.0)
            .with_runtime("F", 3.0)
            .with_mattime("F", 7.0);
        let split: BTreeSet<Identifier> = [Identifier::new("F")].into_iter().collect();
        let cfg = CompilerConfig {
            pipeline_cost_constant: 2.0,
            ..CompilerConfig::default()
        };
        propagate_costs(&mut plan, &split, &stats, &cfg).unwrap();

        let f = plan.operator(&Identifier::new("F")).unwrap();
        assert_eq!(f.runtime, 2.0 + 3.0 * 2.0);
        assert_eq!(f.mattime, 7.0);
        // Non-split operators keep their estimates untouched.
        assert_eq!(plan.operator(&Identifier::new("T")).unwrap().runtime, 0.0);
    }

    #[test]
    fn accumulator_carries_across_roots_unless_reset() {
        let build = || {
            let mut plan = CompilePlan::new();
            plan.add_operator(scan("T1"));
            plan.add_operator(scan("T2"));
            plan.add_operator(filter("F2", "T2"));
            plan.add_root("T1");
            plan.add_root("F2");
            plan.link_parents().unwrap();
            plan
        };
        let stats = PlanStats::new()
            .with_runtime("T1", 5.0)
            .with_runtime("T2", 1.0)
            .with_runtime("F2", 1.0);
        // Only the second root is a split point; the first root's runtime
        // stays in the accumulator when it is carried across roots.
        let split: BTreeSet<Identifier> = [Identifier::new("F2")].into_iter().collect();

        let mut carried = build();
        propagate_costs(&mut carried, &split, &stats, &CompilerConfig::default()).unwrap();
        assert_eq!(
            carried.operator(&Identifier::new("F2")).unwrap().runtime,
            5.0 + 1.0 + 1.0
        );

        let mut scoped = build();
        let cfg = CompilerConfig {
            reset_cost_accumulator_per_root: true,
            ..CompilerConfig::default()
        };
        propagate_costs(&mut scoped, &split, &stats, &cfg).unwrap();
        assert_eq!(
            scoped.operator(&Identifier::new("F2")).unwrap().runtime,
            1.0 + 1.0
        );
    }
}
