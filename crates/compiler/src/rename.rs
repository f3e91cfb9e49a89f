//! Restores human-readable attribute names before SQL synthesis.
//!
//! Upstream analysis disambiguates every source column as `ALIAS_COLUMN`
//! (e.g. `R1_A`). This pass collapses those names back to their original
//! column names consistently across each root's subtree, skipping any rename
//! that would make some operator's result ambiguous (self-joins expose the
//! same source column twice).

use crate::operator::OperatorKind;
use crate::plan::CompilePlan;
use quarry_common::{Identifier, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Runs the re-renaming pass for every root.
pub fn rerename_attributes(plan: &mut CompilePlan) -> Result<()> {
    for root in plan.root_ids().to_vec() {
        let mut subtree: Vec<Identifier> = Vec::new();
        let mut visited: BTreeSet<Identifier> = BTreeSet::new();
        collect_subtree(plan, &root, &mut visited, &mut subtree)?;

        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        for id in &subtree {
            if let OperatorKind::Table(table) = &plan.operator(id)?.kind {
                for (column, _) in &table.columns {
                    renames.insert(format!("{}_{column}", table.alias), column.clone());
                }
            }
        }

        prune_ambiguous(plan, &subtree, &mut renames)?;

        for id in &subtree {
            plan.operator_mut(id)?.rename_attributes(&renames);
        }
    }
    Ok(())
}

fn collect_subtree(
    plan: &CompilePlan,
    id: &Identifier,
    visited: &mut BTreeSet<Identifier>,
    out: &mut Vec<Identifier>,
) -> Result<()> {
    if !visited.insert(id.clone()) {
        return Ok(());
    }
    for child in plan.operator(id)?.children.clone() {
        collect_subtree(plan, &child, visited, out)?;
    }
    out.push(id.clone());
    Ok(())
}

/// Drops renames whose target would collide with another attribute in any
/// operator's post-rename result.
fn prune_ambiguous(
    plan: &CompilePlan,
    subtree: &[Identifier],
    renames: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut bad: BTreeSet<String> = BTreeSet::new();
    for id in subtree {
        let op = plan.operator(id)?;
        for result in &op.results {
            let mut targets: BTreeMap<&str, usize> = BTreeMap::new();
            for att in result.attributes() {
                let target = renames
                    .get(&att.name)
                    .map(String::as_str)
                    .unwrap_or(&att.name);
                *targets.entry(target).or_insert(0) += 1;
            }
            for att in result.attributes() {
                if let Some(target) = renames.get(&att.name) {
                    if targets.get(target.as_str()).copied().unwrap_or(0) > 1 {
                        bad.insert(att.name.clone());
                    }
                }
            }
        }
    }
    renames.retain(|old, _| !bad.contains(old));
    Ok(())
}
