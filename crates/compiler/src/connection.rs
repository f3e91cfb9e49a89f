//! Connection descriptors and the connection-annotation seam.

use crate::operator::OperatorKind;
use crate::plan::CompilePlan;
use quarry_common::{CompilerError, Identifier, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// A compute-node connection an operator partition would like to run on.
///
/// Computed upstream and threaded through generation unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDesc {
    /// Connection name.
    pub name: String,
    /// Connection URL.
    pub url: String,
}

impl ConnectionDesc {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Assigns per-partition wished connections before code generation.
///
/// The real assignment policy lives outside this compiler; implementations
/// plug in here and the generator consumes the annotations verbatim.
pub trait ConnectionAnnotator {
    fn annotate(&self, plan: &mut CompilePlan) -> Result<()>;
}

/// Annotator that leaves existing annotations untouched.
#[derive(Debug, Default)]
pub struct NoopConnectionAnnotator;

impl ConnectionAnnotator for NoopConnectionAnnotator {
    fn annotate(&self, _plan: &mut CompilePlan) -> Result<()> {
        Ok(())
    }
}

/// Default annotator: base tables wish for the nodes hosting their partition
/// locations; every other operator unions its children's wishes per
/// partition index.
#[derive(Debug, Default)]
pub struct CatalogConnectionAnnotator;

impl ConnectionAnnotator for CatalogConnectionAnnotator {
    fn annotate(&self, plan: &mut CompilePlan) -> Result<()> {
        let mut order: Vec<Identifier> = Vec::new();
        let mut visited = std::collections::BTreeSet::new();
        for root in plan.root_ids().to_vec() {
            post_order(plan, &root, &mut visited, &mut order)?;
        }

        for id in order {
            let parts = plan.operator(&id)?.result().partition_count();
            let mut wished: Vec<Vec<ConnectionDesc>> = Vec::with_capacity(parts);
            let op = plan.operator(&id)?;
            match &op.kind {
                OperatorKind::Table(table) => {
                    for part in 0..parts {
                        let mut conns = Vec::new();
                        for uri in table.partition_uris(part) {
                            let url = Url::parse(uri).map_err(|e| {
                                CompilerError::Generic(format!(
                                    "invalid location {uri} for table {}: {e}",
                                    table.table
                                ))
                            })?;
                            let name = url.host_str().unwrap_or(uri).to_string();
                            if !conns.iter().any(|c: &ConnectionDesc| c.name == name) {
                                conns.push(ConnectionDesc::new(name, uri.clone()));
                            }
                        }
                        wished.push(conns);
                    }
                }
                _ => {
                    let children = op.children.clone();
                    for part in 0..parts {
                        let mut conns: Vec<ConnectionDesc> = Vec::new();
                        for child_id in &children {
                            let child = plan.operator(child_id)?;
                            let child_parts = child.result().partition_count();
                            let child_part = if part < child_parts { part } else { 0 };
                            for conn in child.wished_connections(child_part) {
                                if !conns.iter().any(|c| c.name == conn.name) {
                                    conns.push(conn.clone());
                                }
                            }
                        }
                        wished.push(conns);
                    }
                }
            }
            plan.operator_mut(&id)?.wished = wished;
        }
        Ok(())
    }
}

fn post_order(
    plan: &CompilePlan,
    id: &Identifier,
    visited: &mut std::collections::BTreeSet<Identifier>,
    order: &mut Vec<Identifier>,
) -> Result<()> {
    if !visited.insert(id.clone()) {
        return Ok(());
    }
    for child in plan.operator(id)?.children.clone() {
        post_order(plan, &child, visited, order)?;
    }
    order.push(id.clone());
    Ok(())
}
