//! One independently schedulable physical operator.

use quarry_common::Identifier;
use quarry_compiler::ConnectionDesc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Where a local input table's rows come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableSource {
    /// A physical base table outside the generated plan.
    Federated {
        /// Storage locations for the bound partition.
        uris: Vec<Url>,
    },
    /// Output of another tracker operator.
    Tracker {
        /// Producing tracker operator id.
        operator: Identifier,
    },
}

/// Binding of a local input table name to its physical source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDesc {
    /// Remote table name to read (catalog name or producer output name).
    pub table: String,
    /// Row source.
    pub source: TableSource,
}

impl TableDesc {
    /// Federated binding to a catalog base table.
    pub fn federated(table: impl Into<String>, uris: Vec<Url>) -> Self {
        Self {
            table: table.into(),
            source: TableSource::Federated { uris },
        }
    }

    /// Binding to another tracker operator's output.
    pub fn tracker(table: impl Into<String>, operator: Identifier) -> Self {
        Self {
            table: table.into(),
            source: TableSource::Tracker { operator },
        }
    }
}

/// A named DDL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedDdl {
    pub name: String,
    pub ddl: String,
}

/// An output table declaration with an optional repartition directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutTableDdl {
    pub name: String,
    pub ddl: String,
    pub repartition: Option<String>,
}

/// One physical unit of generated DDL/DML for one (split operator,
/// partition) pair.
///
/// The execution runtime opens the operator by creating its input and output
/// tables/views, runs the execute DML, and drops everything on close; this
/// crate only models the plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerOperator {
    /// Operator id, derived from the split operator id (partition-suffixed
    /// when the split operator has more than one partition).
    pub id: Identifier,
    /// Local input table DDL, in deterministic input order.
    pub in_tables: Vec<NamedDdl>,
    /// Local input union-view DDL for fan-in inputs.
    pub in_views: Vec<NamedDdl>,
    /// DML statements to execute.
    pub execute: Vec<String>,
    /// Output table DDL.
    pub out_tables: Vec<OutTableDdl>,
    /// Per-destination output filter-view DDL.
    pub out_views: Vec<NamedDdl>,
    /// Bindings from local input table names to their physical sources.
    pub sources: BTreeMap<String, TableDesc>,
    /// Wished connections for this partition.
    pub connections: Vec<ConnectionDesc>,
    /// Estimated runtime.
    pub runtime: f64,
    /// Estimated materialization time.
    pub mattime: f64,
}

impl TrackerOperator {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn add_in_table(&mut self, name: impl Into<String>, ddl: impl Into<String>) {
        self.in_tables.push(NamedDdl {
            name: name.into(),
            ddl: ddl.into(),
        });
    }

    pub fn add_in_view(&mut self, name: impl Into<String>, ddl: impl Into<String>) {
        self.in_views.push(NamedDdl {
            name: name.into(),
            ddl: ddl.into(),
        });
    }

    pub fn add_execute(&mut self, dml: impl Into<String>) {
        self.execute.push(dml.into());
    }

    pub fn add_out_table(
        &mut self,
        name: impl Into<String>,
        ddl: impl Into<String>,
        repartition: Option<String>,
    ) {
        self.out_tables.push(OutTableDdl {
            name: name.into(),
            ddl: ddl.into(),
            repartition,
        });
    }

    pub fn add_out_view(&mut self, name: impl Into<String>, ddl: impl Into<String>) {
        self.out_views.push(NamedDdl {
            name: name.into(),
            ddl: ddl.into(),
        });
    }

    /// Binds a local input table name to its physical source.
    pub fn bind_source(&mut self, local: impl Into<String>, desc: TableDesc) {
        self.sources.insert(local.into(), desc);
    }
}
