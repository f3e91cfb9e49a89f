//! Per-operator output descriptions: schema, materialization, partitioning.

use crate::tokens::{Attribute, SqlType};
use quarry_common::{CompilerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How rows are distributed across destination partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    Hash,
}

impl PartitionMethod {
    fn keyword(&self) -> &'static str {
        match self {
            PartitionMethod::Hash => "HASH",
        }
    }
}

/// Repartitioning requirement computed upstream: redistribute the output by
/// `keys` into `count` destination partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepartitionSpec {
    pub method: PartitionMethod,
    pub keys: Vec<Attribute>,
    pub count: usize,
}

/// Partitioning of an operator's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDesc {
    /// Number of parallel slices of the output.
    pub count: usize,
    /// Whether downstream consumers need the output repartitioned.
    pub repartition: bool,
    /// Destination partitioning, present when `repartition` is set.
    pub spec: Option<RepartitionSpec>,
}

impl Default for PartitionDesc {
    fn default() -> Self {
        Self {
            count: 1,
            repartition: false,
            spec: None,
        }
    }
}

/// Output description of a compile operator: ordered attribute/type pairs,
/// a materialize flag, and the partition descriptor.
///
/// Attribute and type lists are index-aligned; their arity must match at all
/// times ([`ResultDesc::check_arity`]).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultDesc {
    attributes: Vec<Attribute>,
    types: Vec<SqlType>,
    pub materialize: bool,
    pub partition: PartitionDesc,
}

impl ResultDesc {
    /// Builds a description from aligned attribute/type pairs.
    pub fn new(columns: Vec<(Attribute, SqlType)>) -> Self {
        let mut desc = Self::default();
        for (att, ty) in columns {
            desc.push(att, ty);
        }
        desc
    }

    /// Appends one attribute/type pair.
    pub fn push(&mut self, attribute: Attribute, ty: SqlType) {
        self.attributes.push(attribute);
        self.types.push(ty);
    }

    /// Replaces the attribute/type columns, keeping materialize and
    /// partitioning untouched.
    pub fn set_columns(&mut self, columns: Vec<(Attribute, SqlType)>) {
        self.attributes.clear();
        self.types.clear();
        for (att, ty) in columns {
            self.push(att, ty);
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut [Attribute] {
        &mut self.attributes
    }

    pub fn types(&self) -> &[SqlType] {
        &self.types
    }

    /// Number of output partitions.
    pub fn partition_count(&self) -> usize {
        self.partition.count
    }

    /// Whether downstream consumers need this output repartitioned.
    pub fn repartition(&self) -> bool {
        self.partition.repartition
    }

    /// Destination partition count of the repartitioning, 1 when none.
    pub fn repartition_count(&self) -> usize {
        self.partition.spec.as_ref().map_or(1, |s| s.count)
    }

    /// Errors unless attribute and type arity match.
    pub fn check_arity(&self) -> Result<()> {
        if self.attributes.len() != self.types.len() {
            return Err(CompilerError::InvalidPlan(format!(
                "result arity mismatch: {} attributes vs {} types",
                self.attributes.len(),
                self.types.len()
            )));
        }
        Ok(())
    }

    /// Column-list DDL, e.g. `(R_A INT, R_B VARCHAR)`. With
    /// `include_intermediate_keys` the repartition key columns get a KEY
    /// clause appended.
    pub fn atts_ddl(&self, include_intermediate_keys: bool) -> String {
        let mut cols: Vec<String> = self
            .attributes
            .iter()
            .zip(self.types.iter())
            .map(|(att, ty)| format!("{} {}", att.name, ty.ddl()))
            .collect();
        if include_intermediate_keys {
            if let Some(spec) = &self.partition.spec {
                let keys: Vec<&str> = spec.keys.iter().map(|k| k.name.as_str()).collect();
                if !keys.is_empty() {
                    cols.push(format!("KEY ({})", keys.join(", ")));
                }
            }
        }
        format!("({})", cols.join(", "))
    }

    /// Repartition directive DDL, e.g. `PARTITION BY HASH(R_B) PARTITIONS 2`.
    pub fn repart_ddl(&self) -> Option<String> {
        let spec = self.partition.spec.as_ref()?;
        let keys: Vec<&str> = spec.keys.iter().map(|k| k.name.as_str()).collect();
        Some(format!(
            "PARTITION BY {}({}) PARTITIONS {}",
            spec.method.keyword(),
            keys.join(", "),
            spec.count
        ))
    }

    /// Applies an old-name → new-name substitution to every attribute,
    /// including repartition keys.
    pub fn rename_attributes(&mut self, renames: &BTreeMap<String, String>) -> bool {
        let mut renamed = false;
        for att in &mut self.attributes {
            renamed |= att.rename(renames);
        }
        if let Some(spec) = &mut self.partition.spec {
            for key in &mut spec.keys {
                renamed |= key.rename(renames);
            }
        }
        renamed
    }

    /// Re-qualifies every attribute with the owning operator's name.
    pub fn set_attribute_table(&mut self, table: &str) {
        for att in &mut self.attributes {
            att.set_table(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PartitionDesc, PartitionMethod, RepartitionSpec, ResultDesc};
    use crate::tokens::{Attribute, SqlType};

    fn desc() -> ResultDesc {
        let mut d = ResultDesc::new(vec![
            (Attribute::qualified("Op1", "R_A"), SqlType::Integer),
            (Attribute::qualified("Op1", "R_B"), SqlType::Varchar),
        ]);
        d.partition = PartitionDesc {
            count: 2,
            repartition: true,
            spec: Some(RepartitionSpec {
                method: PartitionMethod::Hash,
                keys: vec![Attribute::qualified("Op1", "R_B")],
                count: 2,
            }),
        };
        d
    }

    #[test]
    fn column_ddl_uses_bare_names() {
        assert_eq!(desc().atts_ddl(false), "(R_A INT, R_B VARCHAR)");
    }

    #[test]
    fn intermediate_keys_append_key_clause() {
        assert_eq!(
            desc().atts_ddl(true),
            "(R_A INT, R_B VARCHAR, KEY (R_B))"
        );
    }

    #[test]
    fn repartition_directive() {
        assert_eq!(
            desc().repart_ddl().unwrap(),
            "PARTITION BY HASH(R_B) PARTITIONS 2"
        );
    }
}
