//! The generated physical plan: tracker operators plus their dependency
//! graph.

use crate::operator::TrackerOperator;
use quarry_common::Identifier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Physical execution plan handed to the distributed runtime.
///
/// `sources[id]` lists the producers an operator depends on; `consumers[id]`
/// its dependents. The two maps are maintained symmetrically: a consumer must
/// not start before every operator in its `sources` entry has completed.
/// Enforcing that ordering is the runtime's job, not this crate's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerPlan {
    operators: BTreeMap<Identifier, TrackerOperator>,
    sources: BTreeMap<Identifier, BTreeSet<Identifier>>,
    consumers: BTreeMap<Identifier, BTreeSet<Identifier>>,
}

impl TrackerPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_operator(&mut self, op: TrackerOperator) {
        self.operators.insert(op.id.clone(), op);
    }

    pub fn operator(&self, id: &Identifier) -> Option<&TrackerOperator> {
        self.operators.get(id)
    }

    /// Operators in deterministic id order.
    pub fn operators(&self) -> impl Iterator<Item = &TrackerOperator> {
        self.operators.values()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Registers a producer → consumer dependency in both adjacency maps.
    pub fn add_dependency(&mut self, producer: &Identifier, consumer: &Identifier) {
        self.sources
            .entry(consumer.clone())
            .or_default()
            .insert(producer.clone());
        self.consumers
            .entry(producer.clone())
            .or_default()
            .insert(consumer.clone());
    }

    /// Producers `id` depends on.
    pub fn sources_of(&self, id: &Identifier) -> BTreeSet<Identifier> {
        self.sources.get(id).cloned().unwrap_or_default()
    }

    /// Consumers depending on `id`.
    pub fn consumers_of(&self, id: &Identifier) -> BTreeSet<Identifier> {
        self.consumers.get(id).cloned().unwrap_or_default()
    }

    /// Full sources adjacency map.
    pub fn sources(&self) -> &BTreeMap<Identifier, BTreeSet<Identifier>> {
        &self.sources
    }

    /// Full consumers adjacency map.
    pub fn consumers(&self) -> &BTreeMap<Identifier, BTreeSet<Identifier>> {
        &self.consumers
    }

    /// True when both adjacency maps describe the same edge set.
    pub fn is_symmetric(&self) -> bool {
        let forward = self
            .sources
            .iter()
            .flat_map(|(c, ps)| ps.iter().map(move |p| (p.clone(), c.clone())));
        let backward: BTreeSet<(Identifier, Identifier)> = self
            .consumers
            .iter()
            .flat_map(|(p, cs)| cs.iter().map(move |c| (p.clone(), c.clone())))
            .collect();
        let forward: BTreeSet<(Identifier, Identifier)> = forward.collect();
        forward == backward
    }
}

#[cfg(test)]
mod tests {
    use super::TrackerPlan;
    use crate::operator::TrackerOperator;
    use quarry_common::Identifier;

    #[test]
    fn dependencies_are_registered_symmetrically() {
        let mut plan = TrackerPlan::new();
        plan.add_operator(TrackerOperator::new(Identifier::new("Op1")));
        plan.add_operator(TrackerOperator::new(Identifier::new("Op2")));
        plan.add_dependency(&Identifier::new("Op1"), &Identifier::new("Op2"));

        assert!(plan.is_symmetric());
        assert!(plan
            .sources_of(&Identifier::new("Op2"))
            .contains(&Identifier::new("Op1")));
        assert!(plan
            .consumers_of(&Identifier::new("Op1"))
            .contains(&Identifier::new("Op2")));
    }
}
