//! Physical plan model for the quarry plan compiler.
//!
//! Architecture role:
//! - defines [`TrackerOperator`], one schedulable unit of DDL/DML per
//!   (split operator, partition) pair
//! - defines [`TrackerPlan`], the operator set plus symmetric
//!   `sources`/`consumers` adjacency maps
//!
//! Every type carries an explicit serde schema so the plan can be produced
//! and consumed across independently implemented components; nothing relies
//! on native object-graph serialization.

pub mod operator;
pub mod plan;

pub use operator::{NamedDdl, OutTableDdl, TableDesc, TableSource, TrackerOperator};
pub use plan::TrackerPlan;
