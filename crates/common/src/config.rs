use serde::{Deserialize, Serialize};

/// Compiler configuration passed explicitly into code generation.
///
/// Generation is a pure function of (plan, stats, config, collaborators);
/// nothing reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Run the operator-combining passes before generation.
    pub optimize: bool,
    /// Simulation mode: skip combining and propagate cost estimates instead.
    pub simulation: bool,
    /// Include a KEY clause for repartition key columns in output DDL.
    pub include_intermediate_keys: bool,
    /// Pipeline cost factor applied to a split operator's own runtime during
    /// cost propagation.
    pub pipeline_cost_constant: f64,
    /// Reset the cost accumulator at each root instead of carrying it across
    /// the whole traversal.
    pub reset_cost_accumulator_per_root: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            simulation: false,
            include_intermediate_keys: false,
            pipeline_cost_constant: 1.0,
            reset_cost_accumulator_per_root: false,
        }
    }
}
