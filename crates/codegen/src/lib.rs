//! Tracker-plan generation for the quarry plan compiler.
//!
//! Architecture role:
//! - orchestrates split-point analysis, the combine passes, connection
//!   annotation, attribute re-renaming, and simulation-mode cost propagation
//! - expands every split operator into one tracker operator per partition,
//!   synthesizing execute DML, input/output DDL (including repartitioning
//!   views), and the producer/consumer dependency graph
//!
//! Naming is the sole wire contract between producer and consumer: a
//! consumer recomputes its remote input table name purely from the
//! producer's operator id and partition index.

pub mod generator;

pub use generator::CodeGenerator;
