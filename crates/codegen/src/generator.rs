//! Expands a compile plan into a partitioned tracker plan.

use quarry_common::{CompilerConfig, CompilerError, Identifier, Result, StringTemplate};
use quarry_compiler::{
    explain_plan, extract_split_ops, propagate_costs, rerename_attributes, run_combine_passes,
    CatalogConnectionAnnotator, CompileOperator, CompilePlan, ConnectionAnnotator, NoopTracer,
    OperatorKind, PlanStats, PlanTracer,
};
use quarry_tracker::{TableDesc, TrackerOperator, TrackerPlan};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use url::Url;

const OUT_SUFFIX: &str = "OUT";
const PART_PREFIX: &str = "P";

static DEFAULT_ANNOTATOR: CatalogConnectionAnnotator = CatalogConnectionAnnotator;
static DEFAULT_TRACER: NoopTracer = NoopTracer;

/// Generates a [`TrackerPlan`] from an analyzed [`CompilePlan`].
///
/// A generator instance carries per-invocation state (the split list and the
/// compile-operator → tracker-operator mapping) and is therefore consumed by
/// [`CodeGenerator::generate`]; build a fresh one per plan.
pub struct CodeGenerator<'a> {
    plan: CompilePlan,
    cfg: CompilerConfig,
    stats: PlanStats,
    annotator: &'a dyn ConnectionAnnotator,
    tracer: &'a dyn PlanTracer,

    tracker: TrackerPlan,
    split_ids: Vec<Identifier>,
    split_set: BTreeSet<Identifier>,
    op_to_tracker: BTreeMap<Identifier, Vec<Identifier>>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(plan: CompilePlan, cfg: CompilerConfig) -> Self {
        Self {
            plan,
            cfg,
            stats: PlanStats::new(),
            annotator: &DEFAULT_ANNOTATOR,
            tracer: &DEFAULT_TRACER,
            tracker: TrackerPlan::new(),
            split_ids: Vec::new(),
            split_set: BTreeSet::new(),
            op_to_tracker: BTreeMap::new(),
        }
    }

    /// Supplies cost statistics for simulation mode.
    pub fn with_stats(mut self, stats: PlanStats) -> Self {
        self.stats = stats;
        self
    }

    /// Replaces the connection-annotation pass.
    pub fn with_annotator(mut self, annotator: &'a dyn ConnectionAnnotator) -> Self {
        self.annotator = annotator;
        self
    }

    /// Attaches a phase tracer.
    pub fn with_tracer(mut self, tracer: &'a dyn PlanTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Runs the full generation pipeline and returns the tracker plan.
    ///
    /// Phase order: split-point analysis, combine passes (skipped in
    /// simulation mode or when optimization is off), connection annotation,
    /// attribute re-renaming, cost propagation (simulation mode only), then
    /// per-partition tracker expansion. The first error aborts; no partial
    /// plan is returned.
    pub fn generate(mut self) -> Result<TrackerPlan> {
        self.split_ids = extract_split_ops(&self.plan)?;
        self.split_set = self.split_ids.iter().cloned().collect();
        debug!(split_points = self.split_ids.len(), "extracted split points");

        if self.tracer.enabled() {
            self.tracer.trace("codegen-input", &explain_plan(&self.plan));
        }

        if !self.cfg.simulation && self.cfg.optimize {
            run_combine_passes(&mut self.plan, &self.split_ids, self.tracer)?;
        }

        self.annotator.annotate(&mut self.plan)?;
        rerename_attributes(&mut self.plan)?;

        if self.cfg.simulation {
            propagate_costs(&mut self.plan, &self.split_set, &self.stats, &self.cfg)?;
        }

        if self.tracer.enabled() {
            self.tracer.trace("codegen", &explain_plan(&self.plan));
        }

        self.gen_tracker_plan()?;
        if self.tracer.enabled() {
            self.tracer.trace("tracker-plan", &self.render_tracker_plan());
        }
        info!(
            operators = self.tracker.len(),
            split_points = self.split_ids.len(),
            "generated tracker plan"
        );
        Ok(self.tracker)
    }

    fn render_tracker_plan(&self) -> String {
        let mut out = String::new();
        for op in self.tracker.operators() {
            let sources: Vec<String> = self
                .tracker
                .sources_of(&op.id)
                .iter()
                .map(|s| s.to_string())
                .collect();
            out.push_str(&format!(
                "{} executes={} sources=[{}]\n",
                op.id,
                op.execute.len(),
                sources.join(", ")
            ));
        }
        out
    }

    // -----------------------------
    // Naming
    // -----------------------------

    /// Output table name: operator id + OUT.
    fn out_table_name(op_id: &Identifier) -> Identifier {
        op_id.appended(OUT_SUFFIX)
    }

    /// Per-partition output name: operator id + P{n} + OUT.
    fn out_table_name_part(op_id: &Identifier, partition: usize) -> Identifier {
        op_id
            .appended(format!("{PART_PREFIX}{partition}"))
            .appended(OUT_SUFFIX)
    }

    /// Tracker operator id for one partition of a split operator.
    fn tracker_op_id(split_id: &Identifier, partitions: usize, partition: usize) -> Identifier {
        if partitions > 1 {
            split_id.appended(format!("{PART_PREFIX}{partition}"))
        } else {
            split_id.clone()
        }
    }

    // -----------------------------
    // Expansion
    // -----------------------------

    fn gen_tracker_plan(&mut self) -> Result<()> {
        for split_id in self.split_ids.clone() {
            let split_op = self.plan.operator(&split_id)?.clone();
            let partitions = split_op.result().partition_count();
            for partition in 0..partitions {
                let tracker_id = Self::tracker_op_id(&split_id, partitions, partition);
                let mut op = TrackerOperator::new(tracker_id.clone());
                op.runtime = split_op.runtime;
                op.mattime = split_op.mattime;

                self.add_execute_dml(&mut op, &split_op)?;
                self.add_output_ddl(&mut op, &split_op, partition)?;
                self.add_input_ddl(&mut op, &split_op, partition)?;
                op.connections = split_op.wished_connections(partition).to_vec();

                self.tracker.add_operator(op);
                self.op_to_tracker
                    .entry(split_id.clone())
                    .or_default()
                    .push(tracker_id);
            }
        }
        Ok(())
    }

    /// Renders the split operator's SQL, inlining every non-split child as a
    /// subquery (base tables inline as their local table name), and wraps it
    /// as an INSERT into the output table.
    fn add_execute_dml(&self, tracker_op: &mut TrackerOperator, op: &CompileOperator) -> Result<()> {
        let rendered = if op.is_table() {
            format!("SELECT * FROM {}", op.id)
        } else {
            self.render_sql(op)?
        };
        let out_name = Self::out_table_name(&op.id);
        tracker_op.add_execute(format!("INSERT INTO {out_name} ({rendered})"));
        Ok(())
    }

    fn render_sql(&self, op: &CompileOperator) -> Result<String> {
        let template = StringTemplate::new(op.sql_text()?);
        let mut args: BTreeMap<String, String> = BTreeMap::new();
        for child_id in &op.children {
            if self.split_set.contains(child_id) {
                // Recursion stops here; the unresolved placeholder falls back
                // to the child id, which names the local input table.
                continue;
            }
            let child = self.plan.operator(child_id)?;
            let child_sql = self.render_sql(child)?;
            let child_sql = if child.is_table() {
                child_sql
            } else {
                format!("({child_sql})")
            };
            args.insert(child_id.to_string(), child_sql);
        }
        Ok(template.resolve(&args))
    }

    /// Emits the output table DDL, plus the repartition directive and
    /// per-destination filter views when the result is repartitioned.
    fn add_output_ddl(
        &self,
        tracker_op: &mut TrackerOperator,
        op: &CompileOperator,
        partition: usize,
    ) -> Result<()> {
        let result = op.result();
        let out_name = Self::out_table_name(&op.id);
        let ddl = format!(
            "CREATE TABLE {out_name} {}",
            result.atts_ddl(self.cfg.include_intermediate_keys)
        );

        if result.repartition() && result.repartition_count() > 1 {
            tracker_op.add_out_table(out_name.to_string(), ddl, result.repart_ddl());
            for dest in 0..result.partition_count() {
                let view_name =
                    Self::out_table_name_part(&op.id, partition).appended(dest.to_string());
                tracker_op.add_out_view(
                    view_name.to_string(),
                    format!(
                        "CREATE VIEW {view_name} AS SELECT * FROM {out_name} PARTITION(P{dest})"
                    ),
                );
            }
        } else {
            tracker_op.add_out_table(out_name.to_string(), ddl, None);
        }
        Ok(())
    }

    /// Emits local input table/view DDL for every boundary operator feeding
    /// the split operator and binds each local name to its physical source,
    /// registering dependency edges for tracker-produced inputs.
    fn add_input_ddl(
        &mut self,
        tracker_op: &mut TrackerOperator,
        op: &CompileOperator,
        partition: usize,
    ) -> Result<()> {
        for input_id in self.collect_input_ops(op)? {
            let input_op = self.plan.operator(&input_id)?.clone();
            let input_result = input_op.result();
            let local_name = input_id.to_string();
            let atts = input_result.atts_ddl(false);

            if input_result.repartition() {
                // Fan-in: one local table per source partition plus a union
                // view under the canonical local name.
                let mut selects = Vec::with_capacity(input_result.partition_count());
                for src in 0..input_result.partition_count() {
                    let part_name = input_id.appended(src.to_string());
                    tracker_op
                        .add_in_table(part_name.to_string(), format!("CREATE TABLE {part_name} {atts}"));
                    selects.push(format!("(SELECT * FROM {part_name})"));
                }
                tracker_op.add_in_view(
                    local_name.clone(),
                    format!("CREATE VIEW {local_name} AS {}", selects.join(" UNION ")),
                );
            } else {
                tracker_op.add_in_table(local_name.clone(), format!("CREATE TABLE {local_name} {atts}"));
            }

            match &input_op.kind {
                OperatorKind::Table(table) => {
                    let remote = if table.is_partitioned() {
                        table.partition_name(partition).to_string()
                    } else {
                        table.table.clone()
                    };
                    let uris = table
                        .partition_uris(partition)
                        .iter()
                        .map(|uri| {
                            Url::parse(uri).map_err(|e| {
                                CompilerError::Generic(format!(
                                    "invalid location {uri} for table {remote}: {e}"
                                ))
                            })
                        })
                        .collect::<Result<Vec<Url>>>()?;
                    tracker_op.bind_source(local_name, TableDesc::federated(remote, uris));
                }
                _ => {
                    let producers = self.op_to_tracker.get(&input_id).ok_or_else(|| {
                        CompilerError::Generic(format!(
                            "input {input_id} has no generated tracker operators"
                        ))
                    })?;
                    if input_result.repartition() {
                        // One binding per source partition; fan-out selects
                        // this consumer's destination view on each producer.
                        for (src, producer_id) in producers.iter().enumerate() {
                            let remote_name = if input_result.repartition_count() > 1 {
                                Self::out_table_name_part(&input_id, src)
                                    .appended(partition.to_string())
                            } else {
                                Self::out_table_name(&input_id)
                            };
                            let local_part = input_id.appended(src.to_string());
                            tracker_op.bind_source(
                                local_part.to_string(),
                                TableDesc::tracker(remote_name.to_string(), producer_id.clone()),
                            );
                            self.tracker.add_dependency(producer_id, &tracker_op.id);
                        }
                    } else {
                        let idx = if input_result.partition_count() > 1 {
                            partition
                        } else {
                            0
                        };
                        let producer_id = producers.get(idx).ok_or_else(|| {
                            CompilerError::Generic(format!(
                                "input {input_id} has no tracker operator for partition {idx}"
                            ))
                        })?;
                        let remote_name = Self::out_table_name(&input_id);
                        tracker_op.bind_source(
                            local_name,
                            TableDesc::tracker(remote_name.to_string(), producer_id.clone()),
                        );
                        self.tracker.add_dependency(producer_id, &tracker_op.id);
                    }
                }
            }
        }
        Ok(())
    }

    /// The set of "next materialized or base" operators below a split
    /// operator: walk down from its children, stopping at split points and
    /// leaves. A leaf split operator is its own input boundary.
    fn collect_input_ops(&self, op: &CompileOperator) -> Result<BTreeSet<Identifier>> {
        let mut inputs = BTreeSet::new();
        if op.is_leaf() {
            inputs.insert(op.id.clone());
            return Ok(inputs);
        }
        for child in &op.children {
            self.collect_inputs_into(child, &mut inputs)?;
        }
        Ok(inputs)
    }

    fn collect_inputs_into(
        &self,
        id: &Identifier,
        inputs: &mut BTreeSet<Identifier>,
    ) -> Result<()> {
        let op = self.plan.operator(id)?;
        if self.split_set.contains(id) || op.is_leaf() {
            inputs.insert(id.clone());
            return Ok(());
        }
        for child in &op.children {
            self.collect_inputs_into(child, inputs)?;
        }
        Ok(())
    }
}
