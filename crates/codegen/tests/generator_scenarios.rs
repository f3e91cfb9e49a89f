use quarry_codegen::CodeGenerator;
use quarry_common::{CompilerConfig, Identifier};
use quarry_compiler::{
    build_results, CollectingTracer, CompileOperator, CompilePlan, Expression, Literal,
    OperatorKind, PartitionDesc, PartitionMethod, PlanStats, Predicate, RepartitionSpec,
    SelectionOp, TableOp, TablePartition,
};
use quarry_compiler::tokens::{Attribute, SqlType};
use quarry_tracker::TableSource;

fn scan(id: &str, alias: &str) -> CompileOperator {
    CompileOperator::new(
        id,
        OperatorKind::Table(TableOp {
            table: "R".to_string(),
            alias: alias.to_string(),
            columns: vec![
                ("A".to_string(), SqlType::Integer),
                ("B".to_string(), SqlType::Varchar),
            ],
            partitions: vec![TablePartition {
                name: "R".to_string(),
                uris: vec!["mysql://node1/xdb".to_string()],
            }],
        }),
    )
}

fn filter(id: &str, child: &str, column: &str) -> CompileOperator {
    CompileOperator::with_children(
        id,
        OperatorKind::Selection(SelectionOp {
            predicate: Predicate::eq(
                Expression::attr(child, column),
                Expression::Literal(Literal::Int(1)),
            ),
        }),
        vec![Identifier::new(child)],
    )
}

fn id(s: &str) -> Identifier {
    Identifier::new(s)
}

#[test]
fn scenario_a_single_table_scan_split() {
    let mut plan = CompilePlan::new();
    plan.add_operator(scan("R", "R1"));
    plan.add_root("R");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();

    let tracker = CodeGenerator::new(plan, CompilerConfig::default())
        .generate()
        .unwrap();

    assert_eq!(tracker.len(), 1);
    let op = tracker.operator(&id("R")).unwrap();
    assert_eq!(op.out_tables.len(), 1);
    assert_eq!(op.out_tables[0].name, "ROUT");
    assert_eq!(op.out_tables[0].ddl, "CREATE TABLE ROUT (A INT, B VARCHAR)");
    assert_eq!(op.execute, vec!["INSERT INTO ROUT (SELECT * FROM R)"]);

    // The scan reads its base table through a federated binding, not a
    // dependency on another tracker operator.
    let binding = op.sources.get("R").unwrap();
    assert_eq!(binding.table, "R");
    assert!(matches!(binding.source, TableSource::Federated { .. }));
    assert!(tracker.sources_of(&id("R")).is_empty());
}

#[test]
fn scenario_b_two_stage_pipeline() {
    let mut plan = CompilePlan::new();
    plan.add_operator(scan("Op1", "R1"));
    plan.add_operator(filter("Op2", "Op1", "R1_A"));
    plan.add_root("Op2");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();
    plan.operator_mut(&id("Op1")).unwrap().result_mut().materialize = true;

    let tracker = CodeGenerator::new(plan, CompilerConfig::default())
        .generate()
        .unwrap();

    assert_eq!(tracker.len(), 2);
    let producer = tracker.operator(&id("Op1")).unwrap();
    let consumer = tracker.operator(&id("Op2")).unwrap();

    // Producer output name and consumer input binding agree byte-for-byte.
    assert_eq!(producer.out_tables[0].name, "Op1OUT");
    let binding = consumer.sources.get("Op1").unwrap();
    assert_eq!(binding.table, producer.out_tables[0].name);
    assert_eq!(
        binding.source,
        TableSource::Tracker {
            operator: id("Op1")
        }
    );

    assert_eq!(
        tracker.sources_of(&id("Op2")),
        [id("Op1")].into_iter().collect()
    );
    assert_eq!(
        tracker.consumers_of(&id("Op1")),
        [id("Op2")].into_iter().collect()
    );
    assert!(tracker.is_symmetric());

    assert_eq!(
        consumer.execute,
        vec![
            "INSERT INTO Op2OUT (SELECT Op1.A AS A, Op1.B AS B \
             FROM Op1 AS Op1 WHERE Op1.A = 1)"
        ]
    );
    assert_eq!(
        consumer.in_tables[0].ddl,
        "CREATE TABLE Op1 (A INT, B VARCHAR)"
    );
}

fn repartitioned_plan() -> CompilePlan {
    let mut plan = CompilePlan::new();
    plan.add_operator(scan("T", "R1"));
    plan.add_operator(filter("C", "T", "R1_A"));
    plan.add_operator(filter("D", "C", "R1_B"));
    plan.add_root("D");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();

    let c = plan.operator_mut(&id("C")).unwrap();
    c.result_mut().materialize = true;
    c.result_mut().partition = PartitionDesc {
        count: 2,
        repartition: true,
        spec: Some(RepartitionSpec {
            method: PartitionMethod::Hash,
            keys: vec![Attribute::qualified("C", "R1_B")],
            count: 2,
        }),
    };
    plan
}

#[test]
fn scenario_c_repartitioned_fan_in() {
    let tracker = CodeGenerator::new(repartitioned_plan(), CompilerConfig::default())
        .generate()
        .unwrap();

    // 2 producer partitions + 1 consumer.
    assert_eq!(tracker.len(), 3);

    for (part, tracker_id) in ["CP0", "CP1"].iter().enumerate() {
        let producer = tracker.operator(&id(tracker_id)).unwrap();
        assert_eq!(producer.out_tables[0].name, "COUT");
        assert_eq!(
            producer.out_tables[0].repartition.as_deref(),
            Some("PARTITION BY HASH(B) PARTITIONS 2")
        );
        // Exactly one filter view per destination partition.
        assert_eq!(producer.out_views.len(), 2);
        assert_eq!(producer.out_views[0].name, format!("CP{part}OUT0"));
        assert_eq!(producer.out_views[1].name, format!("CP{part}OUT1"));
        assert_eq!(
            producer.out_views[0].ddl,
            format!("CREATE VIEW CP{part}OUT0 AS SELECT * FROM COUT PARTITION(P0)")
        );
    }

    let consumer = tracker.operator(&id("D")).unwrap();
    // One local input table per source partition, one union view over both.
    let in_names: Vec<_> = consumer.in_tables.iter().map(|t| t.name.clone()).collect();
    assert_eq!(in_names, vec!["C0", "C1"]);
    assert_eq!(consumer.in_views.len(), 1);
    assert_eq!(
        consumer.in_views[0].ddl,
        "CREATE VIEW C AS (SELECT * FROM C0) UNION (SELECT * FROM C1)"
    );

    // Each local partition table binds to the producer's destination view
    // for this consumer's partition.
    assert_eq!(consumer.sources.get("C0").unwrap().table, "CP0OUT0");
    assert_eq!(consumer.sources.get("C1").unwrap().table, "CP1OUT0");
    assert_eq!(
        tracker.sources_of(&id("D")),
        [id("CP0"), id("CP1")].into_iter().collect()
    );
    assert_eq!(
        tracker.consumers_of(&id("CP0")),
        [id("D")].into_iter().collect()
    );
    assert!(tracker.is_symmetric());
}

#[test]
fn tracker_count_equals_partition_count() {
    let mut plan = repartitioned_plan();
    let c = plan.operator_mut(&id("C")).unwrap();
    c.result_mut().partition.count = 3;
    if let Some(spec) = &mut c.result_mut().partition.spec {
        spec.count = 3;
    }

    let tracker = CodeGenerator::new(plan, CompilerConfig::default())
        .generate()
        .unwrap();
    let producers = tracker
        .operators()
        .filter(|op| op.id.as_str().starts_with("CP"))
        .count();
    assert_eq!(producers, 3);
}

#[test]
fn simulation_mode_skips_combining_and_propagates_costs() {
    let mut plan = CompilePlan::new();
    plan.add_operator(scan("T", "R1"));
    plan.add_operator(filter("F", "T", "R1_A"));
    plan.add_root("F");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();

    let cfg = CompilerConfig {
        simulation: true,
        pipeline_cost_constant: 2.0,
        ..CompilerConfig::default()
    };
    let stats = PlanStats::new()
        .with_runtime("T", 2.0)
        .with_runtime("F", 3.0)
        .with_mattime("F", 7.0);

    let tracker = CodeGenerator::new(plan, cfg)
        .with_stats(stats)
        .generate()
        .unwrap();

    assert_eq!(tracker.len(), 1);
    let op = tracker.operator(&id("F")).unwrap();
    assert_eq!(op.runtime, 2.0 + 3.0 * 2.0);
    assert_eq!(op.mattime, 7.0);

    // The fine-grained selection renders directly; no combined operator was
    // introduced.
    assert_eq!(
        op.execute,
        vec!["INSERT INTO FOUT (SELECT A, B FROM T AS T WHERE T.A = 1)"]
    );
}

#[test]
fn wished_connections_reach_tracker_operators() {
    let mut plan = CompilePlan::new();
    plan.add_operator(scan("T", "R1"));
    plan.add_operator(filter("F", "T", "R1_A"));
    plan.add_root("F");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();

    let tracker = CodeGenerator::new(plan, CompilerConfig::default())
        .generate()
        .unwrap();

    let op = tracker.operator(&id("F")).unwrap();
    assert_eq!(op.connections.len(), 1);
    assert_eq!(op.connections[0].name, "node1");
    assert_eq!(op.connections[0].url, "mysql://node1/xdb");
}

#[test]
fn malformed_table_location_is_a_generic_error() {
    let mut plan = CompilePlan::new();
    let mut table = scan("T", "R1");
    if let OperatorKind::Table(t) = &mut table.kind {
        t.partitions[0].uris = vec!["not a url".to_string()];
    }
    plan.add_operator(table);
    plan.add_root("T");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();

    let err = CodeGenerator::new(plan, CompilerConfig::default())
        .generate()
        .unwrap_err();
    assert!(err.to_string().contains("not a url"));
}

#[test]
fn tracer_receives_every_phase() {
    let mut plan = CompilePlan::new();
    plan.add_operator(scan("T", "R1"));
    plan.add_operator(filter("F", "T", "R1_A"));
    plan.add_root("F");
    plan.link_parents().unwrap();
    build_results(&mut plan).unwrap();

    let tracer = CollectingTracer::new();
    CodeGenerator::new(plan, CompilerConfig::default())
        .with_tracer(&tracer)
        .generate()
        .unwrap();

    let phases: Vec<String> = tracer.phases().into_iter().map(|(p, _)| p).collect();
    assert_eq!(
        phases,
        vec![
            "codegen-input",
            "phase1-combined-joins",
            "phase1-combined-unaries",
            "phase1-combined",
            "codegen",
            "tracker-plan"
        ]
    );
}
