use colineage_core::{
    CatalogFile, ChangeSeverity, ChangeType, ColumnRef, Config, LogicalType, Nullability,
    TransformationKind,
};
use colineage_engine::{diff_dirs, DiffEngine, Pipeline, Snapshot};
use colineage_graph::Direction;
use colineage_sql::SourceUnit;
use pretty_assertions::assert_eq;

fn unit(name: &str, text: &str) -> SourceUnit {
    SourceUnit::new(name, text).with_path(format!("{}.sql", name))
}

fn run(units: &[SourceUnit]) -> Snapshot {
    Pipeline::new(Config::default()).run(units, &CatalogFile::default())
}

fn sales_corpus() -> Vec<SourceUnit> {
    vec![
        unit(
            "orders",
            "CREATE TABLE dbo.Orders (
                OrderID INT NOT NULL,
                CustomerID INT NOT NULL,
                Status VARCHAR(20) NULL,
                Amount DECIMAL(18,2) NOT NULL
            )",
        ),
        unit(
            "stg_orders",
            "CREATE VIEW dbo.stg_orders AS
             SELECT o.OrderID,
                    o.CustomerID,
                    o.Amount,
                    CASE WHEN o.Status = 'Shipped' THEN 1 ELSE 0 END AS IsFulfilled
             FROM dbo.Orders o",
        ),
        unit(
            "fct_sales",
            "CREATE VIEW dbo.fct_sales AS
             SELECT s.OrderID, s.CustomerID, s.IsFulfilled * s.Amount AS Revenue
             FROM dbo.stg_orders s",
        ),
        unit(
            "sales_analytics",
            "CREATE VIEW dbo.sales_analytics AS
             SELECT f.CustomerID,
                    SUM(f.Revenue) OVER (PARTITION BY f.CustomerID) AS CustomerTotalRevenue
             FROM dbo.fct_sales f",
        ),
    ]
}

#[test]
fn upstream_impact_reaches_order_status() {
    let snapshot = run(&sales_corpus());
    let edges = snapshot.impact("+sales_analytics.CustomerTotalRevenue", 10);

    let status = ColumnRef::new("warehouse.dbo.orders", "Status");
    let reached = edges
        .iter()
        .find(|e| e.from == status)
        .expect("path to Orders.Status");
    assert_eq!(reached.direction, Direction::Upstream);
    assert_eq!(reached.to, ColumnRef::new("warehouse.dbo.stg_orders", "IsFulfilled"));
    assert_eq!(reached.depth, 3);

    let first = &edges[0];
    assert_eq!(first.to, ColumnRef::new("warehouse.dbo.sales_analytics", "CustomerTotalRevenue"));
    assert_eq!(first.transformation, TransformationKind::Window);
}

#[test]
fn results_do_not_depend_on_input_order() {
    let mut units = sales_corpus();
    for i in 0..10 {
        units.push(unit(
            &format!("v_{}", i),
            &format!("CREATE VIEW dbo.v_{} AS SELECT o.OrderID, o.Amount * {} AS Scaled FROM dbo.Orders o", i, i + 1),
        ));
    }
    let forward = run(&units);

    units.reverse();
    units.swap(0, 7);
    let backward = run(&units);

    assert_eq!(forward.graph.topological_order(), backward.graph.topological_order());
    assert_eq!(forward.column_graph.fingerprint(), backward.column_graph.fingerprint());
    let order: Vec<&str> = forward.objects.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(order[0], "warehouse.dbo.orders");
}

#[test]
fn star_expands_in_declared_order() {
    let snapshot = run(&[
        unit("t", "CREATE TABLE dbo.T (A INT, B VARCHAR(10))"),
        unit("v", "CREATE VIEW dbo.v AS SELECT * FROM dbo.T"),
    ]);
    let view = snapshot.get("warehouse.dbo.v").unwrap();
    let columns: Vec<(&str, &LogicalType)> = view
        .schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), &c.logical_type))
        .collect();
    assert_eq!(
        columns,
        vec![("A", &LogicalType::Int), ("B", &LogicalType::varchar(10))]
    );
    assert!(view.star_sources.contains("warehouse.dbo.t"));
}

#[test]
fn outer_join_side_becomes_nullable() {
    let snapshot = run(&[
        unit("a", "CREATE TABLE dbo.A (id INT NOT NULL)"),
        unit("b", "CREATE TABLE dbo.B (id INT NOT NULL, x INT NOT NULL)"),
        unit(
            "v",
            "CREATE VIEW dbo.v AS SELECT a.id, b.x FROM dbo.A a LEFT JOIN dbo.B b ON a.id = b.id",
        ),
    ]);
    let view = snapshot.get("warehouse.dbo.v").unwrap();
    assert_eq!(view.schema.columns[0].nullable, Nullability::No);
    assert_eq!(view.schema.columns[1].nullable, Nullability::Yes);
}

#[test]
fn cast_type_wins_over_source_type() {
    let snapshot = run(&[
        unit("t", "CREATE TABLE dbo.T (x VARCHAR(30))"),
        unit("v", "CREATE VIEW dbo.v AS SELECT CAST(x AS DECIMAL(10,2)) AS amount FROM dbo.T"),
    ]);
    let view = snapshot.get("warehouse.dbo.v").unwrap();
    assert_eq!(view.schema.columns[0].logical_type, LogicalType::decimal(10, 2));
    assert_eq!(view.lineage[0].inputs[0].transformation, TransformationKind::Cast);
}

#[test]
fn join_only_table_is_a_resolved_dependency() {
    let snapshot = run(&[
        unit("orders", "CREATE TABLE dbo.orders (id INT, region_id INT)"),
        unit("regions", "CREATE TABLE dbo.regions (id INT, active BIT)"),
        unit(
            "v",
            "CREATE VIEW dbo.v AS
             SELECT o.id FROM dbo.orders o
             INNER JOIN dbo.regions r ON r.id = o.region_id AND r.active = 1",
        ),
    ]);
    let view = snapshot.get("warehouse.dbo.v").unwrap();
    assert!(view.dependencies.contains("warehouse.dbo.regions"));
    assert!(snapshot.graph.has_path("warehouse.dbo.regions", "warehouse.dbo.v"));
    assert!(view.diagnostics.is_empty(), "{:?}", view.diagnostics);
}

#[test]
fn temp_tables_resolve_inside_their_procedure() {
    let snapshot = run(&[
        unit("orders", "CREATE TABLE dbo.orders (id INT NOT NULL, amount DECIMAL(10,2))"),
        unit(
            "load_sales",
            "CREATE PROCEDURE dbo.load_sales AS
             BEGIN
                 SELECT o.id, o.amount INTO #stage FROM dbo.orders o;
                 SELECT s.id, s.amount FROM #stage s;
             END",
        ),
    ]);
    let stage = snapshot.get("warehouse.dbo.load_sales#stage").unwrap();
    assert_eq!(stage.schema.column_names(), vec!["id", "amount"]);

    let procedure = snapshot.get("warehouse.dbo.load_sales").unwrap();
    let amount = procedure.lineage_of("amount").unwrap();
    assert_eq!(
        amount.inputs[0].source,
        ColumnRef::new("warehouse.dbo.load_sales#stage", "amount")
    );
}

#[test]
fn diffing_a_snapshot_with_itself_is_clean() {
    let snapshot = run(&sales_corpus());
    let report = DiffEngine::default().compare(&snapshot, &snapshot);
    assert!(report.is_clean());
    assert_eq!(report.severity, None);
}

#[test]
fn narrowing_is_breaking() {
    let base = run(&[unit("fct", "CREATE TABLE dbo.fct (Revenue DECIMAL(18,2))")]);
    let head = run(&[unit("fct", "CREATE TABLE dbo.fct (Revenue INT)")]);
    let report = DiffEngine::default().compare(&base, &head);

    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].change_type, ChangeType::ColumnTypeChanged);
    assert_eq!(report.severity, Some(ChangeSeverity::Breaking));
}

#[test]
fn widening_is_non_breaking() {
    let base = run(&[unit("lines", "CREATE TABLE dbo.lines (UnitPrice DECIMAL(10,2))")]);
    let head = run(&[unit("lines", "CREATE TABLE dbo.lines (UnitPrice DECIMAL(12,2))")]);
    let report = DiffEngine::default().compare(&base, &head);

    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.severity, Some(ChangeSeverity::NonBreaking));
}

#[test]
fn rename_with_same_expression_is_detected() {
    let orders = unit("orders", "CREATE TABLE dbo.Orders (OrderID INT NOT NULL)");
    let base = run(&[
        orders.clone(),
        unit("v", "CREATE VIEW dbo.v AS SELECT o.OrderID FROM dbo.Orders o"),
    ]);
    let head = run(&[
        orders,
        unit("v", "CREATE VIEW dbo.v AS SELECT o.OrderID AS id FROM dbo.Orders o"),
    ]);
    let report = DiffEngine::default().compare(&base, &head);

    let types: Vec<ChangeType> = report.changes.iter().map(|c| c.change_type).collect();
    assert_eq!(types, vec![ChangeType::ColumnRenamed]);
    assert_eq!(report.severity, Some(ChangeSeverity::PotentiallyBreaking));
    assert_eq!(report.changes[0].column.as_deref(), Some("id"));
}

#[test]
fn removed_column_lists_downstream_impact() {
    let base = run(&sales_corpus());
    let mut head_units = sales_corpus();
    head_units[1] = unit(
        "stg_orders",
        "CREATE VIEW dbo.stg_orders AS
         SELECT o.OrderID, o.CustomerID, o.Amount
         FROM dbo.Orders o",
    );
    let head = run(&head_units);
    let report = DiffEngine::default().compare(&base, &head);

    let removed = report
        .changes
        .iter()
        .find(|c| c.change_type == ChangeType::ColumnRemoved)
        .expect("IsFulfilled removed");
    assert_eq!(removed.object, "warehouse.dbo.stg_orders");
    assert!(removed
        .impact
        .iter()
        .any(|c| c == "warehouse.dbo.sales_analytics.CustomerTotalRevenue"));
    assert_eq!(report.severity, Some(ChangeSeverity::Breaking));
}

#[test]
fn directories_round_trip_through_disk() {
    let base = tempfile::tempdir().unwrap();
    let head = tempfile::tempdir().unwrap();
    std::fs::write(base.path().join("fct.sql"), "CREATE TABLE dbo.fct (Revenue DECIMAL(18,2))").unwrap();
    std::fs::write(head.path().join("fct.sql"), "CREATE TABLE dbo.fct (Revenue INT)").unwrap();
    std::fs::write(head.path().join("notes.txt"), "not sql").unwrap();

    let config = Config::default();
    let report = diff_dirs(&config, base.path(), head.path()).unwrap();
    assert_eq!(report.severity, Some(ChangeSeverity::Breaking));

    let out = tempfile::tempdir().unwrap();
    let snapshot = Pipeline::new(config.clone()).run_dir(head.path()).unwrap();
    let written = snapshot.write(out.path(), &config).unwrap();
    assert_eq!(written, 1);
    assert!(out.path().join("warehouse.dbo.fct.json").exists());
    assert!(out.path().join("report.json").exists());
}

#[test]
fn missing_source_directory_is_an_error() {
    let pipeline = Pipeline::new(Config::default());
    assert!(pipeline.run_dir(std::path::Path::new("/nonexistent/colineage")).is_err());
}
