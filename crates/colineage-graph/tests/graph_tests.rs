use colineage_core::{ObjectInfo, ObjectKind};
use colineage_graph::ObjectGraph;
use pretty_assertions::assert_eq;

fn object(name: &str, deps: &[&str]) -> ObjectInfo {
    let mut object = ObjectInfo::new(name, ObjectKind::View);
    for dep in deps {
        object.add_dependency(*dep);
    }
    object
}

fn corpus() -> Vec<ObjectInfo> {
    vec![
        object("dw.dbo.orders", &[]),
        object("dw.dbo.customers", &[]),
        object("dw.stg.stg_orders", &["dw.dbo.orders"]),
        object("dw.stg.stg_customers", &["dw.dbo.customers"]),
        object("dw.mart.fct_sales", &["dw.stg.stg_orders", "dw.stg.stg_customers"]),
        object("dw.mart.sales_analytics", &["dw.mart.fct_sales", "dw.ext.calendar"]),
        object("dw.mart.loop_a", &["dw.mart.loop_b"]),
        object("dw.mart.loop_b", &["dw.mart.loop_a", "dw.dbo.orders"]),
    ]
}

#[test]
fn order_is_independent_of_input_order() {
    let forward = ObjectGraph::build(&corpus());

    let mut shuffled = corpus();
    shuffled.reverse();
    shuffled.swap(1, 5);
    let backward = ObjectGraph::build(&shuffled);

    assert_eq!(forward.topological_order(), backward.topological_order());
    assert_eq!(forward.removed_edges(), backward.removed_edges());
}

#[test]
fn every_dependency_precedes_its_dependent() {
    let graph = ObjectGraph::build(&corpus());
    let order = graph.topological_order();
    assert_eq!(order.len(), 8);

    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    for name in order {
        for dependency in graph.dependencies(name) {
            assert!(position(dependency) < position(name), "{} before {}", dependency, name);
        }
    }
}

#[test]
fn cycle_edge_into_smallest_name_is_removed() {
    let graph = ObjectGraph::build(&corpus());
    assert_eq!(
        graph.removed_edges(),
        [("dw.mart.loop_b".to_string(), "dw.mart.loop_a".to_string())]
    );
    assert_eq!(graph.external_dependencies("dw.mart.sales_analytics"), vec!["dw.ext.calendar"]);
}

#[test]
fn blast_radius() {
    let graph = ObjectGraph::build(&corpus());
    assert_eq!(
        graph.downstream("dw.dbo.orders"),
        vec![
            "dw.mart.loop_b",
            "dw.stg.stg_orders",
            "dw.mart.loop_a",
            "dw.mart.fct_sales",
            "dw.mart.sales_analytics",
        ]
    );
    assert!(graph.has_path("dw.dbo.customers", "dw.mart.sales_analytics"));
    assert!(!graph.has_path("dw.mart.sales_analytics", "dw.dbo.customers"));
}
