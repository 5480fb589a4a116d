//! Plan descriptions: parsing, rendering, choice handling and local execution.

mod common;

use sitewise_core::binding::{Binding, BindingMap};
use sitewise_core::id::PlanId;
use sitewise_exec::{Engine, ExecError};
use sitewise_planner::{parse_plan, PlanError, Site};

const SALES_YAML: &str = r#"
id: 3
type: Aggregate
groupbys:
  - {name: region, expr: {type: ColumnRef, column: region}}
aggs:
  - {name: total, expr: {type: Func, fname: sum, args: [{type: ColumnRef, column: amount}]}}
  - {name: n, expr: {type: Func, fname: count}}
input:
  id: 2
  type: Filter
  cond:
    type: Op
    op: ">"
    operands:
      - {type: ColumnRef, column: amount}
      - {type: ValExpr, id: lo, domain: {type: Func, fname: domain, args: [{type: ColumnRef, column: amount, table: sales}]}}
  input: {id: 1, type: TableSource, name: sales}
"#;

#[test]
fn test_yaml_plan_explain_and_sql() {
    let graph = parse_plan(SALES_YAML).expect("yaml parses");
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.root_id(), PlanId::new(3));
    assert_eq!(
        graph.to_string(),
        "Aggregate[3]{region -> sum(amount), count(*)}\n|\n\
         Filter[2]{amount > VAL[lo]{ domain(amount) }}\n|\n\
         TableSource[1]{sales}"
    );
    let b = BindingMap::from([("lo", Binding::Int(4))]);
    assert_eq!(
        graph.to_sql(graph.root(), &b).unwrap(),
        "SELECT region AS region, sum(amount) AS total, count(*) AS n FROM \
         (SELECT * FROM (SELECT * FROM sales) WHERE amount > 4) GROUP BY region"
    );
}

#[tokio::test]
async fn test_yaml_plan_executes() {
    let engine = Engine::new(parse_plan(SALES_YAML).unwrap(), common::context(Site::Server));
    let b = BindingMap::from([("lo", Binding::Int(4))]);
    let out = engine.execute_root(&b).await.unwrap();
    let table = out.as_table().unwrap();
    // amount > 4: w -> 10, 7, 9; e -> 5
    assert_eq!(common::column_strings(table, "region"), vec!["w", "e"]);
    assert_eq!(common::column_strings(table, "total"), vec!["26", "5"]);
    assert_eq!(common::column_strings(table, "n"), vec!["3", "1"]);
}

#[test]
fn test_shared_ids_build_one_node() {
    let plan = r#"{"id": 4, "type": "AnyPlan", "choice_id": "path", "choices": [
        {"id": 2, "type": "Projection",
         "projs": [{"name": "a", "expr": {"type": "ColumnRef", "column": "amount"}}],
         "input": {"id": 1, "type": "TableSource", "name": "sales"}},
        {"id": 3, "type": "Filter", "cond": {"type": "BoolConst", "value": true},
         "input": {"id": 1}}]}"#;
    let graph = parse_plan(plan).unwrap();
    assert_eq!(graph.len(), 4);
    let proj = graph.find(PlanId::new(2)).unwrap();
    let filter = graph.find(PlanId::new(3)).unwrap();
    assert_eq!(graph.input_plans(proj), graph.input_plans(filter));
}

#[test]
fn test_unknown_and_malformed_plans() {
    assert!(matches!(
        parse_plan(r#"{"id": 1, "type": "Teleport"}"#),
        Err(PlanError::Construction(_))
    ));
    assert!(parse_plan(r#"{"type": "TableSource", "name": "t"}"#).is_err());
    assert!(parse_plan("id: [unterminated").is_err());
    assert!(parse_plan(r#"{"id": 1, "type": "AnyPlan", "choice_id": "c", "choices": []}"#).is_err());
}

const ANY_PLAN: &str = r#"{"id": 4, "type": "AnyPlan", "choice_id": "path", "choices": [
    {"id": 2, "type": "Filter",
     "cond": {"type": "Op", "op": "=", "operands": [
        {"type": "ColumnRef", "column": "store"},
        {"type": "AnyExpr", "id": "s", "choices": [
            {"type": "StringConst", "value": "s1"},
            {"type": "StringConst", "value": "s3"}]}]},
     "input": {"id": 1, "type": "TableSource", "name": "sales"}},
    {"id": 3, "type": "Filter",
     "cond": {"type": "Op", "op": "in", "operands": [
        {"type": "ColumnRef", "column": "day"},
        {"type": "MultiExpr", "id": "days", "child":
            {"type": "ValExpr", "id": "d", "domain": {"type": "Func", "fname": "domain",
               "args": [{"type": "ColumnRef", "column": "day", "table": "sales"}]}}}]},
     "input": {"id": 1}}]}"#;

fn days(ds: &[i64]) -> Binding {
    Binding::Multi(
        ds.iter()
            .map(|d| BindingMap::from([("d", Binding::Int(*d))]))
            .collect(),
    )
}

#[tokio::test]
async fn test_any_plan_dispatches_on_index() {
    let engine = Engine::new(parse_plan(ANY_PLAN).unwrap(), common::context(Site::Server));
    let first = BindingMap::from([("path", Binding::Index(0)), ("s", Binding::Index(1))]);
    let out = engine.execute_root(&first).await.unwrap();
    assert_eq!(common::column_strings(out.as_table().unwrap(), "amount"), vec!["4"]);

    let second = BindingMap::from([("path", Binding::Index(1)), ("days", days(&[1, 3]))]);
    let out = engine.execute_root(&second).await.unwrap();
    assert_eq!(
        common::column_strings(out.as_table().unwrap(), "amount"),
        vec!["10", "5", "2", "9"]
    );

    let bad = BindingMap::from([("path", Binding::Index(5))]);
    assert!(matches!(
        engine.execute_root(&bad).await,
        Err(ExecError::Plan(PlanError::Choice(_)))
    ));
}

#[test]
fn test_useful_binding_follows_the_chosen_path() {
    let graph = parse_plan(ANY_PLAN).unwrap();
    let full = BindingMap::from([
        ("path", Binding::Index(1)),
        ("s", Binding::Index(0)),
        ("days", days(&[2])),
        ("unused", Binding::Bool(true)),
    ]);
    let useful = graph.useful_binding(graph.root(), &full).unwrap();
    let keys: Vec<&String> = useful.keys().collect();
    assert_eq!(keys, vec!["days", "path"]);
    assert_eq!(graph.useful_binding(graph.root(), &useful).unwrap(), useful);
}

#[test]
fn test_choice_nodes_of_a_subtree() {
    let graph = parse_plan(ANY_PLAN).unwrap();
    let filter = graph.find(PlanId::new(2)).unwrap();
    let choices = graph.choice_nodes(filter).unwrap();
    assert_eq!(choices.keys().collect::<Vec<_>>(), vec!["s"]);
    // Plan-level alternatives and repeated templates are not enumerable.
    assert!(graph.choice_nodes(graph.root()).is_err());
    let multi = graph.find(PlanId::new(3)).unwrap();
    assert!(graph.choice_nodes(multi).is_err());
}
