//! Plans split across client, server and SQL backend.

mod common;

use std::sync::Arc;

use sitewise_core::binding::{Binding, BindingMap};
use sitewise_core::config::EngineConfig;
use sitewise_core::id::PlanId;
use sitewise_exec::{
    CatalogSql, Client, Engine, ExecContext, ExecError, LoopbackTransport, Server, TcpTransport,
    Transport,
};
use sitewise_planner::{parse_plan, Site};
use tokio::net::TcpListener;

/// Client probes a hash table that the server builds from `sales`.
const REMOTE_INDEX_PLAN: &str = r#"{"id": 4, "type": "HashTableQuery",
  "queries": [{"type": "ValExpr", "id": "r", "domain": {"type": "Func", "fname": "domain",
      "args": [{"type": "ColumnRef", "column": "region", "table": "sales"}]}}],
  "input": {"id": 3, "type": "Network", "input":
    {"id": 2, "type": "HashTableBuild", "keys": [{"type": "ColumnRef", "column": "region"}],
     "input": {"id": 1, "type": "TableSource", "name": "sales"}}}}"#;

/// Server-side static cache behind a network hop.
const REMOTE_CACHE_PLAN: &str = r#"{"id": 4, "type": "Network", "input":
  {"id": 3, "type": "SCache", "input":
    {"id": 2, "type": "Aggregate",
     "groupbys": [{"name": "store", "expr": {"type": "ColumnRef", "column": "store"}}],
     "aggs": [{"name": "total", "expr": {"type": "Func", "fname": "sum",
                "args": [{"type": "ColumnRef", "column": "amount"}]}}],
     "input": {"id": 5, "type": "Filter",
       "cond": {"type": "Op", "op": "=", "operands": [
          {"type": "ColumnRef", "column": "region"},
          {"type": "ValExpr", "id": "r", "domain": {"type": "Func", "fname": "domain",
             "args": [{"type": "ColumnRef", "column": "region", "table": "sales"}]}}]},
       "input": {"id": 1, "type": "TableSource", "name": "sales"}}}}}"#;

fn loopback() -> (Arc<Server>, Client) {
    let server = Arc::new(Server::new(common::context(Site::Server)));
    let transport = Arc::new(LoopbackTransport::new(Arc::clone(&server)));
    // The client has no base tables of its own.
    let client = Client::new(
        ExecContext::new(Site::Client, EngineConfig::default()),
        transport,
    );
    (server, client)
}

fn region(r: &str) -> BindingMap {
    BindingMap::from([("r", Binding::String(r.into()))])
}

#[tokio::test]
async fn test_remote_index_is_queried_locally() {
    let (_server, client) = loopback();
    let (root, rendering) = client.register_plan(REMOTE_INDEX_PLAN).await.unwrap();
    assert_eq!(root, PlanId::new(4));
    assert!(rendering.contains("Network[3]"));

    let out = client.execute(root, &region("e")).await.unwrap();
    let table = out.as_table().unwrap();
    assert_eq!(common::column_strings(table, "amount"), vec!["5", "4"]);
}

#[tokio::test]
async fn test_remote_static_cache() {
    let (server, client) = loopback();
    let (root, _) = client.register_plan(REMOTE_CACHE_PLAN).await.unwrap();
    assert_eq!(server.num_plans(), 1);

    let w = client.execute(root, &region("w")).await.unwrap();
    let w = w.as_table().unwrap();
    assert_eq!(common::column_strings(w, "store"), vec!["s1", "s2"]);
    assert_eq!(common::column_strings(w, "total"), vec!["26", "2"]);

    // Enumerated on the server only; a region outside the table misses there.
    assert!(matches!(
        client.execute(root, &region("x")).await,
        Err(ExecError::Remote(msg)) if msg.contains("cache miss")
    ));
}

#[tokio::test]
async fn test_client_skips_remote_initialization() {
    let (_server, client) = loopback();
    // Warming SCache[3] on the client would need `sales`, which it lacks.
    let (root, _) = client.register_plan(REMOTE_CACHE_PLAN).await.unwrap();
    let engine = client.engine(root).unwrap();
    assert_eq!(engine.static_cache_len(PlanId::new(3)), Some(0));
}

#[tokio::test]
async fn test_cloud_pushdown() {
    let catalog = common::catalog();
    let ctx = ExecContext::new(Site::Client, EngineConfig::default())
        .with_sql(Arc::new(CatalogSql::new(Arc::clone(&catalog))));
    let plan = r#"{"id": 2, "type": "Cloud", "input": {"id": 1, "type": "TableSource", "name": "points"}}"#;
    let engine = Engine::new(parse_plan(plan).unwrap(), ctx);
    let out = engine.execute_root(&BindingMap::new()).await.unwrap();
    assert_eq!(out.as_table().unwrap(), &common::points());
}

#[tokio::test]
async fn test_tcp_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Arc::new(Server::new(common::context(Site::Server)));
    tokio::spawn(Arc::clone(&server).serve(listener));

    let transport = Arc::new(
        TcpTransport::connect(&addr, EngineConfig::default().max_frame_bytes)
            .await
            .unwrap(),
    );
    let client = Client::new(
        ExecContext::new(Site::Client, EngineConfig::default()),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    let (root, _) = client.register_plan(REMOTE_INDEX_PLAN).await.unwrap();

    // Two requests in flight on one connection.
    let (region_e, region_w) = (region("e"), region("w"));
    let (e, w) = tokio::join!(
        client.execute(root, &region_e),
        client.execute(root, &region_w),
    );
    assert_eq!(e.unwrap().as_table().unwrap().num_rows(), 2);
    assert_eq!(w.unwrap().as_table().unwrap().num_rows(), 4);
    assert_eq!(transport.in_flight(), 0);

    client.log("tcp round trip done").await.unwrap();
}
