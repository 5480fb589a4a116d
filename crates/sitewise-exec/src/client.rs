//! Client end of the site-transition protocol.
//!
//! A plan is registered on both sides: the server builds and warms the parts
//! it owns, the client keeps its own instance and forwards `Network`
//! subtrees over the transport.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sitewise_core::binding::BindingMap;
use sitewise_core::id::PlanId;
use sitewise_operators::SerialData;
use sitewise_planner::{parse_plan, Site};

use crate::context::ExecContext;
use crate::runtime::{Engine, ExecError, Result};
use crate::transport::{check_reply, RequestKind, Transport};

pub struct Client {
    ctx: ExecContext,
    engines: RwLock<HashMap<PlanId, Arc<Engine>>>,
}

impl Client {
    pub fn new(mut ctx: ExecContext, transport: Arc<dyn Transport>) -> Self {
        ctx.site = Site::Client;
        Self {
            ctx: ctx.with_transport(transport),
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    /// Register `text` with the server, then build and initialize the local
    /// instance. Returns the root id and the server's rendering.
    pub async fn register_plan(&self, text: &str) -> Result<(PlanId, String)> {
        let graph = parse_plan(text)?;
        let root = graph.root_id();
        let transport = self.ctx.transport()?;
        let reply = transport
            .send(RequestKind::Init, root, text.as_bytes().to_vec())
            .await?;
        let rendering = String::from_utf8_lossy(&check_reply(reply)?).into_owned();

        let engine = Engine::new(graph, self.ctx.clone());
        engine.initialize().await?;
        self.engines
            .write()
            .map_err(|_| ExecError::Transport("plan registry poisoned".into()))?
            .insert(root, Arc::new(engine));
        tracing::info!(root = root.get(), "plan registered with server");
        Ok((root, rendering))
    }

    pub fn engine(&self, root: PlanId) -> Option<Arc<Engine>> {
        self.engines.read().ok()?.get(&root).cloned()
    }

    /// Execute a registered plan from its root.
    pub async fn execute(&self, root: PlanId, binding: &BindingMap) -> Result<Arc<SerialData>> {
        let engine = self
            .engine(root)
            .ok_or_else(|| ExecError::NotFound(format!("no plan with root id {}", root.get())))?;
        engine.execute_root(binding).await
    }

    /// Ship a log line to the server.
    pub async fn log(&self, line: &str) -> Result<()> {
        let reply = self
            .ctx
            .transport()?
            .send(RequestKind::Log, PlanId::new(0), line.as_bytes().to_vec())
            .await?;
        check_reply(reply)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sitewise_core::binding::Binding;
    use sitewise_core::config::EngineConfig;
    use sitewise_core::schema::DataType;
    use sitewise_core::types::{Column, RowBatch, Scalar};

    use super::*;
    use crate::server::Server;
    use crate::transport::LoopbackTransport;

    const PLAN: &str = r#"{"id": 3, "type": "Network", "input":
        {"id": 2, "type": "Filter",
         "cond": {"type": "Op", "op": "=", "operands": [
             {"type": "ColumnRef", "column": "k"},
             {"type": "ValExpr", "id": "v", "domain": {"type": "Func", "fname": "domain",
                 "args": [{"type": "ColumnRef", "column": "k", "table": "t"}]}}]},
         "input": {"id": 1, "type": "TableSource", "name": "t"}}}"#;

    fn client() -> (Arc<Server>, Client) {
        let server_ctx = ExecContext::new(Site::Server, EngineConfig::default());
        server_ctx.catalog.insert(
            "t",
            RowBatch::new(vec![Column::new(
                "k",
                DataType::Int64,
                vec![Scalar::I64(1), Scalar::I64(2), Scalar::I64(2)],
            )])
            .unwrap(),
        );
        let server = Arc::new(Server::new(server_ctx));
        let transport = Arc::new(LoopbackTransport::new(Arc::clone(&server)));
        let client = Client::new(
            ExecContext::new(Site::Client, EngineConfig::default()),
            transport,
        );
        (server, client)
    }

    #[tokio::test]
    async fn network_subtree_runs_on_the_server() {
        let (server, client) = client();
        let (root, rendering) = client.register_plan(PLAN).await.unwrap();
        assert_eq!(root, PlanId::new(3));
        assert!(rendering.starts_with("Network[3]"));
        assert_eq!(server.num_plans(), 1);

        let binding = BindingMap::from([("v", Binding::Int(2))]);
        let out = client.execute(root, &binding).await.unwrap();
        assert_eq!(out.as_table().unwrap().num_rows(), 2);
        client.log("done").await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_root_and_remote_errors() {
        let (_server, client) = client();
        assert!(matches!(
            client.execute(PlanId::new(3), &BindingMap::new()).await,
            Err(ExecError::NotFound(_))
        ));
        client.register_plan(PLAN).await.unwrap();
        // The server cannot bind `v`, so its ERROR reply surfaces here.
        assert!(matches!(
            client.execute(PlanId::new(3), &BindingMap::new()).await,
            Err(ExecError::Remote(_))
        ));
    }
}
