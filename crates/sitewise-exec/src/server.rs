//! Server end of the site-transition protocol.
//!
//! Accepts connections, reads request frames, and answers each one from a
//! spawned task so several requests on one connection can be in flight.
//! Replies share the connection writer behind an async mutex.

use std::sync::{Arc, RwLock};

use tokio::net::{TcpListener, TcpStream};

use sitewise_core::binding::BindingMap;
use sitewise_core::hash::hash_str;
use sitewise_core::id::PlanId;
use sitewise_planner::{parse_plan, Site};

use crate::context::ExecContext;
use crate::runtime::{Engine, ExecError, Result};
use crate::transport::{Reply, Request, RequestKind};

pub struct Server {
    ctx: ExecContext,
    engines: RwLock<Vec<Arc<Engine>>>,
}

impl Server {
    /// `ctx` is re-sited to the server side.
    pub fn new(mut ctx: ExecContext) -> Self {
        ctx.site = Site::Server;
        Self {
            ctx,
            engines: RwLock::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn num_plans(&self) -> usize {
        self.engines.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Answer one request. Failures become `ERROR` replies.
    pub async fn handle(&self, request: Request) -> Reply {
        let id = request.id;
        let node = request.node;
        let result = match request.kind {
            RequestKind::Init => self.register(&request.payload).await,
            RequestKind::Execute => self.execute(node, &request.payload).await,
            RequestKind::Log => {
                let line = String::from_utf8_lossy(&request.payload);
                tracing::info!(target: "sitewise::remote", node = node.get(), "{line}");
                Ok(Vec::new())
            }
        };
        match result {
            Ok(payload) => Reply { id, payload },
            Err(e) => {
                tracing::warn!(request = id.get(), node = node.get(), error = %e, "request failed");
                Reply::error(id, e)
            }
        }
    }

    /// Parse, build and initialize a plan; the reply is its rendering.
    pub async fn register(&self, text: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(text)
            .map_err(|e| ExecError::Transport(format!("plan text is not UTF-8: {e}")))?;
        let graph = parse_plan(text)?;
        let fingerprint = hash_str(text);
        let root = graph.root_id();
        let rendering = graph.to_string();
        let engine = Engine::new(graph, self.ctx.clone());
        engine.initialize().await?;
        let mut engines = self
            .engines
            .write()
            .map_err(|_| ExecError::Transport("plan registry poisoned".into()))?;
        // A re-registered root replaces its previous graph and caches.
        engines.retain(|e| e.graph().root_id() != root);
        engines.push(Arc::new(engine));
        drop(engines);
        tracing::info!(root = root.get(), %fingerprint, "plan registered");
        Ok(rendering.into_bytes())
    }

    /// The most recently registered graph that contains `id`.
    fn engine_for(&self, id: PlanId) -> Option<Arc<Engine>> {
        let engines = self.engines.read().ok()?;
        engines.iter().rev().find(|e| e.graph().contains(id)).cloned()
    }

    async fn execute(&self, id: PlanId, payload: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| ExecError::Transport(format!("binding is not UTF-8: {e}")))?;
        let binding = BindingMap::from_json(text)?;
        let engine = self
            .engine_for(id)
            .ok_or_else(|| ExecError::NotFound("Plan id not found".into()))?;
        let data = engine.execute_subplan(id, &binding).await?;
        Ok(data.to_bytes())
    }

    /// Accept loop; one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::info!(%peer, "client connected");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    tracing::warn!(%peer, error = %e, "connection closed");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut rd, wr) = stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(wr));
        let max_frame = self.ctx.config.max_frame_bytes;
        loop {
            let request = match Request::read_from(&mut rd, max_frame).await {
                Ok(r) => r,
                Err(ExecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            };
            tracing::debug!(
                request = request.id.get(),
                kind = ?request.kind,
                node = request.node.get(),
                "dispatch"
            );
            let server = Arc::clone(&self);
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let reply = server.handle(request).await;
                let mut w = writer.lock().await;
                if let Err(e) = reply.write_to(&mut *w).await {
                    tracing::warn!(error = %e, "failed to write reply");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use sitewise_core::config::EngineConfig;
    use sitewise_core::id::RequestId;
    use sitewise_core::schema::DataType;
    use sitewise_core::types::{Column, RowBatch, Scalar};
    use sitewise_operators::data::SerialKind;
    use sitewise_operators::SerialData;

    use super::*;
    use crate::transport::{check_reply, ERROR_PREFIX};

    const PLAN: &str = r#"{"id": 2, "type": "Filter",
        "cond": {"type": "Op", "op": ">", "operands": [
            {"type": "ColumnRef", "column": "x"}, {"type": "IntConst", "value": 1}]},
        "input": {"id": 1, "type": "TableSource", "name": "t"}}"#;

    fn server() -> Server {
        let ctx = ExecContext::new(Site::Client, EngineConfig::default());
        ctx.catalog.insert(
            "t",
            RowBatch::new(vec![Column::new(
                "x",
                DataType::Int64,
                vec![Scalar::I64(1), Scalar::I64(2), Scalar::I64(3)],
            )])
            .unwrap(),
        );
        Server::new(ctx)
    }

    fn request(kind: RequestKind, node: i32, payload: &str) -> Request {
        Request {
            id: RequestId::new(7),
            kind,
            node: PlanId::new(node),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn init_then_execute_subplans() {
        let s = server();
        assert_eq!(s.context().site, Site::Server);
        let init = s.handle(request(RequestKind::Init, 0, PLAN)).await;
        assert_eq!(init.id, RequestId::new(7));
        let text = String::from_utf8(check_reply(init.payload).unwrap()).unwrap();
        assert!(text.starts_with("Filter[2]"));
        assert_eq!(s.num_plans(), 1);

        let reply = s.handle(request(RequestKind::Execute, 2, "{}")).await;
        let data = SerialData::from_bytes(SerialKind::Table, &check_reply(reply.payload).unwrap())
            .unwrap();
        assert_eq!(data.as_table().unwrap().num_rows(), 2);

        let reply = s.handle(request(RequestKind::Execute, 1, "{}")).await;
        let data = SerialData::from_bytes(SerialKind::Table, &reply.payload).unwrap();
        assert_eq!(data.as_table().unwrap().num_rows(), 3);
    }

    #[tokio::test]
    async fn re_registering_a_root_replaces_its_graph() {
        let s = server();
        for _ in 0..5 {
            let reply = s.handle(request(RequestKind::Init, 0, PLAN)).await;
            check_reply(reply.payload).unwrap();
        }
        assert_eq!(s.num_plans(), 1);

        let other = r#"{"id": 9, "type": "TableSource", "name": "t"}"#;
        check_reply(s.handle(request(RequestKind::Init, 0, other)).await.payload).unwrap();
        assert_eq!(s.num_plans(), 2);
        let reply = s.handle(request(RequestKind::Execute, 2, "{}")).await;
        assert!(check_reply(reply.payload).is_ok());
    }

    #[tokio::test]
    async fn unknown_plan_id_is_an_error_reply() {
        let s = server();
        let reply = s.handle(request(RequestKind::Execute, 42, "{}")).await;
        let text = String::from_utf8(reply.payload).unwrap();
        assert!(text.starts_with(ERROR_PREFIX));
        assert!(text.contains("Plan id not found"));
    }

    #[tokio::test]
    async fn bad_plan_and_log_requests() {
        let s = server();
        let reply = s.handle(request(RequestKind::Init, 0, "{\"id\": 1}")).await;
        assert!(reply.payload.starts_with(ERROR_PREFIX.as_bytes()));
        assert_eq!(s.num_plans(), 0);
        let reply = s.handle(request(RequestKind::Log, 0, "hello")).await;
        assert!(reply.payload.is_empty());
    }
}
