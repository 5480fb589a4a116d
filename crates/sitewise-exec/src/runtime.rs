//! Runtime: execute a `PlanGraph` under a binding.
//!
//! Behavior:
//! - `execute` is a boxed future per node; children are awaited in place, so
//!   execution composes bottom-up and each future resolves exactly once.
//! - Adjacent Projection/Filter/Aggregate nodes are fused into one compute
//!   `Pipeline`; any other input is materialized and becomes the source.
//! - Cache state lives here, keyed by arena index; the graph stays immutable.
//! - `initialize` warms static caches in initialization order.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;

use sitewise_core::binding::BindingMap;
use sitewise_core::id::{NodeIdx, PlanId};
use sitewise_core::types::{RowBatch, Scalar};
use sitewise_operators::compute::{AggFunc, AggregateSpec, ComputeExpr, Pipeline, Stage};
use sitewise_operators::hash_table::HashTableImpl;
use sitewise_operators::prefix_sum::PrefixSumImpl;
use sitewise_operators::prefix_sum_2d::PrefixSum2DImpl;
use sitewise_operators::rtree::RTreeImpl;
use sitewise_operators::{Expr, OpError, SerialData};
use sitewise_planner::choice::chosen_alternative;
use sitewise_planner::{NamedExpr, PlanError, PlanGraph, PlanOp, Site};

use crate::cache::{BindingProduct, DynamicCache, StaticCache};
use crate::context::ExecContext;
use crate::metrics::NodeMetrics;
use crate::transport::{check_reply, RequestKind};

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("operator exec: {0}")]
    Operator(#[from] OpError),
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),
    #[error("cache miss: {0}")]
    CacheMiss(String),
    #[error("wrong input data: {0}")]
    WrongData(String),
    #[error("transport: {0}")]
    Transport(String),
    /// An `ERROR` reply from the peer, text kept verbatim.
    #[error("remote: {0}")]
    Remote(String),
    #[error("sql backend: {0}")]
    Sql(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("table load: {0}")]
    Load(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sitewise_core::Error> for ExecError {
    fn from(e: sitewise_core::Error) -> Self {
        ExecError::Operator(OpError::from(e))
    }
}

type ExecFuture<'a> = BoxFuture<'a, Result<Arc<SerialData>>>;

/// One plan graph instantiated on one site, with its cache state.
pub struct Engine {
    graph: Arc<PlanGraph>,
    ctx: ExecContext,
    scaches: HashMap<NodeIdx, StaticCache>,
    dcaches: HashMap<NodeIdx, DynamicCache>,
}

impl Engine {
    pub fn new(graph: PlanGraph, ctx: ExecContext) -> Self {
        let mut scaches = HashMap::new();
        let mut dcaches = HashMap::new();
        for (idx, node) in graph.iter() {
            match node.op {
                PlanOp::SCache { .. } => {
                    scaches.insert(idx, StaticCache::new());
                }
                PlanOp::DCache { .. } => {
                    dcaches.insert(idx, DynamicCache::new());
                }
                _ => {}
            }
        }
        Self {
            graph: Arc::new(graph),
            ctx,
            scaches,
            dcaches,
        }
    }

    pub fn graph(&self) -> &PlanGraph {
        &self.graph
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn site(&self) -> Site {
        self.ctx.site
    }

    /// Number of entries held by the static cache at `id`.
    pub fn static_cache_len(&self, id: PlanId) -> Option<usize> {
        let idx = self.graph.find(id)?;
        self.scaches.get(&idx).map(StaticCache::len)
    }

    /// Binding-independent setup: warm every static cache this site owns,
    /// children before parents.
    pub async fn initialize(&self) -> Result<()> {
        for idx in self.graph.caches_to_warm(self.ctx.site) {
            self.warm_static_cache(idx).await?;
        }
        Ok(())
    }

    async fn warm_static_cache(&self, idx: NodeIdx) -> Result<()> {
        let (PlanOp::SCache { input }, Some(cache)) = (self.graph.op(idx), self.scaches.get(&idx))
        else {
            return Ok(());
        };
        let choices = self.graph.choice_nodes(*input)?;
        let mut domains = Vec::with_capacity(choices.len());
        for (id, choice) in &choices {
            domains.push((id.clone(), self.ctx.all_choices(choice).await?));
        }
        let product = BindingProduct::new(domains);
        let id = self.graph.id_of(idx).get();
        tracing::info!(
            node = id,
            site = self.ctx.site.as_str(),
            combinations = product.total(),
            "warming static cache"
        );
        for (n, binding) in product.enumerate() {
            let useful = self.graph.useful_binding(*input, &binding)?;
            if cache.get(&useful).is_some() {
                continue;
            }
            let data = self.execute(*input, &binding).await?;
            cache.insert(&useful, data);
            tracing::debug!(node = id, done = n + 1, "static cache entry");
        }
        tracing::info!(node = id, entries = cache.len(), "static cache warm");
        Ok(())
    }

    pub async fn execute_root(&self, binding: &BindingMap) -> Result<Arc<SerialData>> {
        self.execute(self.graph.root(), binding).await
    }

    /// Execute exactly the node with plan id `id`.
    pub async fn execute_subplan(&self, id: PlanId, binding: &BindingMap) -> Result<Arc<SerialData>> {
        let idx = self
            .graph
            .find(id)
            .ok_or_else(|| ExecError::NotFound(format!("plan id {}", id.get())))?;
        self.execute(idx, binding).await
    }

    pub fn execute<'a>(&'a self, idx: NodeIdx, binding: &'a BindingMap) -> ExecFuture<'a> {
        async move {
            let node = self.graph.node(idx);
            let mut metrics = NodeMetrics::start(node.id, node.op.name(), self.ctx.site);
            let out = self.execute_op(idx, binding, &mut metrics).await?;
            metrics.record_output(&out);
            metrics.finish(self.ctx.config.emit_metrics);
            Ok(out)
        }
        .boxed()
    }

    async fn execute_op(
        &self,
        idx: NodeIdx,
        binding: &BindingMap,
        metrics: &mut NodeMetrics,
    ) -> Result<Arc<SerialData>> {
        let data = match self.graph.op(idx) {
            PlanOp::Projection { .. } | PlanOp::Filter { .. } | PlanOp::Aggregate { .. } => {
                let pipeline = self.build_pipeline(idx, binding).await?;
                metrics.record_input(&pipeline.source);
                SerialData::table(pipeline.run()?)
            }
            PlanOp::TableSource { name } => SerialData::table(self.ctx.load_table(name).await?),
            PlanOp::Network { input } => {
                let transport = self.ctx.transport()?;
                let target = self.graph.id_of(*input);
                let payload = binding.to_json()?.into_bytes();
                let reply = transport
                    .send(RequestKind::Execute, target, payload)
                    .await?;
                let reply = check_reply(reply)?;
                SerialData::from_bytes(self.graph.output_kind(*input), &reply)?
            }
            PlanOp::Cloud { input } => {
                let sql = self.graph.to_sql(*input, binding)?;
                tracing::debug!(%sql, "cloud query");
                SerialData::table(self.ctx.sql()?.run_query(&sql).await?)
            }
            PlanOp::SCache { input } => {
                let useful = self.graph.useful_binding(*input, binding)?;
                let cache = self.scaches.get(&idx).ok_or_else(|| missing_state(idx))?;
                return cache.get(&useful).ok_or_else(|| {
                    ExecError::CacheMiss(format!(
                        "SCache[{}] has no entry for {useful}",
                        self.graph.id_of(idx).get()
                    ))
                });
            }
            PlanOp::DCache { input } => {
                let useful = self.graph.useful_binding(*input, binding)?;
                let cache = self.dcaches.get(&idx).ok_or_else(|| missing_state(idx))?;
                if let Some(hit) = cache.get(&useful) {
                    return Ok(hit);
                }
                let data = self.execute(*input, binding).await?;
                cache.replace(useful, Arc::clone(&data));
                return Ok(data);
            }
            PlanOp::HashTableBuild { input, keys } => {
                let table = self.input_table(*input, binding, metrics).await?;
                let keys = compile_all(keys, binding)?;
                SerialData::HashTable(HashTableImpl::build(&table, &keys)?)
            }
            PlanOp::HashTableQuery { input, queries } => {
                let data = self.execute(*input, binding).await?;
                let index = data.as_hash_table().map_err(wrong_data)?;
                let key = queries
                    .iter()
                    .map(|q| literal(q, binding))
                    .collect::<Result<Vec<_>>>()?;
                SerialData::table(index.query(&key).clone())
            }
            PlanOp::RTreeBuild { input, keys } => {
                let table = self.input_table(*input, binding, metrics).await?;
                let keys = compile_all(keys, binding)?;
                SerialData::RTree(RTreeImpl::build(table, &keys)?)
            }
            PlanOp::RTreeQuery {
                input,
                lowers,
                uppers,
            } => {
                let data = self.execute(*input, binding).await?;
                let index = data.as_rtree().map_err(wrong_data)?;
                metrics.record_input(index.table());
                let lowers = coordinates(lowers, binding)?;
                let uppers = coordinates(uppers, binding)?;
                SerialData::table(index.query(&lowers, &uppers)?)
            }
            PlanOp::PrefixSumBuild {
                input,
                sum,
                target,
                agg,
            } => {
                let table = self.input_table(*input, binding, metrics).await?;
                SerialData::PrefixSum(PrefixSumImpl::build(
                    table,
                    compile_named(sum, binding)?,
                    compile_named(target, binding)?,
                    compile_named(agg, binding)?,
                )?)
            }
            PlanOp::PrefixSumQuery {
                input,
                lower,
                upper,
            } => {
                let data = self.execute(*input, binding).await?;
                let index = data.as_prefix_sum().map_err(wrong_data)?;
                SerialData::table(index.query(&literal(lower, binding)?, &literal(upper, binding)?)?)
            }
            PlanOp::PrefixSum2DBuild {
                input,
                sum_x,
                sum_y,
                target,
                agg,
            } => {
                let table = self.input_table(*input, binding, metrics).await?;
                SerialData::PrefixSum2D(PrefixSum2DImpl::build(
                    table,
                    compile_named(sum_x, binding)?,
                    compile_named(sum_y, binding)?,
                    compile_named(target, binding)?,
                    compile_named(agg, binding)?,
                )?)
            }
            PlanOp::PrefixSum2DQuery {
                input,
                lower_x,
                upper_x,
                lower_y,
                upper_y,
            } => {
                let data = self.execute(*input, binding).await?;
                let index = data.as_prefix_sum_2d().map_err(wrong_data)?;
                SerialData::table(index.query(
                    &literal(lower_x, binding)?,
                    &literal(upper_x, binding)?,
                    &literal(lower_y, binding)?,
                    &literal(upper_y, binding)?,
                )?)
            }
            PlanOp::AnyPlan { choice_id, choices } => {
                let child = chosen_alternative(choice_id, choices, binding)?;
                return self.execute(child, binding).await;
            }
        };
        Ok(Arc::new(data))
    }

    /// Execute `input` and take its table, recording it as this node's input.
    async fn input_table(
        &self,
        input: NodeIdx,
        binding: &BindingMap,
        metrics: &mut NodeMetrics,
    ) -> Result<RowBatch> {
        let table = owned_table(self.execute(input, binding).await?)?;
        metrics.record_input(&table);
        Ok(table)
    }

    /// The fused pipeline for a chain of relational nodes ending at `idx`.
    fn build_pipeline<'a>(
        &'a self,
        idx: NodeIdx,
        binding: &'a BindingMap,
    ) -> BoxFuture<'a, Result<Pipeline>> {
        async move {
            let (input, stages) = match self.graph.op(idx) {
                PlanOp::Projection { input, projs } => (
                    *input,
                    vec![Stage::Project(
                        projs
                            .iter()
                            .map(|p| compile_named(p, binding))
                            .collect::<Result<Vec<_>>>()?,
                    )],
                ),
                PlanOp::Filter { input, cond } => {
                    (*input, vec![Stage::Filter(compile(cond, binding)?)])
                }
                PlanOp::Aggregate {
                    input,
                    groupbys,
                    aggs,
                } => (*input, aggregate_stages(groupbys, aggs, binding)?),
                other => {
                    return Err(ExecError::Plan(PlanError::Unsupported(format!(
                        "{} is not a relational operator",
                        other.name()
                    ))))
                }
            };
            let mut pipeline = if self.graph.op(input).is_relational() {
                self.build_pipeline(input, binding).await?
            } else {
                Pipeline::new(owned_table(self.execute(input, binding).await?)?)
            };
            for stage in stages {
                pipeline = pipeline.then(stage);
            }
            Ok(pipeline)
        }
        .boxed()
    }
}

fn missing_state(idx: NodeIdx) -> ExecError {
    ExecError::NotFound(format!("cache state for node {}", idx.index()))
}

fn wrong_data(e: OpError) -> ExecError {
    ExecError::WrongData(e.to_string())
}

/// Take the table out of a payload, cloning only when it is shared.
fn owned_table(data: Arc<SerialData>) -> Result<RowBatch> {
    match Arc::try_unwrap(data) {
        Ok(owned) => owned.into_table().map_err(wrong_data),
        Err(shared) => shared.as_table().cloned().map_err(wrong_data),
    }
}

fn compile(expr: &Expr, binding: &BindingMap) -> Result<ComputeExpr> {
    Ok(expr.evaluate(binding)?.to_compute()?)
}

fn compile_all(exprs: &[Expr], binding: &BindingMap) -> Result<Vec<ComputeExpr>> {
    exprs.iter().map(|e| compile(e, binding)).collect()
}

fn compile_named(named: &NamedExpr, binding: &BindingMap) -> Result<(ComputeExpr, String)> {
    Ok((compile(&named.expr, binding)?, named.name.clone()))
}

/// Project the group keys and every aggregate argument, then reduce.
/// `count` and `sum` reduce with a sum (a `count` projects a literal 1 per
/// row), `avg` with a mean.
fn aggregate_stages(
    groupbys: &[NamedExpr],
    aggs: &[NamedExpr],
    binding: &BindingMap,
) -> Result<Vec<Stage>> {
    let mut projs = groupbys
        .iter()
        .map(|g| compile_named(g, binding))
        .collect::<Result<Vec<_>>>()?;
    let mut specs = Vec::with_capacity(aggs.len());
    for agg in aggs {
        let bound = agg.expr.bind(binding)?;
        let Expr::Func { name, args } = &bound else {
            return Err(OpError::Unsupported(format!(
                "aggregate '{}' is not a function call: {bound}",
                agg.name
            ))
            .into());
        };
        let (func, arg) = match (name.as_str(), args.as_slice()) {
            ("count", _) => (AggFunc::Sum, ComputeExpr::Literal(Scalar::I64(1))),
            ("sum", [a]) => (AggFunc::Sum, compile(a, binding)?),
            ("avg", [a]) => (AggFunc::Mean, compile(a, binding)?),
            (other, args) => {
                return Err(OpError::Unsupported(format!(
                    "aggregate {other} with {} arguments",
                    args.len()
                ))
                .into())
            }
        };
        projs.push((arg, agg.name.clone()));
        specs.push(AggregateSpec::new(func, agg.name.clone(), agg.name.clone()));
    }
    Ok(vec![
        Stage::Project(projs),
        Stage::Aggregate {
            keys: groupbys.iter().map(|g| g.name.clone()).collect(),
            aggs: specs,
        },
    ])
}

/// Fold a query parameter to a scalar; anything still symbolic is an error.
fn literal(expr: &Expr, binding: &BindingMap) -> Result<Scalar> {
    let folded = expr.evaluate(binding)?;
    if !folded.is_literal() {
        return Err(OpError::Type(format!("query parameter '{folded}' is not a literal")).into());
    }
    Ok(folded.to_scalar()?)
}

fn coordinates(exprs: &[Expr], binding: &BindingMap) -> Result<Vec<f64>> {
    exprs
        .iter()
        .map(|e| {
            let v = literal(e, binding)?;
            v.as_f64()
                .ok_or_else(|| OpError::Type(format!("range bound '{v}' is not numeric")).into())
        })
        .collect()
}
