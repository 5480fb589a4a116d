//! Plan operators and the arena that owns them.

use std::collections::{HashMap, HashSet};

use sitewise_core::id::{NodeIdx, PlanId};
use sitewise_operators::data::SerialKind;
use sitewise_operators::Expr;

use crate::error::{PlanError, Result};

/// An expression with the output column name it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpr {
    pub name: String,
    pub expr: Expr,
}

impl NamedExpr {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// Per-node configuration. Children are indices into the owning graph.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOp {
    Projection {
        input: NodeIdx,
        projs: Vec<NamedExpr>,
    },
    Filter {
        input: NodeIdx,
        cond: Expr,
    },
    Aggregate {
        input: NodeIdx,
        groupbys: Vec<NamedExpr>,
        aggs: Vec<NamedExpr>,
    },
    TableSource {
        name: String,
    },
    /// Crossing from the client to the server.
    Network {
        input: NodeIdx,
    },
    /// Crossing to the SQL backend.
    Cloud {
        input: NodeIdx,
    },
    /// Static cache: every binding combination is computed up front.
    SCache {
        input: NodeIdx,
    },
    /// Dynamic cache: the last result and the binding that produced it.
    DCache {
        input: NodeIdx,
    },
    HashTableBuild {
        input: NodeIdx,
        keys: Vec<Expr>,
    },
    HashTableQuery {
        input: NodeIdx,
        queries: Vec<Expr>,
    },
    RTreeBuild {
        input: NodeIdx,
        keys: Vec<Expr>,
    },
    RTreeQuery {
        input: NodeIdx,
        lowers: Vec<Expr>,
        uppers: Vec<Expr>,
    },
    PrefixSumBuild {
        input: NodeIdx,
        sum: NamedExpr,
        target: NamedExpr,
        agg: NamedExpr,
    },
    PrefixSumQuery {
        input: NodeIdx,
        lower: Expr,
        upper: Expr,
    },
    PrefixSum2DBuild {
        input: NodeIdx,
        sum_x: NamedExpr,
        sum_y: NamedExpr,
        target: NamedExpr,
        agg: NamedExpr,
    },
    PrefixSum2DQuery {
        input: NodeIdx,
        lower_x: Expr,
        upper_x: Expr,
        lower_y: Expr,
        upper_y: Expr,
    },
    AnyPlan {
        choice_id: String,
        choices: Vec<NodeIdx>,
    },
}

impl PlanOp {
    pub fn name(&self) -> &'static str {
        match self {
            PlanOp::Projection { .. } => "Projection",
            PlanOp::Filter { .. } => "Filter",
            PlanOp::Aggregate { .. } => "Aggregate",
            PlanOp::TableSource { .. } => "TableSource",
            PlanOp::Network { .. } => "Network",
            PlanOp::Cloud { .. } => "Cloud",
            PlanOp::SCache { .. } => "SCache",
            PlanOp::DCache { .. } => "DCache",
            PlanOp::HashTableBuild { .. } => "HashTableBuild",
            PlanOp::HashTableQuery { .. } => "HashTableQuery",
            PlanOp::RTreeBuild { .. } => "RTreeBuild",
            PlanOp::RTreeQuery { .. } => "RTreeQuery",
            PlanOp::PrefixSumBuild { .. } => "PrefixSumBuild",
            PlanOp::PrefixSumQuery { .. } => "PrefixSumQuery",
            PlanOp::PrefixSum2DBuild { .. } => "PrefixSum2DBuild",
            PlanOp::PrefixSum2DQuery { .. } => "PrefixSum2DQuery",
            PlanOp::AnyPlan { .. } => "AnyPlan",
        }
    }

    /// Direct children, in order. Empty for leaves.
    pub fn inputs(&self) -> Vec<NodeIdx> {
        match self {
            PlanOp::TableSource { .. } => Vec::new(),
            PlanOp::AnyPlan { choices, .. } => choices.clone(),
            PlanOp::Projection { input, .. }
            | PlanOp::Filter { input, .. }
            | PlanOp::Aggregate { input, .. }
            | PlanOp::Network { input }
            | PlanOp::Cloud { input }
            | PlanOp::SCache { input }
            | PlanOp::DCache { input }
            | PlanOp::HashTableBuild { input, .. }
            | PlanOp::HashTableQuery { input, .. }
            | PlanOp::RTreeBuild { input, .. }
            | PlanOp::RTreeQuery { input, .. }
            | PlanOp::PrefixSumBuild { input, .. }
            | PlanOp::PrefixSumQuery { input, .. }
            | PlanOp::PrefixSum2DBuild { input, .. }
            | PlanOp::PrefixSum2DQuery { input, .. } => vec![*input],
        }
    }

    /// Operators that compose into one compute pipeline.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            PlanOp::Projection { .. } | PlanOp::Filter { .. } | PlanOp::Aggregate { .. }
        )
    }

    /// Expressions owned by this node (not its inputs).
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            PlanOp::Projection { projs, .. } => projs.iter().map(|p| &p.expr).collect(),
            PlanOp::Filter { cond, .. } => vec![cond],
            PlanOp::Aggregate { groupbys, aggs, .. } => groupbys
                .iter()
                .chain(aggs.iter())
                .map(|p| &p.expr)
                .collect(),
            PlanOp::HashTableBuild { keys, .. } | PlanOp::RTreeBuild { keys, .. } => {
                keys.iter().collect()
            }
            PlanOp::HashTableQuery { queries, .. } => queries.iter().collect(),
            PlanOp::RTreeQuery { lowers, uppers, .. } => lowers.iter().chain(uppers.iter()).collect(),
            PlanOp::PrefixSumBuild {
                sum, target, agg, ..
            } => vec![&sum.expr, &target.expr, &agg.expr],
            PlanOp::PrefixSumQuery { lower, upper, .. } => vec![lower, upper],
            PlanOp::PrefixSum2DBuild {
                sum_x,
                sum_y,
                target,
                agg,
                ..
            } => vec![&sum_x.expr, &sum_y.expr, &target.expr, &agg.expr],
            PlanOp::PrefixSum2DQuery {
                lower_x,
                upper_x,
                lower_y,
                upper_y,
                ..
            } => vec![lower_x, upper_x, lower_y, upper_y],
            PlanOp::TableSource { .. }
            | PlanOp::Network { .. }
            | PlanOp::Cloud { .. }
            | PlanOp::SCache { .. }
            | PlanOp::DCache { .. }
            | PlanOp::AnyPlan { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub id: PlanId,
    pub op: PlanOp,
}

/// Which side of the client/server split a graph is instantiated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Client,
    Server,
}

impl Site {
    pub fn as_str(self) -> &'static str {
        match self {
            Site::Client => "client",
            Site::Server => "server",
        }
    }
}

/// Incremental construction of a `PlanGraph`. Children must be added
/// before their parents.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    nodes: Vec<PlanNode>,
    by_id: HashMap<PlanId, NodeIdx>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: PlanId) -> Option<NodeIdx> {
        self.by_id.get(&id).copied()
    }

    pub fn add(&mut self, id: PlanId, op: PlanOp) -> Result<NodeIdx> {
        if self.by_id.contains_key(&id) {
            return Err(PlanError::Construction(format!(
                "duplicate plan id {}",
                id.get()
            )));
        }
        for child in op.inputs() {
            if child.index() >= self.nodes.len() {
                return Err(PlanError::Construction(format!(
                    "plan {} references a node that was not added yet",
                    id.get()
                )));
            }
        }
        let idx = NodeIdx::new(self.nodes.len() as u32);
        self.nodes.push(PlanNode { id, op });
        self.by_id.insert(id, idx);
        Ok(idx)
    }

    pub fn finish(self, root: NodeIdx) -> Result<PlanGraph> {
        if root.index() >= self.nodes.len() {
            return Err(PlanError::Construction("root is not in the graph".into()));
        }
        Ok(PlanGraph {
            nodes: self.nodes,
            by_id: self.by_id,
            root,
        })
    }
}

/// Arena of plan nodes with one root. Immutable once built; cache state is
/// held by the runtime, keyed by `NodeIdx`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanGraph {
    nodes: Vec<PlanNode>,
    by_id: HashMap<PlanId, NodeIdx>,
    root: NodeIdx,
}

impl PlanGraph {
    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub fn root_id(&self) -> PlanId {
        self.nodes[self.root.index()].id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIdx) -> &PlanNode {
        &self.nodes[idx.index()]
    }

    pub fn op(&self, idx: NodeIdx) -> &PlanOp {
        &self.nodes[idx.index()].op
    }

    pub fn id_of(&self, idx: NodeIdx) -> PlanId {
        self.nodes[idx.index()].id
    }

    pub fn find(&self, id: PlanId) -> Option<NodeIdx> {
        self.by_id.get(&id).copied()
    }

    pub fn contains(&self, id: PlanId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn input_plans(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.op(idx).inputs()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &PlanNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIdx::new(i as u32), n))
    }

    /// True when the subtree's leftmost path reaches a leaf without
    /// crossing a `Network` node.
    pub fn at_server(&self, idx: NodeIdx) -> bool {
        let mut cur = idx;
        loop {
            let op = self.op(cur);
            if matches!(op, PlanOp::Network { .. }) {
                return false;
            }
            match op.inputs().first() {
                Some(child) => cur = *child,
                None => return true,
            }
        }
    }

    /// Nodes in initialization order (depth-first, left to right, children
    /// before parents) as seen from `site`. From the client, a `Network`
    /// node and its subtree are skipped. Shared subtrees appear once.
    pub fn init_order(&self, site: Site) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.init_visit(self.root, site, &mut seen, &mut out);
        out
    }

    fn init_visit(
        &self,
        idx: NodeIdx,
        site: Site,
        seen: &mut HashSet<NodeIdx>,
        out: &mut Vec<NodeIdx>,
    ) {
        if !seen.insert(idx) {
            return;
        }
        if site == Site::Client && matches!(self.op(idx), PlanOp::Network { .. }) {
            return;
        }
        for child in self.input_plans(idx) {
            self.init_visit(child, site, seen, out);
        }
        out.push(idx);
    }

    /// `SCache` nodes that `site` warms, in initialization order. On the
    /// server, only caches whose data stays on the server are warmed.
    pub fn caches_to_warm(&self, site: Site) -> Vec<NodeIdx> {
        self.init_order(site)
            .into_iter()
            .filter(|idx| matches!(self.op(*idx), PlanOp::SCache { .. }))
            .filter(|idx| site == Site::Client || self.at_server(*idx))
            .collect()
    }

    /// Payload variant produced by `idx`, looking through caches. Decides how
    /// a `Network` reply is decoded.
    pub fn output_kind(&self, idx: NodeIdx) -> SerialKind {
        let mut cur = idx;
        loop {
            match self.op(cur) {
                PlanOp::SCache { input } | PlanOp::DCache { input } => cur = *input,
                PlanOp::HashTableBuild { .. } => return SerialKind::HashTable,
                PlanOp::RTreeBuild { .. } => return SerialKind::RTree,
                PlanOp::PrefixSumBuild { .. } => return SerialKind::PrefixSum,
                PlanOp::PrefixSum2DBuild { .. } => return SerialKind::PrefixSum2D,
                _ => return SerialKind::Table,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Filter(3) <- Network(2) <- SCache(1) <- TableSource(0)
    pub(crate) fn remote_chain() -> PlanGraph {
        let mut b = PlanBuilder::new();
        let src = b
            .add(PlanId::new(0), PlanOp::TableSource { name: "t".into() })
            .unwrap();
        let cache = b.add(PlanId::new(1), PlanOp::SCache { input: src }).unwrap();
        let net = b.add(PlanId::new(2), PlanOp::Network { input: cache }).unwrap();
        let filter = b
            .add(
                PlanId::new(3),
                PlanOp::Filter {
                    input: net,
                    cond: Expr::BoolConst(true),
                },
            )
            .unwrap();
        b.finish(filter).unwrap()
    }

    #[test]
    fn builder_rejects_duplicate_ids() {
        let mut b = PlanBuilder::new();
        b.add(PlanId::new(1), PlanOp::TableSource { name: "t".into() })
            .unwrap();
        let err = b
            .add(PlanId::new(1), PlanOp::TableSource { name: "u".into() })
            .unwrap_err();
        assert!(matches!(err, PlanError::Construction(_)));
    }

    #[test]
    fn at_server_stops_at_network() {
        let g = remote_chain();
        assert!(!g.at_server(g.root()));
        let cache = g.find(PlanId::new(1)).unwrap();
        assert!(g.at_server(cache));
    }

    #[test]
    fn client_init_skips_network_subtree() {
        let g = remote_chain();
        let ids: Vec<i32> = g
            .init_order(Site::Client)
            .into_iter()
            .map(|i| g.id_of(i).get())
            .collect();
        assert_eq!(ids, vec![3]);
        assert!(g.caches_to_warm(Site::Client).is_empty());

        let server: Vec<i32> = g
            .init_order(Site::Server)
            .into_iter()
            .map(|i| g.id_of(i).get())
            .collect();
        assert_eq!(server, vec![0, 1, 2, 3]);
        assert_eq!(g.caches_to_warm(Site::Server).len(), 1);
    }

    #[test]
    fn output_kind_looks_through_caches() {
        let mut b = PlanBuilder::new();
        let src = b
            .add(PlanId::new(0), PlanOp::TableSource { name: "t".into() })
            .unwrap();
        let build = b
            .add(
                PlanId::new(1),
                PlanOp::HashTableBuild {
                    input: src,
                    keys: vec![Expr::column("k")],
                },
            )
            .unwrap();
        let cache = b.add(PlanId::new(2), PlanOp::DCache { input: build }).unwrap();
        let g = b.finish(cache).unwrap();
        assert_eq!(g.output_kind(cache), SerialKind::HashTable);
        assert_eq!(g.output_kind(src), SerialKind::Table);
    }
}
