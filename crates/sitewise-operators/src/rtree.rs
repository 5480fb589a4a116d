//! Spatial range index over 1-3 dimensional points.
//!
//! The tree is bulk-loaded with sort-tile-recursive packing: items are sorted
//! along one axis, cut into slabs, and each slab is tiled along the next axis
//! until groups of at most `NODE_CAPACITY` remain. Levels are packed the same
//! way until a single root is left. Every entry is a degenerate box around one
//! row's point; entry `i` is row `i` of the backing table.
//!
//! Only the points and the backing table travel on the wire. The receiver
//! re-packs the tree, which is deterministic for a given point order.

use sitewise_core::codec::{read_table, write_table, ByteReader, ByteWriter};
use sitewise_core::types::RowBatch;

use crate::compute::ComputeExpr;
use crate::traits::{OpError, Result, WireFormat};

const NODE_CAPACITY: usize = 16;
pub const MAX_DIM: usize = 3;

type Coords = [f64; MAX_DIM];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    lo: Coords,
    hi: Coords,
}

impl Rect {
    fn point(p: Coords) -> Self {
        Self { lo: p, hi: p }
    }

    fn center(&self, axis: usize) -> f64 {
        (self.lo[axis] + self.hi[axis]) / 2.0
    }

    fn union(&self, other: &Rect) -> Rect {
        let mut out = *self;
        for a in 0..MAX_DIM {
            out.lo[a] = out.lo[a].min(other.lo[a]);
            out.hi[a] = out.hi[a].max(other.hi[a]);
        }
        out
    }

    /// Inclusive overlap test on the first `dim` axes.
    fn intersects(&self, other: &Rect, dim: usize) -> bool {
        (0..dim).all(|a| self.lo[a] <= other.hi[a] && other.lo[a] <= self.hi[a])
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Children {
    Entries(Vec<usize>),
    Nodes(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    rect: Rect,
    children: Children,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct PackedTree {
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl PackedTree {
    fn bulk_load(points: &[Coords], dim: usize) -> Self {
        let mut tree = PackedTree::default();
        let mut level: Vec<(Rect, usize)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (Rect::point(*p), i))
            .collect();
        if level.is_empty() {
            return tree;
        }
        let mut leaves = true;
        loop {
            let mut groups = Vec::new();
            tile(&mut level, dim, 0, &mut groups);
            let mut next = Vec::with_capacity(groups.len());
            for group in groups {
                let rect = group
                    .iter()
                    .skip(1)
                    .fold(group[0].0, |acc, (r, _)| acc.union(r));
                let ids = group.iter().map(|(_, id)| *id).collect();
                tree.nodes.push(Node {
                    rect,
                    children: if leaves {
                        Children::Entries(ids)
                    } else {
                        Children::Nodes(ids)
                    },
                });
                next.push((rect, tree.nodes.len() - 1));
            }
            leaves = false;
            if next.len() == 1 {
                tree.root = Some(next[0].1);
                return tree;
            }
            level = next;
        }
    }

    fn search(&self, query: &Rect, dim: usize, points: &[Coords]) -> Vec<usize> {
        let mut hits = Vec::new();
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if !node.rect.intersects(query, dim) {
                continue;
            }
            match &node.children {
                Children::Nodes(ids) => stack.extend(ids.iter().copied()),
                Children::Entries(ids) => hits.extend(
                    ids.iter()
                        .copied()
                        .filter(|i| Rect::point(points[*i]).intersects(query, dim)),
                ),
            }
        }
        hits.sort_unstable();
        hits
    }
}

/// Sort-tile-recursive grouping of `items` into runs of at most `NODE_CAPACITY`.
fn tile(items: &mut [(Rect, usize)], dim: usize, axis: usize, out: &mut Vec<Vec<(Rect, usize)>>) {
    items.sort_by(|a, b| a.0.center(axis).total_cmp(&b.0.center(axis)));
    if axis + 1 >= dim {
        for chunk in items.chunks(NODE_CAPACITY) {
            out.push(chunk.to_vec());
        }
        return;
    }
    let pages = items.len().div_ceil(NODE_CAPACITY);
    let remaining_axes = (dim - axis) as f64;
    let slabs = ((pages as f64).powf(1.0 / remaining_axes).ceil() as usize).max(1);
    let slab_len = items.len().div_ceil(slabs).max(1);
    for slab in items.chunks_mut(slab_len) {
        tile(slab, dim, axis + 1, out);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RTreeImpl {
    dim: usize,
    points: Vec<Coords>,
    table: RowBatch,
    tree: PackedTree,
}

impl RTreeImpl {
    /// Index each row of `table` at the point given by `keys` (cast to f64).
    pub fn build(table: RowBatch, keys: &[ComputeExpr]) -> Result<Self> {
        let dim = keys.len();
        check_dim(dim)?;
        let key_cols = keys
            .iter()
            .map(|k| k.eval(&table))
            .collect::<Result<Vec<_>>>()?;
        let mut points = Vec::with_capacity(table.num_rows());
        for row in 0..table.num_rows() {
            let mut p = [0.0; MAX_DIM];
            for (axis, col) in key_cols.iter().enumerate() {
                p[axis] = col[row].as_f64().ok_or_else(|| {
                    OpError::Type(format!(
                        "rtree key {axis} of row {row} is not numeric: '{}'",
                        col[row]
                    ))
                })?;
            }
            points.push(p);
        }
        Ok(Self::from_parts(dim, points, table))
    }

    fn from_parts(dim: usize, points: Vec<Coords>, table: RowBatch) -> Self {
        let tree = PackedTree::bulk_load(&points, dim);
        Self {
            dim,
            points,
            table,
            tree,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn table(&self) -> &RowBatch {
        &self.table
    }

    /// Rows whose point lies inside `[lowers, uppers]` on every axis
    /// (bounds inclusive), in row order.
    pub fn query(&self, lowers: &[f64], uppers: &[f64]) -> Result<RowBatch> {
        if lowers.len() != self.dim || uppers.len() != self.dim {
            return Err(OpError::Exec(format!(
                "{}-d rtree queried with {} lower and {} upper bounds",
                self.dim,
                lowers.len(),
                uppers.len()
            )));
        }
        let mut q = Rect {
            lo: [0.0; MAX_DIM],
            hi: [0.0; MAX_DIM],
        };
        q.lo[..self.dim].copy_from_slice(lowers);
        q.hi[..self.dim].copy_from_slice(uppers);
        let rows = self.tree.search(&q, self.dim, &self.points);
        Ok(self.table.select_rows(&rows)?)
    }
}

fn check_dim(dim: usize) -> Result<()> {
    if !(1..=MAX_DIM).contains(&dim) {
        return Err(OpError::Unsupported(format!(
            "rtree dimension {dim}, expected 1 to {MAX_DIM}"
        )));
    }
    Ok(())
}

impl WireFormat for RTreeImpl {
    fn write_to(&self, w: &mut ByteWriter) {
        w.put_u32(self.dim as u32);
        w.put_u64(self.points.len() as u64);
        for p in &self.points {
            for v in &p[..self.dim] {
                w.put_f64(*v);
            }
        }
        write_table(w, &self.table);
    }

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let dim = r.get_u32()? as usize;
        check_dim(dim)?;
        let n = r.get_u64()?;
        if n > (r.remaining() / (8 * dim)) as u64 {
            return Err(OpError::Codec(format!("rtree claims {n} points")));
        }
        let mut points = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let mut p = [0.0; MAX_DIM];
            for v in p.iter_mut().take(dim) {
                *v = r.get_f64()?;
            }
            points.push(p);
        }
        let table = read_table(r)?;
        if table.num_rows() != points.len() {
            return Err(OpError::Codec(format!(
                "rtree has {} points but {} rows",
                points.len(),
                table.num_rows()
            )));
        }
        Ok(Self::from_parts(dim, points, table))
    }

    fn size_bytes(&self) -> usize {
        self.table.size_bytes()
            + std::mem::size_of::<usize>()
            + self.points.len() * std::mem::size_of::<Coords>()
            + self.tree.nodes.len() * std::mem::size_of::<Node>()
    }
}
