use sitewise_core::types::{RowBatch, Scalar};

use super::aggregate::{hash_aggregate, AggregateSpec};
use super::ComputeExpr;
use crate::traits::{OpError, Result};

/// One relational step of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Evaluate each expression into a column of the given name.
    Project(Vec<(ComputeExpr, String)>),
    /// Keep rows where the predicate is `true` (nulls drop the row).
    Filter(ComputeExpr),
    Aggregate {
        keys: Vec<String>,
        aggs: Vec<AggregateSpec>,
    },
}

/// A materialized source followed by relational stages, run in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub source: RowBatch,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(source: RowBatch) -> Self {
        Self {
            source,
            stages: Vec::new(),
        }
    }

    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn run(self) -> Result<RowBatch> {
        let mut batch = self.source;
        for stage in &self.stages {
            batch = run_stage(stage, &batch)?;
        }
        Ok(batch)
    }
}

fn run_stage(stage: &Stage, batch: &RowBatch) -> Result<RowBatch> {
    match stage {
        Stage::Project(exprs) => {
            let columns = exprs
                .iter()
                .map(|(e, name)| e.eval_column(batch, name))
                .collect::<Result<Vec<_>>>()?;
            Ok(RowBatch::new(columns)?)
        }
        Stage::Filter(pred) => {
            let mask = pred.eval(batch)?;
            let mut keep = Vec::new();
            for (row, v) in mask.iter().enumerate() {
                match v {
                    Scalar::Bool(true) => keep.push(row),
                    Scalar::Bool(false) | Scalar::Null => {}
                    other => {
                        return Err(OpError::Type(format!(
                            "filter predicate produced non-boolean '{other}'"
                        )))
                    }
                }
            }
            Ok(batch.select_rows(&keep)?)
        }
        Stage::Aggregate { keys, aggs } => hash_aggregate(batch, keys, aggs),
    }
}
