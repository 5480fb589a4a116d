//! Per-node execution metrics.
//!
//! Collected for every executed node and emitted as one tracing event with a
//! JSON payload when `EngineConfig::emit_metrics` is set. Formatting and
//! shipping of the events is left to the subscriber installed by the binary.

use std::time::Instant;

use serde::Serialize;

use sitewise_core::id::PlanId;
use sitewise_core::types::RowBatch;
use sitewise_operators::SerialData;
use sitewise_planner::Site;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub id: i32,
    pub node: &'static str,
    pub site: &'static str,
    pub input_rows: u64,
    pub input_cols: u64,
    pub output_rows: u64,
    pub output_cols: u64,
    pub elapsed_micros: u64,
    /// In-memory size of an index or cached payload; zero for plain tables.
    pub build_size: u64,
    #[serde(skip)]
    started: Option<Instant>,
}

impl NodeMetrics {
    pub fn start(id: PlanId, node: &'static str, site: Site) -> Self {
        Self {
            id: id.get(),
            node,
            site: site.as_str(),
            started: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_input(&mut self, table: &RowBatch) {
        self.input_rows += table.num_rows() as u64;
        self.input_cols = self.input_cols.max(table.num_columns() as u64);
    }

    pub fn record_output(&mut self, data: &SerialData) {
        match data {
            SerialData::Table(t) => {
                self.output_rows = t.table.num_rows() as u64;
                self.output_cols = t.table.num_columns() as u64;
            }
            other => self.build_size = other.size_bytes() as u64,
        }
    }

    pub fn finish(mut self, emit: bool) -> Self {
        if let Some(t0) = self.started.take() {
            self.elapsed_micros = t0.elapsed().as_micros() as u64;
        }
        if emit {
            match serde_json::to_string(&self) {
                Ok(payload) => emit_span("node", &[("payload", payload)]),
                Err(e) => tracing::warn!(error = %e, "failed to encode node metrics"),
            }
        }
        self
    }
}

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::INFO, "sitewise_metrics", event);
    let _entered = span.enter();
    for (k, v) in key_values {
        tracing::info!(target: "sitewise::metrics", %event, %k, %v, "metric");
    }
}

#[cfg(test)]
mod tests {
    use sitewise_core::schema::DataType;
    use sitewise_core::types::{Column, Scalar};

    use super::*;

    #[test]
    fn records_table_shapes() {
        let t = RowBatch::new(vec![
            Column::new("a", DataType::Int64, vec![Scalar::I64(1), Scalar::I64(2)]),
            Column::new("b", DataType::Int64, vec![Scalar::I64(3), Scalar::I64(4)]),
        ])
        .unwrap();
        let mut m = NodeMetrics::start(PlanId::new(7), "Filter", Site::Client);
        m.record_input(&t);
        m.record_output(&SerialData::table(t.select_rows(&[0]).unwrap()));
        let m = m.finish(false);
        assert_eq!((m.input_rows, m.input_cols), (2, 2));
        assert_eq!((m.output_rows, m.output_cols), (1, 2));
        assert_eq!(m.build_size, 0);
        assert_eq!(m.site, "client");
    }

    #[test]
    fn payload_is_json() {
        let m = NodeMetrics::start(PlanId::new(1), "SCache", Site::Server).finish(false);
        let v: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert_eq!(v["node"], "SCache");
        assert_eq!(v["id"], 1);
        assert!(v.get("started").is_none());
    }
}
