//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Address the server binds to.
    pub listen_addr: String,

    /// Address of the remote peer a client forwards `Network` subtrees to.
    pub server_addr: Option<String>,

    /// Directory of `<table>.csv` files served by `TableSource`.
    pub table_dir: Option<String>,

    /// Emit one metrics event per executed plan node.
    pub emit_metrics: bool,

    /// Upper bound on a single transport payload.
    pub max_frame_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7171".to_string(),
            server_addr: None,
            table_dir: None,
            emit_metrics: false,
            max_frame_bytes: 256 * 1024 * 1024, // 256 MiB
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SITEWISE_LISTEN_ADDR`: server bind address
    /// - `SITEWISE_SERVER_ADDR`: remote peer for client-side `Network` nodes
    /// - `SITEWISE_TABLE_DIR`: directory of CSV base tables
    /// - `SITEWISE_EMIT_METRICS`: `1`/`true` to log per-node metrics
    /// - `SITEWISE_MAX_FRAME_BYTES`: payload size limit
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SITEWISE_LISTEN_ADDR") {
            cfg.listen_addr = s;
        }

        if let Ok(s) = std::env::var("SITEWISE_SERVER_ADDR") {
            cfg.server_addr = Some(s);
        }

        if let Ok(s) = std::env::var("SITEWISE_TABLE_DIR") {
            cfg.table_dir = Some(s);
        }

        if let Ok(s) = std::env::var("SITEWISE_EMIT_METRICS") {
            cfg.emit_metrics = matches!(s.trim(), "1" | "true" | "yes" | "on");
        }

        if let Ok(s) = std::env::var("SITEWISE_MAX_FRAME_BYTES") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_frame_bytes = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(Error::Config("listen_addr is empty".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::Config("max_frame_bytes must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.emit_metrics);
    }

    #[test]
    fn zero_frame_limit_rejected() {
        let cfg = EngineConfig {
            max_frame_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
