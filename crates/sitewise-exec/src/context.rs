//! Explicit execution context: where we run and what we can reach.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sitewise_core::binding::Binding;
use sitewise_core::config::EngineConfig;
use sitewise_core::types::RowBatch;
use sitewise_operators::ChoiceNode;
use sitewise_planner::Site;

use crate::runtime::{ExecError, Result};
use crate::sql::{distinct_column, SqlBackend};
use crate::transport::Transport;

/// In-memory base tables served to `TableSource` by name.
#[derive(Debug, Default)]
pub struct TableCatalog {
    tables: RwLock<HashMap<String, RowBatch>>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, table: RowBatch) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(name.into(), table);
        }
    }

    pub fn get(&self, name: &str) -> Option<RowBatch> {
        self.tables.read().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct ExecContext {
    pub site: Site,
    pub config: EngineConfig,
    pub transport: Option<Arc<dyn Transport>>,
    pub sql: Option<Arc<dyn SqlBackend>>,
    pub catalog: Arc<TableCatalog>,
}

impl ExecContext {
    pub fn new(site: Site, config: EngineConfig) -> Self {
        Self {
            site,
            config,
            transport: None,
            sql: None,
            catalog: Arc::new(TableCatalog::new()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_sql(mut self, sql: Arc<dyn SqlBackend>) -> Self {
        self.sql = Some(sql);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<TableCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn transport(&self) -> Result<&Arc<dyn Transport>> {
        self.transport.as_ref().ok_or_else(|| {
            ExecError::Transport(format!("no transport configured on the {}", self.site.as_str()))
        })
    }

    pub fn sql(&self) -> Result<&Arc<dyn SqlBackend>> {
        self.sql
            .as_ref()
            .ok_or_else(|| ExecError::Sql("no SQL backend configured".into()))
    }

    /// Base table by name: the catalog first, then `SELECT * FROM name`.
    pub async fn load_table(&self, name: &str) -> Result<RowBatch> {
        if let Some(table) = self.catalog.get(name) {
            return Ok(table);
        }
        match &self.sql {
            Some(sql) => sql.run_query(&format!("SELECT * FROM {name}")).await,
            None => Err(ExecError::NotFound(format!("table '{name}'"))),
        }
    }

    /// Every legal value of a choice node.
    pub async fn all_choices(&self, choice: &ChoiceNode) -> Result<Vec<Binding>> {
        if let Some(local) = choice.local_choices() {
            return Ok(local);
        }
        let (column, table) = choice.domain_column()?;
        let distinct = match self.catalog.get(table) {
            Some(batch) => distinct_column(&batch, column)?,
            None => self.sql()?.run_query(&choice.domain_query()?).await?,
        };
        Ok(ChoiceNode::choices_from_domain(&distinct)?)
    }
}
