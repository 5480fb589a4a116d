//! sitewise CLI: serve plans, explain them, or run one under a binding.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sitewise_core::binding::BindingMap;
use sitewise_core::config::EngineConfig;
use sitewise_core::types::{RowBatch, Scalar};
use sitewise_exec::{
    CatalogSql, Client, Engine, ExecContext, Server, TableCatalog, TcpTransport,
};
use sitewise_operators::SerialData;
use sitewise_planner::{parse_plan, Site};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sitewise")]
#[command(about = "Adaptive query execution across client, server and SQL backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept plans and execute subplans for remote clients
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        listen: Option<String>,

        /// Directory of <table>.csv base tables (overrides config)
        #[arg(long)]
        tables: Option<PathBuf>,
    },

    /// Print the plan rendering and its choice nodes
    Explain {
        /// Path to the plan file (JSON or YAML)
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Execute a plan once and print the result as CSV
    Run {
        /// Path to the plan file (JSON or YAML)
        #[arg(short, long)]
        plan: PathBuf,

        /// Binding as JSON, e.g. '{"lo": {"type": "Int", "value": 3}}'
        #[arg(short, long, default_value = "{}")]
        binding: String,

        /// Remote server for Network subtrees (overrides config)
        #[arg(long)]
        server: Option<String>,

        /// Directory of <table>.csv base tables (overrides config)
        #[arg(long)]
        tables: Option<PathBuf>,

        /// Log one metrics event per executed node
        #[arg(long)]
        metrics: bool,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SITEWISE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve { listen, tables } => serve(listen, tables).await,
        Commands::Explain { plan } => explain(&plan),
        Commands::Run {
            plan,
            binding,
            server,
            tables,
            metrics,
        } => run(&plan, &binding, server, tables, metrics).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(tables: Option<PathBuf>) -> CliResult<EngineConfig> {
    let mut config = EngineConfig::from_env();
    if let Some(dir) = tables {
        config.table_dir = Some(dir.to_string_lossy().into_owned());
    }
    config.validate()?;
    Ok(config)
}

fn load_catalog(config: &EngineConfig) -> CliResult<Arc<TableCatalog>> {
    let catalog = Arc::new(TableCatalog::new());
    if let Some(dir) = &config.table_dir {
        let n = catalog.load_dir(dir)?;
        tracing::info!(dir = %dir, tables = n, "catalog loaded");
    }
    Ok(catalog)
}

fn context(site: Site, config: EngineConfig) -> CliResult<ExecContext> {
    let catalog = load_catalog(&config)?;
    Ok(ExecContext::new(site, config)
        .with_sql(Arc::new(CatalogSql::new(Arc::clone(&catalog))))
        .with_catalog(catalog))
}

async fn serve(listen: Option<String>, tables: Option<PathBuf>) -> CliResult<()> {
    let mut config = load_config(tables)?;
    if let Some(addr) = listen {
        config.listen_addr = addr;
    }
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let server = Arc::new(Server::new(context(Site::Server, config)?));
    server.serve(listener).await?;
    Ok(())
}

fn explain(plan: &Path) -> CliResult<()> {
    let graph = parse_plan(&fs::read_to_string(plan)?)?;
    println!("{graph}");
    match graph.choice_nodes(graph.root()) {
        Ok(choices) if !choices.is_empty() => {
            println!();
            println!("Choice nodes:");
            for (id, choice) in &choices {
                println!("  {id}: {choice:?}");
            }
        }
        Ok(_) => {}
        // AnyPlan and MultiExpr choices are resolved structurally.
        Err(e) => {
            println!();
            println!("Choice nodes not enumerable: {e}");
        }
    }
    Ok(())
}

async fn run(
    plan: &Path,
    binding: &str,
    server: Option<String>,
    tables: Option<PathBuf>,
    metrics: bool,
) -> CliResult<()> {
    let mut config = load_config(tables)?;
    if server.is_some() {
        config.server_addr = server;
    }
    config.emit_metrics |= metrics;
    let text = fs::read_to_string(plan)?;
    let binding = BindingMap::from_json(binding)?;

    let out = match config.server_addr.clone() {
        Some(addr) => {
            let transport = TcpTransport::connect(&addr, config.max_frame_bytes).await?;
            let client = Client::new(context(Site::Client, config)?, Arc::new(transport));
            let (root, _) = client.register_plan(&text).await?;
            client.execute(root, &binding).await?
        }
        None => {
            let engine = Engine::new(parse_plan(&text)?, context(Site::Server, config)?);
            engine.initialize().await?;
            engine.execute_root(&binding).await?
        }
    };
    print_result(&out)
}

fn print_result(data: &SerialData) -> CliResult<()> {
    match data.as_table() {
        Ok(table) => write_csv(table),
        Err(_) => {
            println!("{:?} ({} bytes)", data.kind(), data.size_bytes());
            Ok(())
        }
    }
}

fn write_csv(table: &RowBatch) -> CliResult<()> {
    let mut w = csv::Writer::from_writer(std::io::stdout());
    w.write_record(table.columns.iter().map(|c| c.name.as_str()))?;
    for row in 0..table.num_rows() {
        w.write_record(table.columns.iter().map(|c| match &c.values[row] {
            Scalar::Null => String::new(),
            v => v.to_string(),
        }))?;
    }
    w.flush()?;
    Ok(())
}
