//! Docket CLI - inspect case records through the pooled repositories

use anyhow::Context;
use clap::{Parser, Subcommand};
use docket::config::DEFAULT_CONFIG_FILE;
use docket::query::{compile, NativeFindOptions};
use docket::repositories::{CaseAssignmentRepository, CaseNotesRepository, TrusteeAppointmentsRepository};
use docket::storage::SharedStore;
use docket::{AppConfig, ApplicationContext, ConnectionConfig, PooledRepository};
use docket_query::Query;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Typed document queries over case-management collections", long_about = None)]
struct Cli {
    /// Config file (falls back to DATABASE_* environment variables when missing)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the native filter for a query AST (no I/O)
    Compile {
        /// Query AST as JSON
        ast: String,
    },

    /// Run a query AST against any collection
    Find {
        collection: String,
        /// Query AST as JSON
        ast: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// List the active notes of a case
    Notes { case_id: String },

    /// Show active assignments for one or more cases
    Assignments {
        #[arg(required = true)]
        case_ids: Vec<String>,
    },

    /// List a trustee's appointments
    Appointments { trustee_id: String },
}

/// Untyped access for ad-hoc finds
struct RawCollections {
    store: SharedStore,
}

impl PooledRepository for RawCollections {
    const NAME: &'static str = "CLI";

    fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
        Self { store }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Compile { ast } = &cli.command {
        init_logging("warn");
        let query = Query::from_json_str(ast)?;
        print_json(&compile(&query)?.into_value())?;
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    init_logging(&config.log_level);

    let context = ApplicationContext::new(config);
    let result = run(&context, cli.command).await;
    context.shutdown().await;
    result
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        AppConfig::from_env().context("no config file and no DATABASE_* environment")
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(context: &ApplicationContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Compile { .. } => Ok(()),
        Commands::Find {
            collection,
            ast,
            offset,
            limit,
        } => find(context, &collection, &ast, offset, limit).await,
        Commands::Notes { case_id } => {
            let notes = context.repository::<CaseNotesRepository>().await?;
            let result = notes.get_notes_by_case_id(&case_id).await;
            notes.release()?;
            print_json(&result?)
        }
        Commands::Assignments { case_ids } => {
            let assignments = context.repository::<CaseAssignmentRepository>().await?;
            let result = assignments.get_assignments_for_cases(&case_ids).await;
            assignments.release()?;
            print_json(&result?)
        }
        Commands::Appointments { trustee_id } => {
            let appointments = context.repository::<TrusteeAppointmentsRepository>().await?;
            let result = appointments.get_trustee_appointments(&trustee_id).await;
            appointments.release()?;
            print_json(&result?)
        }
    }
}

async fn find(
    context: &ApplicationContext,
    collection: &str,
    ast: &str,
    offset: u64,
    limit: Option<u64>,
) -> anyhow::Result<()> {
    if limit == Some(0) {
        anyhow::bail!("--limit must be greater than zero");
    }
    let query = Query::from_json_str(ast)?;
    let mut options = NativeFindOptions::new(compile(&query)?);
    options.skip = offset;
    options.limit = limit;

    let raw = context.repository::<RawCollections>().await?;
    let records = raw.store.find(collection, &options).await;
    raw.release()?;
    print_json(&records?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
