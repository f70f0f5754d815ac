//! keystage — bulk-load keys into a staging table
//!
//! # Usage
//!
//! ```bash
//! # Load integers from stdin into #ids
//! seq 1 50000 | keystage load --table '#ids'
//!
//! # Dry run (show SQL only)
//! seq 1 10 | keystage load --table '#ids' --dry-run
//!
//! # Show the CREATE TABLE for a GUID table without a primary key
//! keystage ddl --table '#guids' --kind guid --no-cluster
//! ```

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use keystage::prelude::*;
use keystage::recording::Statement;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "keystage")]
#[command(version)]
#[command(about = "Bulk-load primitive keys into a single-column staging table", long_about = None)]
#[command(after_help = "EXAMPLES:
    seq 1 50000 | keystage load --table '#ids'
    keystage load --table '#orders' --kind int64 --input order_ids.txt --drop
    keystage ddl --table '#guids' --kind guid --no-cluster")]
struct Cli {
    /// Config file (default: <config dir>/keystage/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyKind {
    Int32,
    Int64,
    Guid,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
struct TableArgs {
    /// Temporary table name, e.g. '#ids'
    #[arg(short, long)]
    table: String,

    /// Key type
    #[arg(short, long, value_enum, default_value = "int32")]
    kind: KeyKind,

    /// Column name (default from config, else "id")
    #[arg(short, long)]
    column: Option<String>,

    /// Don't create a clustered primary key
    #[arg(long)]
    no_cluster: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a staging table and bulk-load keys into it
    Load {
        #[command(flatten)]
        table: TableArgs,

        /// Read keys from a file instead of stdin, one per line
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Don't connect, just show the statements that would run
        #[arg(short, long)]
        dry_run: bool,

        /// Drop the table after loading
        #[arg(long)]
        drop: bool,

        /// Statement listing format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// SQL Server connection string
        #[arg(long, env = "KEYSTAGE_CONNECTION")]
        connection: Option<String>,
    },
    /// Show the CREATE TABLE statement for a staging table
    Ddl {
        #[command(flatten)]
        table: TableArgs,
    },
}

/// Resolved table settings.
struct Plan {
    table: String,
    column: String,
    clustered: bool,
    drop: bool,
}

impl Plan {
    fn new(args: &TableArgs, config: &KeystageConfig, drop: bool) -> Self {
        Self {
            table: args.table.clone(),
            column: args
                .column
                .clone()
                .unwrap_or_else(|| config.column_name.clone()),
            clustered: config.clustered && !args.no_cluster,
            drop,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "keystage=debug" } else { "keystage=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = KeystageConfig::load(cli.config.as_deref()).context("loading config")?;

    match &cli.command {
        Commands::Load {
            table,
            input,
            dry_run,
            drop,
            format,
            connection,
        } => {
            let plan = Plan::new(table, &config, *drop);
            let reader = open_input(input.as_ref())?;

            if *dry_run {
                let conn = RecordingConnection::count_only();
                let rows = load_kind(&conn, table.kind, &plan, reader)?;
                print_statements(&conn.statements(), *format)?;
                println!();
                println!(
                    "{} {} key(s) would be loaded into {}",
                    "✓".green(),
                    rows.to_string().cyan(),
                    plan.table.white()
                );
                return Ok(());
            }

            let conn_str = connection
                .clone()
                .or_else(|| config.connection_string.clone());
            let Some(conn_str) = conn_str else {
                bail!("No connection string. Use --connection, set KEYSTAGE_CONNECTION, or pass --dry-run");
            };
            let rows = load_live(&conn_str, table.kind, &plan, reader)?;
            println!(
                "{} {} key(s) loaded into {}",
                "✓".green(),
                rows.to_string().cyan(),
                plan.table.white()
            );
            Ok(())
        }
        Commands::Ddl { table } => {
            let plan = Plan::new(table, &config, false);
            let conn = RecordingConnection::new();
            match table.kind {
                KeyKind::Int32 => create::<i32>(&conn, &plan)?,
                KeyKind::Int64 => create::<i64>(&conn, &plan)?,
                KeyKind::Guid => create::<Uuid>(&conn, &plan)?,
            }
            if let Some(ddl) = conn.sql_log().last() {
                println!("{}", ddl.white());
            }
            Ok(())
        }
    }
}

#[cfg(feature = "mssql")]
fn load_live(conn_str: &str, kind: KeyKind, plan: &Plan, reader: Box<dyn BufRead>) -> Result<u64> {
    let conn = MssqlConnection::connect(conn_str).context("connecting to SQL Server")?;
    load_kind(&conn, kind, plan, reader)
}

#[cfg(not(feature = "mssql"))]
fn load_live(_conn_str: &str, _kind: KeyKind, _plan: &Plan, _reader: Box<dyn BufRead>) -> Result<u64> {
    bail!("keystage was built without the mssql feature; only --dry-run is available")
}

fn open_input(input: Option<&PathBuf>) -> Result<Box<dyn BufRead>> {
    match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn create<T: Primitive>(conn: &RecordingConnection, plan: &Plan) -> Result<()> {
    StagingTable::<T, _>::builder(conn, &plan.table)
        .column(plan.column.clone())
        .clustered(plan.clustered)
        .create()?;
    Ok(())
}

fn load_kind<C: Connection>(
    conn: &C,
    kind: KeyKind,
    plan: &Plan,
    reader: Box<dyn BufRead>,
) -> Result<u64> {
    match kind {
        KeyKind::Int32 => load::<i32, C>(conn, plan, reader),
        KeyKind::Int64 => load::<i64, C>(conn, plan, reader),
        KeyKind::Guid => load::<Uuid, C>(conn, plan, reader),
    }
}

/// Create the table and stream keys from `reader` into it, line by line.
fn load<T, C>(conn: &C, plan: &Plan, reader: Box<dyn BufRead>) -> Result<u64>
where
    T: Primitive + FromStr,
    T::Err: Display,
    C: Connection,
{
    let staging = StagingTable::<T, C>::builder(conn, &plan.table)
        .column(plan.column.clone())
        .clustered(plan.clustered)
        .create()?;

    let mut bad_line: Option<String> = None;
    let keys = reader
        .lines()
        .enumerate()
        .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map_while(|(n, line)| {
            let parsed = line
                .map_err(|e| e.to_string())
                .and_then(|l| l.trim().parse::<T>().map_err(|e| e.to_string()));
            match parsed {
                Ok(key) => Some(key),
                Err(e) => {
                    bad_line = Some(format!("line {}: {}", n + 1, e));
                    None
                }
            }
        });

    let rows = staging.insert_keys(keys)?;
    if let Some(err) = bad_line {
        bail!("stopped after {} key(s) at {}", rows, err);
    }

    if plan.drop {
        staging.drop_table()?;
    }
    Ok(rows)
}

fn print_statements(statements: &[Statement], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(statements)?);
        }
        OutputFormat::Table => {
            println!("{}", "Statements:".green().bold());
            for (i, stmt) in statements.iter().enumerate() {
                println!("  {} {}", format!("{:>2}.", i + 1).dimmed(), stmt.sql.white());
                for (name, value) in &stmt.params {
                    println!("      @{} = {}", name.cyan(), value.yellow());
                }
            }
        }
    }
    Ok(())
}
