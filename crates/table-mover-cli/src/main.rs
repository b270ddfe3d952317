//! table-mover CLI - parallel bulk EXPORT, IMPORT and COPY of tables.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use table_mover::{Config, Engine, Mode, MoverError, RunSummary};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "table-mover")]
#[command(about = "Parallel bulk table export, import and copy between databases and CSV")]
#[command(version)]
struct Cli {
    /// Directory holding db-config.properties, process-config.properties and tables.config
    #[arg(long, env = "TABLE_MOVER_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Single YAML configuration file, used instead of --config-dir
    #[arg(short, long, env = "TABLE_MOVER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the operation: EXPORT, IMPORT or COPY
    #[arg(long)]
    mode: Option<String>,

    /// Override the CSV directory
    #[arg(long)]
    path: Option<PathBuf>,

    /// Override rows per page window
    #[arg(long)]
    page_size: Option<u64>,

    /// Override the number of concurrent tables
    #[arg(long)]
    parallel_tables: Option<usize>,

    /// Override the number of page workers per table
    #[arg(long)]
    parallel_pages: Option<usize>,

    /// Override the connection cap per side
    #[arg(long)]
    max_connections: Option<u32>,

    /// Override rows per cursor round trip
    #[arg(long)]
    fetch_size: Option<usize>,

    /// Output the run summary as JSON on stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MoverError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::from_dir(&cli.config_dir)?,
    };
    apply_overrides(&mut config, &cli)?;

    let tables = config.tables.clone();
    let summary = Engine::new(config.engine_config()).run(tables).await?;

    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }

    // Failed tables are reported, not fatal.
    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<(), MoverError> {
    if let Some(mode) = &cli.mode {
        config.operation = mode.parse::<Mode>()?;
    }
    if let Some(path) = &cli.path {
        config.path = path.clone();
    }
    if let Some(v) = cli.page_size {
        config.process.page_size = v;
    }
    if let Some(v) = cli.parallel_tables {
        config.process.parallel_tables = v;
    }
    if let Some(v) = cli.parallel_pages {
        config.process.parallel_pages = v;
    }
    if let Some(v) = cli.max_connections {
        config.process.max_connections = v;
    }
    if let Some(v) = cli.fetch_size {
        config.process.fetch_size = v;
    }
    config.validate()
}

fn print_summary(summary: &RunSummary) {
    println!("\n{} {}", summary.mode, summary.status.replace('_', " "));
    println!("  Run ID: {}", summary.run_id);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!("  Tables: {}/{}", summary.tables_success, summary.tables_total);
    println!("  Rows: {}", summary.rows_processed);
    println!("  Throughput: {} rows/sec", summary.rows_per_second);
    for failed in &summary.failed_tables {
        println!("  Failed: {} - {}", failed.table, failed.error);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for the summary.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
