use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_gene_aggregator::app::{App, open_store};
use kira_gene_aggregator::cache::CacheCategory;
use kira_gene_aggregator::config::ConfigLoader;
use kira_gene_aggregator::domain::GeneRequest;
use kira_gene_aggregator::envelope::ErrorEnvelope;
use kira_gene_aggregator::error::{ErrorCategory, KiraError};
use kira_gene_aggregator::output::JsonOutput;

#[derive(Parser)]
#[command(name = "kira-ga")]
#[command(about = "Everything the public registries know about one gene, as one JSON document")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Keep rate-limit, cache, metrics and session state in process memory.
    #[arg(long, global = true)]
    memory_store: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Aggregated gene summary")]
    Summary(GeneArgs),
    #[command(about = "Pathways and regulation from BioCyc (requires credentials)")]
    Regulation(GeneArgs),
    #[command(about = "Per-upstream call metrics")]
    Stats(StatsArgs),
    #[command(about = "Manage cached upstream responses")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct GeneArgs {
    symbol: String,

    #[arg(long, default_value = "Escherichia coli")]
    organism: String,
}

#[derive(Args)]
struct StatsArgs {
    #[arg(long, default_value_t = 60)]
    window_minutes: u64,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Delete every cached entry of a category")]
    Purge { category: String },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(kira) = report.downcast_ref::<KiraError>() {
                return ExitCode::from(map_exit_code(kira.category()));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::NotFound | ErrorCategory::Validation => 2,
        ErrorCategory::ExternalApi | ErrorCategory::Timeout | ErrorCategory::RateLimited => 3,
        ErrorCategory::Auth => 4,
        ErrorCategory::Internal => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = open_store(&config, cli.memory_store)?;
    let app = App::from_config(&config, store)?;

    match cli.command {
        Commands::Summary(args) => {
            let request = GeneRequest::new(args.symbol, args.organism);
            match app.summary(&request) {
                Ok(summary) => {
                    JsonOutput::print_summary(&summary).into_diagnostic()?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(envelope) => print_envelope(&envelope),
            }
        }
        Commands::Regulation(args) => {
            let request = GeneRequest::new(args.symbol, args.organism);
            match app.regulation(&request) {
                Ok(summary) => {
                    JsonOutput::print_regulation(&summary).into_diagnostic()?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(envelope) => print_envelope(&envelope),
            }
        }
        Commands::Stats(args) => {
            let window = Duration::from_secs(args.window_minutes.max(1) * 60);
            JsonOutput::print_stats(&app.stats(window)).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache(CacheArgs {
            command: CacheCommand::Purge { category },
        }) => {
            let category: CacheCategory = category.parse()?;
            JsonOutput::print_purge(&app.purge(category)).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_envelope(envelope: &ErrorEnvelope) -> miette::Result<ExitCode> {
    JsonOutput::print_error(envelope).into_diagnostic()?;
    let code = envelope.category().map(map_exit_code).unwrap_or(1);
    Ok(ExitCode::from(code))
}
