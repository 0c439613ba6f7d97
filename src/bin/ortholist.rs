use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ortholist::app::{App, SourceInput, TracingSink};
use ortholist::config::{ConfigLoader, ResolvedConfig};
use ortholist::domain::{Namespace, Organism, RawIdentifier, SourceDatabase};
use ortholist::error::OrthoError;
use ortholist::input::read_source_rows;
use ortholist::lifecycle::LifecycleTracker;
use ortholist::output::{JsonOutput, TextOutput};
use ortholist::provider::{Layered, LookupProvider};
use ortholist::resolver::Resolver;
use ortholist::store::ResultStore;
use ortholist::uniprot::{UniprotHistory, UniprotHttpClient};

#[derive(Parser)]
#[command(name = "ortholist")]
#[command(about = "Consensus list of worm-human orthologs from six prediction databases")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile all configured sources and write the consensus tables")]
    Run(RunArgs),
    #[command(about = "Resolve one identifier and show how it was resolved")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    /// Restrict the run to these sources (repeatable).
    #[arg(long = "source", value_enum)]
    sources: Vec<SourceDatabase>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ResolveArgs {
    id: String,

    #[arg(long)]
    namespace: String,

    #[arg(long, value_enum)]
    organism: Organism,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<OrthoError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &OrthoError) -> u8 {
    match error {
        OrthoError::MissingConfig
        | OrthoError::ConfigRead(_)
        | OrthoError::ConfigParse(_)
        | OrthoError::TableParse { .. } => 2,
        OrthoError::ProviderUnavailable(_)
        | OrthoError::LookupTransient(_)
        | OrthoError::UniprotHttp(_)
        | OrthoError::UniprotStatus { .. }
        | OrthoError::Aborted => 3,
        OrthoError::LifecycleCycle { .. } | OrthoError::LifecycleDepthExceeded { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.command {
        Commands::Run(args) => args.config.as_deref(),
        Commands::Resolve(args) => args.config.as_deref(),
    };
    let config = ConfigLoader::resolve(config_path)?;
    let tables = config.load_lookup()?;

    if config.uniprot_history {
        let history = UniprotHistory::new(UniprotHttpClient::new()?)?;
        execute(Layered::new(tables, history), &config, cli.command)
    } else {
        execute(tables, &config, cli.command)
    }
}

fn execute<L: LookupProvider>(
    provider: L,
    config: &ResolvedConfig,
    command: Commands,
) -> miette::Result<()> {
    let resolver = Resolver::new(provider, config.load_overrides()?)
        .with_retry(config.retry)
        .with_history_concurrency(config.max_concurrent_history)
        .with_failure_limit(config.max_consecutive_failures);
    let tracker = LifecycleTracker::new(config.load_lifecycle()?, config.release.clone())
        .with_max_depth(config.max_lifecycle_depth)
        .with_retry(config.retry);
    let mut app = App::new(resolver, tracker);

    match command {
        Commands::Run(args) => {
            if let Some(reference) = config.load_human_reference()? {
                app = app.with_human_reference(reference);
            }
            let inputs = config
                .select_sources(&args.sources)?
                .into_iter()
                .map(|spec| {
                    let read = read_source_rows(&spec.path, spec.layout)?;
                    Ok(SourceInput::from_rows(spec.database, read))
                })
                .collect::<Result<Vec<_>, OrthoError>>()?;
            let result = match app.run(&inputs, &TracingSink) {
                Ok(result) => result,
                Err(failure) => {
                    let finished = failure
                        .completed
                        .iter()
                        .map(|source| source.source.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    tracing::error!(finished = %finished, "no results written");
                    return Err(failure.error.into());
                }
            };
            let stored = ResultStore::new(config.output_dir.clone()).write_run(&result)?;
            let report = result.report();
            if args.json {
                JsonOutput::print_run(&report, &stored).into_diagnostic()?;
            } else {
                TextOutput::print_run(&report, &stored).into_diagnostic()?;
            }
        }
        Commands::Resolve(args) => {
            let namespace: Namespace = args.namespace.parse()?;
            let raw = RawIdentifier::new(&args.id, namespace, args.organism)?;
            let report = app.resolve_one(&raw)?;
            if args.json {
                JsonOutput::print_resolve(&report).into_diagnostic()?;
            } else {
                TextOutput::print_resolve(&report).into_diagnostic()?;
            }
        }
    }
    Ok(())
}
