use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use oasis_fetch::app::{App, FetchOptions};
use oasis_fetch::chunked::{
    CancellationToken, ChunkFailurePolicy, DEFAULT_END_COLUMN, DEFAULT_START_COLUMN, RangeRequest,
};
use oasis_fetch::config::{ConfigLoader, ResolvedConfig};
use oasis_fetch::error::OasisError;
use oasis_fetch::fetch::OasisHttpClient;
use oasis_fetch::generate::{DEFAULT_PAGES, build_catalog, scrape_endpoint_urls};
use oasis_fetch::output::{JsonOutput, LogSink};
use oasis_fetch::time::{ChunkSize, CivilTime};
use oasis_fetch::url::{QuerySpec, parse_param};

#[derive(Parser)]
#[command(name = "oasis")]
#[command(about = "Query the CAISO OASIS reporting API and flatten its reports into CSV")]
#[command(version, author)]
struct Cli {
    /// JSON config file (default: ./oasis.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Inspect the endpoint catalog")]
    Reports(ReportsArgs),
    #[command(about = "Print the request URL for a report")]
    Url(QueryArgs),
    #[command(about = "Download one report bundle and write a CSV per report file")]
    Fetch(FetchArgs),
    #[command(about = "Fetch a long time range in chunks and write one CSV")]
    Range(RangeArgs),
    #[command(about = "Download every sample query in the catalog for a window")]
    Sweep(SweepArgs),
    #[command(about = "Maintain the endpoint catalog")]
    Catalog(CatalogArgs),
}

#[derive(Args)]
struct ReportsArgs {
    #[command(subcommand)]
    command: ReportsCommand,
}

#[derive(Subcommand)]
enum ReportsCommand {
    #[command(about = "List report names and their request style")]
    List,
    #[command(about = "Show the sample parameters for a report")]
    Params { name: String },
}

#[derive(Args, Clone)]
struct QueryArgs {
    name: String,

    #[arg(long)]
    start: Option<CivilTime>,

    #[arg(long)]
    end: Option<CivilTime>,

    /// Extra query parameter, e.g. -p market_run_id=RTM
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

impl QueryArgs {
    fn into_query(self) -> QuerySpec {
        QuerySpec {
            report_name: self.name,
            start: self.start,
            end: self.end,
            extra_params: self.params,
        }
    }
}

#[derive(Args)]
struct FetchArgs {
    #[command(flatten)]
    query: QueryArgs,

    #[arg(long)]
    dest: Option<PathBuf>,

    /// Keep rows whose KEY is one of the values, e.g. --filter RESOURCE_NAME=NP15,SP15
    #[arg(long, value_parser = parse_filter)]
    filter: Vec<(String, Vec<String>)>,

    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args)]
struct RangeArgs {
    name: String,

    #[arg(long)]
    start: CivilTime,

    #[arg(long)]
    end: CivilTime,

    /// Window per request, e.g. 1h or 4d (default from config)
    #[arg(long)]
    chunk: Option<ChunkSize>,

    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    #[arg(long)]
    dest: Option<PathBuf>,

    #[arg(long)]
    keep_temp_files: bool,

    #[arg(long, default_value = DEFAULT_START_COLUMN)]
    start_column: String,

    #[arg(long, default_value = DEFAULT_END_COLUMN)]
    end_column: String,

    #[arg(long, value_delimiter = ',')]
    sort_by: Option<Vec<String>>,

    #[arg(long)]
    skip_failed_chunks: bool,

    #[arg(long)]
    deadline_mins: Option<u64>,

    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args)]
struct SweepArgs {
    #[arg(long)]
    start: CivilTime,

    #[arg(long)]
    end: CivilTime,

    #[arg(long)]
    dest: Option<PathBuf>,

    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogCommand,
}

#[derive(Subcommand)]
enum CatalogCommand {
    #[command(about = "Build a catalog from the text of the interface specification")]
    Generate {
        /// Text extracted from the PDF, pages separated by form feeds
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = *DEFAULT_PAGES.start())]
        min_page: usize,

        #[arg(long, default_value_t = *DEFAULT_PAGES.end())]
        max_page: usize,
    },
}

#[derive(Serialize)]
struct GenerateResult {
    output: PathBuf,
    endpoints: usize,
    reports: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(oasis) = report.downcast_ref::<OasisError>() {
            return ExitCode::from(map_exit_code(oasis));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &OasisError) -> u8 {
    match error {
        OasisError::Chunk { source, .. } => map_exit_code(source),
        OasisError::UnknownReport(_)
        | OasisError::InvalidParam(_)
        | OasisError::InvalidTimestamp(_)
        | OasisError::InvalidChunkSize(_)
        | OasisError::ConfigRead(_)
        | OasisError::ConfigParse(_) => 2,
        OasisError::Download { .. }
        | OasisError::Archive(_)
        | OasisError::Http(_)
        | OasisError::HttpStatus { .. } => 3,
        OasisError::Cancelled | OasisError::DeadlineExceeded { .. } => 4,
        _ => 1,
    }
}

fn parse_filter(raw: &str) -> Result<(String, Vec<String>), OasisError> {
    let (key, values) = parse_param(raw)?;
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    Ok((key, values))
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Catalog(args) => run_catalog(args),
        command => {
            let transport = OasisHttpClient::new(config.request_timeout)?;
            let app = App::from_config(&config, transport);
            run_with_app(command, &app, &config)
        }
    }
}

fn run_with_app(
    command: Commands,
    app: &App<OasisHttpClient>,
    config: &ResolvedConfig,
) -> miette::Result<()> {
    let sink = LogSink;
    match command {
        Commands::Reports(args) => match args.command {
            ReportsCommand::List => JsonOutput::print(&app.report_names()?).into_diagnostic(),
            ReportsCommand::Params { name } => {
                JsonOutput::print(&app.report_params(&name)?).into_diagnostic()
            }
        },
        Commands::Url(args) => {
            JsonOutput::print(&app.build_url(&args.into_query())?).into_diagnostic()
        }
        Commands::Fetch(args) => {
            let options = FetchOptions {
                destination: args.dest.unwrap_or_else(|| config.download_dir.clone()),
                max_attempts: args.max_attempts.unwrap_or(config.max_attempts),
                filters: args.filter,
            };
            let result = app.fetch(&args.query.into_query(), &options, &sink)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        Commands::Range(args) => {
            let chunk_size = args
                .chunk
                .unwrap_or_else(|| config.chunk_size_for(&args.name));
            let mut request = RangeRequest::new(args.name, args.start, args.end);
            request.chunk_size = chunk_size;
            request.query_params = args.params;
            request.max_attempts = args.max_attempts.unwrap_or(config.max_attempts);
            request.start_column = args.start_column;
            request.end_column = args.end_column;
            if let Some(sort_by) = args.sort_by {
                request.sort_by = sort_by;
            }
            request.destination = args.dest.unwrap_or_else(|| config.download_dir.clone());
            request.keep_temp_files = args.keep_temp_files;
            if args.skip_failed_chunks {
                request.failure_policy = ChunkFailurePolicy::Skip;
            }
            request.deadline = args
                .deadline_mins
                .map(|minutes| Duration::from_secs(minutes * 60));

            let result = app.fetch_range(&request, CancellationToken::new(), &sink)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        Commands::Sweep(args) => {
            let destination = args.dest.unwrap_or_else(|| config.download_dir.clone());
            let result = app.sweep(
                &args.start,
                &args.end,
                &destination,
                args.max_attempts.unwrap_or(config.max_attempts),
                &sink,
            )?;
            JsonOutput::print(&result).into_diagnostic()
        }
        Commands::Catalog(args) => run_catalog(args),
    }
}

fn run_catalog(args: CatalogArgs) -> miette::Result<()> {
    match args.command {
        CatalogCommand::Generate {
            input,
            output,
            min_page,
            max_page,
        } => {
            let text = fs::read_to_string(&input)
                .map_err(|err| OasisError::Filesystem(format!("read {}: {err}", input.display())))?;
            let urls = scrape_endpoint_urls(&text, min_page..=max_page);
            let catalog = build_catalog(&urls);
            let json = serde_json::to_string_pretty(&catalog)
                .map_err(|err| OasisError::CatalogParse(err.to_string()))?;
            fs::write(&output, json)
                .map_err(|err| OasisError::Filesystem(format!("write {}: {err}", output.display())))?;

            let reports = catalog
                .values()
                .flat_map(|paths| paths.values())
                .map(|reports| reports.len())
                .sum();
            JsonOutput::print(&GenerateResult {
                output,
                endpoints: urls.len(),
                reports,
            })
            .into_diagnostic()
        }
    }
}
