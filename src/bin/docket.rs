use std::io::IsTerminal;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use docket_pipeline::app::{
    App, FetchSourcesResult, PipelineResult, ProgressSinkKind, RunOptions, StatusResult, Target,
};
use docket_pipeline::citations::{CitationMatch, CitationService, CourtListenerClient, Opinion};
use docket_pipeline::config::{ConfigLoader, Credentials};
use docket_pipeline::domain::ClusterId;
use docket_pipeline::error::DocketError;
use docket_pipeline::output::{JsonOutput, OutputMode};
use docket_pipeline::oyez::{DiscoveryReport, OyezClient};
use docket_pipeline::pipeline::Estimate;
use docket_pipeline::scoring::ConfiguredScorer;
use docket_pipeline::scotus::ScotusClient;
use docket_pipeline::sources::AmicusMode;
use docket_pipeline::text::PdfToTextExtractor;
use docket_pipeline::tui::Tui;

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Court docket acquisition and resumable per-case analysis pipeline")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to a docket.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover the term's cases and track new ones")]
    Discover(DiscoverArgs),
    #[command(about = "Download briefs and transcripts")]
    FetchSources(FetchSourcesArgs),
    #[command(about = "Run the analysis pipeline")]
    Run(RunArgs),
    #[command(about = "Show tracked cases")]
    Status,
}

#[derive(Args)]
struct DiscoverArgs {
    /// Term year, e.g. 2025 or OT2025.
    term: Option<String>,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct FetchSourcesArgs {
    /// Docket number or case directory.
    target: Option<String>,

    #[arg(long, conflicts_with = "target")]
    all: bool,

    /// Keep the first amicus briefs instead of scoring every candidate.
    #[arg(long)]
    skip_amicus: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Docket number or case directory; every ready case when omitted.
    target: Option<String>,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    estimate: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive || !std::io::stdout().is_terminal() {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let credentials = Credentials::from_env();
    let app = App::from_config(config).into_diagnostic()?;

    match cli.command {
        Commands::Discover(args) => run_discover(args, app, output_mode),
        Commands::FetchSources(args) => run_fetch_sources(args, app, credentials, output_mode),
        Commands::Run(args) => run_pipeline(args, app, credentials, output_mode),
        Commands::Status => run_status(app, output_mode),
    }
}

fn run_discover(args: DiscoverArgs, app: App, output_mode: OutputMode) -> miette::Result<()> {
    let source = OyezClient::new(&app.config().oyez).into_diagnostic()?;
    let term = args
        .term
        .map(|term| term.trim().trim_start_matches("OT").to_string());
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app
                .discover(&source, term.as_deref(), args.force, &JsonOutput)
                .into_diagnostic()?;
            JsonOutput::print_discovery(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Discover, app.store().status_path());
            let result = tui.run(move |sink| app.discover(&source, term.as_deref(), args.force, sink))?;
            print_discovery_summary(&result);
            Ok(())
        }
    }
}

fn run_fetch_sources(
    args: FetchSourcesArgs,
    app: App,
    credentials: Credentials,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let target = match (args.target, args.all) {
        (Some(target), false) => Target::Case(target),
        (None, true) => Target::All,
        _ => {
            return Err(miette::Report::msg(
                "pass a docket number, a case directory, or --all",
            ));
        }
    };
    let mode = if args.skip_amicus {
        AmicusMode::FirstN
    } else {
        AmicusMode::Scored
    };

    let site = ScotusClient::new(&app.config().scotus, &app.config().term).into_diagnostic()?;
    let scorer = ConfiguredScorer::new(
        &app.config().scoring,
        credentials.anthropic_api_key.as_deref(),
    )
    .into_diagnostic()?;
    let extractor = PdfToTextExtractor::from_path();

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app
                .fetch_sources(&site, &scorer, &extractor, &target, mode, &JsonOutput)
                .into_diagnostic()?;
            JsonOutput::print_fetch_sources(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::FetchSources, app.store().status_path());
            let result = tui.run(move |sink| {
                app.fetch_sources(&site, &scorer, &extractor, &target, mode, sink)
            })?;
            print_fetch_summary(&result);
            Ok(())
        }
    }
}

fn run_pipeline(
    args: RunArgs,
    app: App,
    credentials: Credentials,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let target = match args.target {
        Some(target) => Target::Case(target),
        None => Target::All,
    };
    let options = RunOptions { force: args.force };
    let extractor = PdfToTextExtractor::from_path();

    if args.estimate {
        let citations = NopCitations;
        let runner = app.pipeline(&citations, &extractor);
        let estimate = app.estimate(&runner, &target, options).into_diagnostic()?;
        return match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_estimate(&estimate).into_diagnostic(),
            OutputMode::Interactive => {
                print_estimate(&estimate);
                Ok(())
            }
        };
    }

    let token = credentials.require_courtlistener().into_diagnostic()?;
    let citations = CourtListenerClient::new(&app.config().courtlistener, token).into_diagnostic()?;

    match output_mode {
        OutputMode::NonInteractive => {
            let runner = app.pipeline(&citations, &extractor);
            let result = app
                .run_pipeline(&runner, &target, options, &JsonOutput)
                .into_diagnostic()?;
            JsonOutput::print_pipeline(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Run, app.store().status_path());
            let result = tui.run(move |sink| {
                let runner = app.pipeline(&citations, &extractor);
                app.run_pipeline(&runner, &target, options, sink)
            })?;
            print_pipeline_summary(&result);
            Ok(())
        }
    }
}

fn run_status(app: App, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.status(&JsonOutput).into_diagnostic()?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_status(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_status(&result);
            Ok(())
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_discovery_summary(result: &DiscoveryReport) {
    println!("{CYAN}Docket discovery {}{RESET}", result.term);
    println!("  Listed:   {}", result.listed);
    println!("  Tracked:  {}", result.tracked);
    println!("{GREEN}  New:      {}{RESET}", result.new_cases.len());
    for docket in &result.new_cases {
        println!("    + {docket}");
    }
    println!("  Argued:   {}", result.argued);
    println!("  Decided:  {}", result.decided);
    println!("  Ready:    {}", result.ready);
    println!("  Complete: {}", result.complete);
}

fn print_fetch_summary(result: &FetchSourcesResult) {
    println!("{CYAN}Source fetch{RESET}");
    for case in &result.cases {
        match (&case.outcome, &case.error) {
            (Some(outcome), _) => {
                let color = if case.pipeline_ready() { GREEN } else { YELLOW };
                println!(
                    "{color}  {}: {} party briefs, {} amicus, transcript {}{RESET}",
                    case.docket,
                    outcome.party_brief_count,
                    outcome.amicus_count,
                    if outcome.transcript_available {
                        "yes"
                    } else {
                        "not yet available"
                    }
                );
            }
            (None, Some(error)) => println!("{RED}  {}: {error}{RESET}", case.docket),
            (None, None) => {}
        }
    }
    println!("  {}/{} cases pipeline-ready", result.ready, result.cases.len());
}

fn print_pipeline_summary(result: &PipelineResult) {
    println!("{CYAN}Pipeline{RESET}");
    if result.cases.is_empty() {
        println!("  No cases ready for pipeline processing.");
        println!("  Run `docket discover` then `docket fetch-sources --all` first.");
        return;
    }
    for case in &result.cases {
        match &case.error {
            None => println!("{GREEN}  {}: complete{RESET}", case.docket),
            Some(error) => println!("{RED}  {}: {error}{RESET}", case.docket),
        }
    }
    println!("  Succeeded: {}   Failed: {}", result.succeeded, result.failed);
}

fn print_estimate(estimate: &Estimate) {
    println!("{CYAN}Cost estimate{RESET}");
    println!("  Cases to process: {}", estimate.cases.len());
    println!("  Estimated total:  ~${:.2}", estimate.total);
    for case in &estimate.cases {
        println!("  {}: ~${:.2}", case.docket, case.cost);
        if !case.steps.is_empty() {
            println!("    Steps: {}", case.steps.join(", "));
        }
    }
}

fn print_status(result: &StatusResult) {
    println!(
        "{CYAN}{} cases tracked ({}){RESET}",
        result.tracked,
        result.term.as_deref().unwrap_or("no term")
    );
    println!(
        "  discovered {}   briefs {}   ready {}   complete {}",
        result.discovered, result.briefs_downloaded, result.pipeline_ready, result.pipeline_complete
    );
    for case in &result.cases {
        println!(
            "  {:<10} {:<18} {}",
            case.docket.as_str(),
            case.state.to_string(),
            case.name
        );
    }
}

/// Stands in for the citation service where no request is made.
struct NopCitations;

impl CitationService for NopCitations {
    fn lookup(&self, _text: &str) -> Result<Vec<CitationMatch>, DocketError> {
        Err(DocketError::MissingCredential("COURTLISTENER_API_TOKEN"))
    }

    fn sub_opinion_urls(&self, _cluster: ClusterId) -> Result<Vec<String>, DocketError> {
        Err(DocketError::MissingCredential("COURTLISTENER_API_TOKEN"))
    }

    fn opinion(&self, _url: &str) -> Result<Opinion, DocketError> {
        Err(DocketError::MissingCredential("COURTLISTENER_API_TOKEN"))
    }
}
