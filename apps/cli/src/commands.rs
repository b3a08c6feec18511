//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use itinera_core::{
    ItinerarySource, PlannedTrip, ProgressReporter, extract_from_stream, local_today,
    plan_trip_or_mock,
};
use itinera_extract::mock_itinerary;
use itinera_shared::{
    AppConfig, DefaultsConfig, ExtractedItinerary, TravelRequestParams, init_config, load_config,
    load_config_from,
};
use itinera_stream::{StreamObserver, StreamOptions};

/// Chunk size used when replaying a capture from disk.
const REPLAY_CHUNK_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// itinera — plan trips with a streaming chat bot.
#[derive(Parser)]
#[command(
    name = "itinera",
    version,
    about = "Plan trips with an upstream chat bot and turn its streamed answer into a structured itinerary.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.itinera/itinera.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ask the upstream bot for an itinerary.
    Plan {
        #[command(flatten)]
        trip: TripArgs,

        /// Bot identifier (overrides the config file).
        #[arg(long, env = "ITINERA_BOT_ID")]
        bot_id: Option<String>,

        /// Fail instead of printing the offline itinerary when the upstream fails.
        #[arg(long)]
        no_fallback: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Replay a recorded event-stream capture through the extractor.
    Parse {
        /// Capture file (raw response body).
        file: PathBuf,

        #[command(flatten)]
        trip: TripArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the offline itinerary for a request.
    Mock {
        #[command(flatten)]
        trip: TripArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Trip request flags shared by `plan`, `parse` and `mock`.
#[derive(Args, Debug)]
pub(crate) struct TripArgs {
    /// Origin location.
    #[arg(long = "from")]
    pub from: Option<String>,

    /// Destination, if already decided.
    #[arg(long = "to")]
    pub to: Option<String>,

    /// Day count: N or N-M.
    #[arg(long)]
    pub days: Option<String>,

    /// Traveler count: N or N-M.
    #[arg(long)]
    pub travelers: Option<String>,

    /// Free-text preference (food, history, hiking, ...).
    #[arg(long)]
    pub preference: Option<String>,

    /// Budget in yuan.
    #[arg(long)]
    pub budget: Option<String>,
}

impl TripArgs {
    fn into_params(self, defaults: &DefaultsConfig) -> TravelRequestParams {
        TravelRequestParams {
            location: self.from.unwrap_or_default(),
            destination: self.to,
            days: self.days.unwrap_or_else(|| defaults.days.clone()),
            travelers: Some(self.travelers.unwrap_or_else(|| defaults.travelers.clone())),
            preference: self.preference,
            budget: self.budget,
        }
    }
}

/// Output flags.
#[derive(Args, Debug)]
pub(crate) struct OutputArgs {
    /// Print the itinerary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Also write the itinerary as JSON to this file.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "itinera=warn",
        1 => "itinera=info",
        2 => "itinera=debug",
        _ => "itinera=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Plan {
            trip,
            bot_id,
            no_fallback,
            output,
        } => {
            let mut config = resolve_config(config_path.as_deref())?;
            if let Some(bot_id) = bot_id {
                config.upstream.bot_id = bot_id;
            }
            if no_fallback {
                config.defaults.fallback_to_mock = false;
            }
            cmd_plan(trip, &config, &output).await
        }
        Command::Parse { file, trip, output } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_parse(&file, trip, &config, &output).await
        }
        Command::Mock { trip, output } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_mock(trip, &config, &output)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_plan(trip: TripArgs, config: &AppConfig, output: &OutputArgs) -> Result<()> {
    let params = trip.into_params(&config.defaults);
    params.validate()?;

    info!(
        from = %params.location,
        to = params.destination.as_deref().unwrap_or("-"),
        days = %params.days,
        "planning trip"
    );

    let reporter = CliProgress::new();
    let result = plan_trip_or_mock(&params, config, &reporter).await;
    reporter.finish();
    let trip = result?;

    if let ItinerarySource::Mock { reason } = &trip.source {
        eprintln!("warning: upstream unavailable ({reason}); showing offline itinerary");
    }

    emit(&trip.itinerary, output)?;
    if !output.json {
        println!("  Source: {}", describe_source(&trip.source));
        println!("  Time:   {:.1}s", trip.elapsed.as_secs_f64());
        println!();
    }
    Ok(())
}

async fn cmd_parse(
    file: &Path,
    mut trip: TripArgs,
    config: &AppConfig,
    output: &OutputArgs,
) -> Result<()> {
    let bytes = std::fs::read(file).wrap_err_with(|| format!("cannot read {}", file.display()))?;
    trip.from.get_or_insert_with(|| "未指定".to_string());
    let params = trip.into_params(&config.defaults);

    info!(file = %file.display(), bytes = bytes.len(), "replaying capture");

    let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = bytes
        .chunks(REPLAY_CHUNK_BYTES)
        .map(|c| Ok(c.to_vec()))
        .collect();

    let reporter = CliProgress::new();
    reporter.phase("Replaying capture");
    let result = extract_from_stream(
        &params,
        futures::stream::iter(chunks),
        &StreamOptions::from(&config.stream),
        local_today(),
        &reporter,
    )
    .await;
    reporter.finish();

    emit(&result?, output)
}

fn cmd_mock(trip: TripArgs, config: &AppConfig, output: &OutputArgs) -> Result<()> {
    let params = trip.into_params(&config.defaults);
    params.validate()?;
    emit(&mock_itinerary(&params, local_today()), output)
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn emit(itinerary: &ExtractedItinerary, output: &OutputArgs) -> Result<()> {
    if output.json || output.out.is_some() {
        let json = serde_json::to_string_pretty(itinerary)?;
        if let Some(path) = &output.out {
            std::fs::write(path, &json)
                .wrap_err_with(|| format!("cannot write {}", path.display()))?;
            eprintln!("Itinerary written to {}", path.display());
        }
        if output.json {
            println!("{json}");
            return Ok(());
        }
    }
    print_itinerary(itinerary);
    Ok(())
}

fn print_itinerary(it: &ExtractedItinerary) {
    println!();
    println!("  Destination: {}", it.destination);
    println!(
        "  Dates:       {} → {} ({} days)",
        it.start_date,
        it.end_date,
        it.duration_days()
    );
    println!("  Budget:      {}", it.budget);
    println!();

    for (heading, body) in [
        ("旅行推荐", &it.title),
        ("行程规划", &it.plan),
        ("旅行红黑榜", &it.highlights),
    ] {
        if body.is_empty() {
            continue;
        }
        println!("  ## {heading}");
        for line in body.lines() {
            println!("  {line}");
        }
        println!();
    }

    println!("  ## Daily outline");
    for day in &it.daily_plans {
        println!("  {} ({})", day.title, day.date);
        for activity in &day.activities {
            println!("    {}  {}", activity.time, activity.description);
        }
    }
    println!();

    let r = &it.recommendations;
    println!("  Stay:    {}", r.accommodation.join(" / "));
    println!("  Getting around: {}", r.transportation.join(" / "));
    println!("  Must see: {}", r.must_visit.join(" / "));
    println!();
}

fn describe_source(source: &ItinerarySource) -> String {
    match source {
        ItinerarySource::Remote { text } => format!("upstream ({text:?})"),
        ItinerarySource::Mock { .. } => "offline generator".to_string(),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    frames: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            frames: AtomicUsize::new(0),
        }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl StreamObserver for CliProgress {
    fn frame_received(&self, _event_type: &str) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn text_progress(&self, chars: usize) {
        let frames = self.frames.load(Ordering::Relaxed);
        self.spinner
            .set_message(format!("Receiving itinerary [{frames} events, {chars} chars]"));
    }

    fn frame_skipped(&self, reason: &str) {
        self.spinner.set_message(format!("Skipped an event: {reason}"));
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _trip: &PlannedTrip) {
        self.spinner.finish_and_clear();
    }
}
