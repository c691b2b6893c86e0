//! Vitals Sync CLI
//!
//! Keeps a live window of one user's health readings and prints summaries.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vitals_sync::{
    config::Config,
    core::{average, filter_since, MetricAverages, ReferenceRanges, SummaryBuilder, SyncWindow},
    source::{
        EventSink, FetchError, MemorySource, MetricRecord, RemoteSource, SubscriptionHandle,
        UserId,
    },
    stats::{create_shared_stats_with_persistence, SyncStats},
    SessionState, SyncSession, VERSION,
};

#[cfg(feature = "remote")]
use vitals_sync::source::{NewRecord, RestSource};

#[derive(Parser)]
#[command(name = "vitals-sync")]
#[command(version = VERSION)]
#[command(about = "Live health telemetry window and summaries", long_about = None)]
struct Cli {
    /// User whose readings to sync (defaults to `default_user` in the config)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Replay a JSON array of records instead of the remote store
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow readings live until Ctrl+C
    Watch {
        /// Rows shown after every change
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show the dashboard summary
    Summary {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent readings
    Table {
        /// Number of rows
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show averages over a period
    Averages {
        /// Period length in days
        #[arg(long, default_value = "7")]
        days: u32,
    },

    /// Store a new reading (requires remote feature)
    #[cfg(feature = "remote")]
    Add {
        #[arg(long)]
        heart_rate: i32,
        #[arg(long)]
        blood_oxygen: i32,
        #[arg(long)]
        temperature: f64,
        #[arg(long)]
        activity_level: i32,
        /// Flag the reading as anomalous
        #[arg(long)]
        anomaly: bool,
    },

    /// Show sync statistics and store connectivity
    Status,

    /// Show configuration
    Config,

    /// Serve the dashboard over HTTP (requires server feature)
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind on 127.0.0.1
        #[arg(long, default_value = "8787")]
        port: u16,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { limit } => {
            cmd_watch(cli.user, cli.input, limit);
        }
        Commands::Summary { json } => {
            cmd_summary(cli.user, cli.input, json);
        }
        Commands::Table { limit } => {
            cmd_table(cli.user, cli.input, limit);
        }
        Commands::Averages { days } => {
            cmd_averages(cli.user, cli.input, days);
        }
        #[cfg(feature = "remote")]
        Commands::Add {
            heart_rate,
            blood_oxygen,
            temperature,
            activity_level,
            anomaly,
        } => {
            let record = NewRecord {
                user_id: resolve_user(cli.user, &load_config()),
                heart_rate,
                blood_oxygen,
                temperature,
                activity_level,
                timestamp: Utc::now(),
                anomaly,
            };
            cmd_add(record);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
        #[cfg(feature = "server")]
        Commands::Serve { port } => {
            cmd_serve(cli.user, cli.input, port);
        }
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Where readings come from for this run.
enum Source {
    Memory(MemorySource),
    #[cfg(feature = "remote")]
    Rest(RestSource),
}

impl RemoteSource for Source {
    fn fetch_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, FetchError> {
        match self {
            Source::Memory(source) => source.fetch_recent(user_id, limit),
            #[cfg(feature = "remote")]
            Source::Rest(source) => source.fetch_recent(user_id, limit),
        }
    }

    fn subscribe(
        &self,
        user_id: &UserId,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, FetchError> {
        match self {
            Source::Memory(source) => source.subscribe(user_id, sink),
            #[cfg(feature = "remote")]
            Source::Rest(source) => source.subscribe(user_id, sink),
        }
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        match self {
            Source::Memory(source) => source.unsubscribe(handle),
            #[cfg(feature = "remote")]
            Source::Rest(source) => source.unsubscribe(handle),
        }
    }
}

fn open_source(input: Option<&Path>, config: &Config) -> Result<Source, FetchError> {
    if let Some(path) = input {
        return MemorySource::load_json(path).map(Source::Memory);
    }

    open_remote(config)
}

#[cfg(feature = "remote")]
fn open_remote(config: &Config) -> Result<Source, FetchError> {
    RestSource::from_config(config).map(Source::Rest)
}

#[cfg(not(feature = "remote"))]
fn open_remote(_config: &Config) -> Result<Source, FetchError> {
    Err(FetchError::Config(
        "no --input file given and remote support is not compiled in".to_string(),
    ))
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {e}; using defaults");
            Config::default()
        }
    }
}

fn resolve_user(user: Option<String>, config: &Config) -> UserId {
    match user.or_else(|| config.default_user.clone()) {
        Some(id) if !id.trim().is_empty() => UserId::new(id),
        _ => {
            eprintln!("Error: no user given.");
            eprintln!("Pass --user <ID> or set default_user in {:?}", Config::config_path());
            std::process::exit(1);
        }
    }
}

fn display_timezone(config: &Config) -> Tz {
    config.timezone().unwrap_or_else(|e| {
        eprintln!("Warning: {e}; showing times in UTC");
        chrono_tz::UTC
    })
}

/// Fetch one page into a fresh window, for one-shot commands.
fn load_window(user: Option<String>, input: Option<PathBuf>) -> (Config, SyncWindow) {
    let config = load_config();
    let user_id = resolve_user(user, &config);

    let source = match open_source(input.as_deref(), &config) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let records = match source.fetch_recent(&user_id, config.fetch_limit) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error fetching readings: {e}");
            if e.is_retryable() {
                eprintln!("The store may be temporarily unavailable; try again shortly.");
            }
            std::process::exit(1);
        }
    };

    let mut window = SyncWindow::new(user_id, config.window_capacity);
    let report = window.initialize(records);
    if report.foreign > 0 || report.malformed > 0 {
        eprintln!(
            "Warning: dropped {} foreign and {} malformed records",
            report.foreign, report.malformed
        );
    }
    (config, window)
}

fn format_time(timestamp: DateTime<Utc>, tz: &Tz) -> String {
    timestamp.with_timezone(tz).format("%b %d, %H:%M").to_string()
}

fn print_table(records: &[MetricRecord], tz: &Tz, ranges: &ReferenceRanges) {
    println!(
        "{:<15} {:>10} {:>9} {:>8} {:>9}  {}",
        "Time", "Heart Rate", "Blood O2", "Temp", "Activity", "Status"
    );
    for record in records {
        let status = if record.anomaly || !ranges.all_in_range(record) {
            "Alert"
        } else {
            "Normal"
        };
        println!(
            "{:<15} {:>6} bpm {:>8}% {:>6.1}°C {:>8}%  {}",
            format_time(record.timestamp, tz),
            record.heart_rate,
            record.blood_oxygen,
            record.temperature,
            record.activity_level,
            status
        );
    }
}

fn print_averages(label: &str, averages: Option<&MetricAverages>) {
    match averages {
        Some(avg) => {
            println!("{label} ({} readings)", avg.sample_count);
            println!("  Heart rate:     {} bpm", avg.heart_rate);
            println!("  Blood oxygen:   {}%", avg.blood_oxygen);
            println!("  Temperature:    {:.1}°C", avg.temperature);
            println!("  Activity level: {}%", avg.activity_level);
        }
        None => println!("{label}: no readings"),
    }
}

fn cmd_watch(user: Option<String>, input: Option<PathBuf>, limit: usize) {
    println!("Vitals Sync v{VERSION}");
    println!();

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let user_id = resolve_user(user, &config);
    let tz = display_timezone(&config);

    let source = match open_source(input.as_deref(), &config) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let mut session = SyncSession::new(source, user_id.clone(), config.session_options())
        .with_stats(stats.clone());

    let ranges = config.ranges.clone();
    session.on_change(Box::new(move |records| {
        println!();
        println!("[{}] {} readings", format_time(Utc::now(), &tz), records.len());
        print_table(&records[..records.len().min(limit)], &tz, &ranges);
    }));

    println!("Watching readings for {user_id}");
    println!("  Window capacity: {}", config.window_capacity);
    println!("  Poll interval: {}s", config.poll_interval.as_secs());
    println!();
    println!("Press Ctrl+C to stop");

    if let Err(e) = session.start() {
        eprintln!("Warning: initial load failed: {e}");
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let mut last_retry = Instant::now();
    while running.load(Ordering::SeqCst) {
        let state = session.state().clone();
        match state {
            SessionState::Ready => {
                let report = session.pump_timeout(Duration::from_millis(200));
                if report.rejected > 0 {
                    eprintln!("Ignored {} rejected events", report.rejected);
                }
            }
            SessionState::Failed(_) => {
                if last_retry.elapsed() >= config.poll_interval {
                    last_retry = Instant::now();
                    if let Err(e) = session.resync() {
                        eprintln!("Retry failed: {e}");
                    }
                }
                std::thread::sleep(Duration::from_millis(200));
            }
            _ => std::thread::sleep(Duration::from_millis(200)),
        }
    }

    println!();
    println!("Stopping...");
    session.dispose();

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save sync statistics: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

fn cmd_summary(user: Option<String>, input: Option<PathBuf>, json: bool) {
    let (config, window) = load_window(user, input);
    let builder = SummaryBuilder::new(config.ranges.clone());
    let now = Utc::now();

    if json {
        println!("{}", builder.build_json(window.user_id(), window.snapshot(), now));
        return;
    }

    let tz = display_timezone(&config);
    let summary = builder.build(window.user_id(), window.snapshot(), now);

    println!("Health Summary for {}", summary.user_id);
    println!("==================={}", "=".repeat(summary.user_id.as_str().len()));
    println!();

    match &summary.latest {
        Some(latest) => {
            println!(
                "Latest reading ({}){}",
                format_time(latest.timestamp, &tz),
                if latest.anomaly { " [anomaly]" } else { "" }
            );
            for field in &latest.fields {
                let trend = field
                    .trend
                    .map(|t| format!(" {t:?}").to_lowercase())
                    .unwrap_or_default();
                println!(
                    "  {:<15} {:>6} {:<4} {:?} (healthy {}){}",
                    field.metric.label(),
                    field.value,
                    field.unit,
                    field.status,
                    field.healthy_range,
                    trend
                );
            }
        }
        None => println!("No readings yet."),
    }

    println!();
    print_averages("Last 7 days", summary.weekly.averages.as_ref());
    println!();
    print_averages("Last 30 days", summary.monthly.averages.as_ref());

    if !summary.monthly.spread.is_empty() {
        println!();
        println!("Spread over 30 days:");
        for spread in &summary.monthly.spread {
            println!(
                "  {:<15} min {:.1}  max {:.1}  sd {:.2}",
                spread.metric.label(),
                spread.stats.min,
                spread.stats.max,
                spread.stats.std_dev
            );
        }
    }
}

fn cmd_table(user: Option<String>, input: Option<PathBuf>, limit: usize) {
    let (config, window) = load_window(user, input);
    let tz = display_timezone(&config);

    if window.is_empty() {
        println!("No readings for {}.", window.user_id());
        return;
    }
    print_table(window.recent(limit), &tz, &config.ranges);
}

fn cmd_averages(user: Option<String>, input: Option<PathBuf>, days: u32) {
    let (_config, window) = load_window(user, input);
    let selected = filter_since(window.snapshot(), days, Utc::now());
    print_averages(&format!("Last {days} days"), average(selected).as_ref());
}

#[cfg(feature = "remote")]
fn cmd_add(record: NewRecord) {
    let config = load_config();
    let source = match RestSource::from_config(&config) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match source.insert(&record) {
        Ok(stored) => println!("Stored reading {} for {}", stored.id, stored.user_id),
        Err(e) => {
            eprintln!("Error storing reading: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_status() {
    let config = load_config();
    println!("Vitals Sync Status");
    println!("==================");
    println!();
    println!("Version: {VERSION}");
    println!(
        "Default user: {}",
        config.default_user.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Store: {}",
        config.store_url.as_deref().unwrap_or("(not configured)")
    );

    #[cfg(feature = "remote")]
    if config.store_url.is_some() {
        match RestSource::from_config(&config).and_then(|source| source.test_connection()) {
            Ok(true) => println!("Store connection: OK"),
            Ok(false) => println!("Store connection: health check failed"),
            Err(e) => println!("Store connection: {e}"),
        }
    }

    println!();
    let stats_path = config.stats_path();
    if stats_path.exists() {
        println!("Previous sessions:");
        println!("{}", SyncStats::with_persistence(stats_path).summary());
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
fn cmd_serve(user: Option<String>, input: Option<PathBuf>, port: u16) {
    use vitals_sync::server::{run, ServerConfig, SharedSnapshot};

    let config = load_config();
    let user_id = resolve_user(user, &config);
    let source = match open_source(input.as_deref(), &config) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let snapshot = SharedSnapshot::new(user_id.clone());
    let stats = create_shared_stats_with_persistence(config.stats_path());
    let mut session =
        SyncSession::new(source, user_id, config.session_options()).with_stats(stats.clone());
    session.on_change(snapshot.observer());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };
    let server_config = ServerConfig::new(port, config.ranges.clone());
    let (addr, shutdown_tx) = match runtime.block_on(run(server_config, snapshot)) {
        Ok(bound) => bound,
        Err(e) => {
            eprintln!("Error starting server: {e}");
            std::process::exit(1);
        }
    };
    println!("Serving dashboard on http://{addr}");
    println!("Press Ctrl+C to stop");

    if let Err(e) = session.start() {
        eprintln!("Warning: initial load failed: {e}");
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let mut last_retry = Instant::now();
    while running.load(Ordering::SeqCst) {
        if session.is_ready() {
            session.pump_timeout(Duration::from_millis(200));
        } else {
            if last_retry.elapsed() >= config.poll_interval {
                last_retry = Instant::now();
                let _ = session.resync();
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    let _ = shutdown_tx.send(());
    session.dispose();
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save sync statistics: {e}");
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: could not install Ctrl+C handler: {e}");
    }
}
