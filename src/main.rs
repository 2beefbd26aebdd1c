use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::{ArgAction, Parser, ValueEnum};
use comfy_table::{ContentArrangement, Table};
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};

mod aggregate;
mod decoder;
mod error;
mod event_xml;
mod model;
mod shell;
mod source;
#[cfg(windows)]
mod windows_live;
mod xlsx;

use crate::aggregate::Aggregation;
use crate::error::AppError;
use crate::shell::{Prompter, Selection};
use crate::source::{RecordSource, SourceOptions};
use crate::xlsx::{ReportOptions, WriteOutcome};

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

const DEFAULT_CONFIG: &str = "EventSummary.toml";

/// Zone in which entered times are read and report timestamps are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZone { Local, Utc }

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat { Text, Json }

#[derive(Parser, Debug, Default)]
#[command(
    name = "EventSummary",
    version,
    about = "Summarize a Windows event log by EventID into an Excel report",
    long_about = "Prompts for an event log and a time window, groups the matching records by their 16-bit EventID and writes log_analysis.xlsx.\n\nOn hosts without the Windows Event Log service, point --evtx-dir at a folder of exported .evtx files."
)]
struct Args {
    #[arg(long, help = "TOML config file (default: ./EventSummary.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Directory the report is written to (default: current directory)")]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "Report file name (default: log_analysis.xlsx)")]
    output_file: Option<String>,
    #[arg(long, help = "Read <Channel>.evtx files from this directory instead of the live log")]
    evtx_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false, help = "Also read Archive-<Channel>-*.evtx files (with --evtx-dir)")]
    include_archives: bool,
    #[arg(long, value_enum, help = "Zone for entered and reported times (default: local)")]
    time_zone: Option<TimeZone>,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
}

impl Args {
    fn tz(&self) -> TimeZone { self.time_zone.unwrap_or(TimeZone::Local) }

    fn report_path(&self) -> PathBuf {
        let dir = self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        dir.join(self.output_file.as_deref().unwrap_or(xlsx::DEFAULT_OUTPUT_FILE))
    }

    fn source_options(&self) -> SourceOptions {
        SourceOptions { evtx_dir: self.evtx_dir.clone(), include_archives: self.include_archives, progress: self.progress }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppConfig {
    output_dir: Option<PathBuf>,
    output_file: Option<String>,
    evtx_dir: Option<PathBuf>,
    include_archives: Option<bool>,
    time_zone: Option<TimeZone>,
    progress: Option<bool>,
    log_level: Option<LogLevel>,
    log_format: Option<LogFormat>,
    log_path: Option<PathBuf>,
    no_color: Option<bool>,
}

/// Config only fills what the command line left unset.
fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.output_dir.is_none() && let Some(v) = cfg.output_dir { args.output_dir = Some(v); }
    if args.output_file.is_none() && let Some(v) = cfg.output_file { args.output_file = Some(v); }
    if args.evtx_dir.is_none() && let Some(v) = cfg.evtx_dir { args.evtx_dir = Some(v); }
    if !args.include_archives && let Some(v) = cfg.include_archives { args.include_archives = v; }
    if args.time_zone.is_none() && let Some(v) = cfg.time_zone { args.time_zone = Some(v); }
    if !args.progress && let Some(v) = cfg.progress { args.progress = v; }
    if args.log_level.is_none() && let Some(v) = cfg.log_level { args.log_level = Some(v); }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
    if !args.no_color && let Some(v) = cfg.no_color { args.no_color = v; }
}

/// An explicit `--config` that cannot be read or parsed is reported; a missing default file is not.
fn load_config(args: &mut Args) {
    let (path, explicit) = match args.config.clone() {
        Some(p) => (p, true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let s = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            if explicit { eprintln!("Failed to read config {}: {}", path.display(), e); }
            return;
        }
    };
    match toml::from_str::<AppConfig>(&s) {
        Ok(cfg) => apply_config(args, cfg),
        Err(e) => eprintln!("Ignoring config {}: {}", path.display(), e),
    }
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if let Some(lvl) = args.log_level {
        let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    } else if args.verbose > 0 {
        let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
        builder.filter_level(f);
    }
    match args.log_format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => {
            builder.format(|buf, record| {
                use std::io::Write;
                let obj = serde_json::json!({
                    "ts": chrono::Local::now().to_rfc3339(),
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{}", obj)
            });
        }
        LogFormat::Text => {
            builder.format(|buf, record| {
                use std::io::Write;
                let ts = chrono::Local::now().format("%H:%M:%S");
                writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
            });
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => eprintln!("Failed to open log file {}: {}", path.display(), e),
        }
    }
    let _ = builder.try_init();
}

fn init_color(args: &Args) {
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

fn summary_table(channel: &str, scanned: usize, matched: usize, unique: usize, skipped: usize) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![paint("Log", "1"), paint("Scanned", "1"), paint("In window", "1"), paint("Unique EventIDs", "1"), paint("Skipped", "1")]);
    table.add_row(vec![channel.to_string(), scanned.to_string(), matched.to_string(), unique.to_string(), skipped.to_string()]);
    table
}

fn report_outcome(out: &WriteOutcome) {
    if let Some(b) = out.backup.as_ref() { println!("Existing report backed up to: {}", b.display()); }
    println!("{}", paint(&format!("Wrote Excel report: {} ({} rows)", out.path.display(), out.rows), "1;32"));
    if let Some(e) = out.degraded.as_ref() { println!("{}", paint(&format!("Report written without formatting ({}).", e), "33")); }
}

fn run(args: &Args) -> Result<(), AppError> {
    let tz = args.tz();
    println!("{}", paint("=== Windows Event Log Analyzer ===", "1;36"));
    let stdin = std::io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), std::io::stdout(), tz);
    let sel = prompter.select(shell::now_in(tz))?;
    log::info!("Selected {} from {} to {}", sel.channel, sel.start, sel.end);
    if !prompter.confirm("Proceed to aggregate and write Excel report now? (y/n)")? {
        println!("Skipping aggregation. Exiting after input step.");
        return Ok(());
    }
    let mut src = source::open_source(&args.source_options())?;
    println!("Reading {} from {}...", sel.channel, src.describe());
    let done = process(src.as_mut(), &sel, &args.report_path(), tz)?;
    report_outcome(&done.outcome);
    println!("{}", summary_table(sel.channel.display_name(), done.scanned, done.matched, done.summary.rows.len(), done.summary.skipped));
    Ok(())
}

struct Processed {
    outcome: WriteOutcome,
    summary: Aggregation,
    scanned: usize,
    matched: usize,
}

/// Fetches the selected window, aggregates it and writes the report to `path`.
fn process(src: &mut dyn RecordSource, sel: &Selection, path: &Path, tz: TimeZone) -> Result<Processed, AppError> {
    let batch = src.fetch(sel.channel, sel.start, sel.end)?;
    log::info!("{} of {} scanned records fall in the window", batch.records.len(), batch.scanned);
    let summary = aggregate::aggregate(&batch.records);
    if summary.skipped > 0 { log::warn!("{} records without an EventID were left out", summary.skipped); }
    if summary.rows.is_empty() { println!("{}", paint("No events found in the selected window; writing an empty report.", "33")); }
    let outcome = xlsx::write_report(&summary.rows, path, &ReportOptions { time_zone: tz })?;
    Ok(Processed { outcome, summary, scanned: batch.scanned, matched: batch.records.len() })
}

fn main() {
    let mut args = Args::parse();
    load_config(&mut args);
    init_logging(&args);
    init_color(&args);
    match run(&args) {
        Ok(()) => {}
        Err(AppError::Cancelled) => {
            println!("Operation cancelled by user. Exiting.");
        }
        Err(e) => {
            log::debug!("{:?}", e);
            eprintln!("{}", paint(&format!("Error: {}", e), "1;31"));
            if let Some(h) = e.hint() { eprintln!("{}", paint(&format!("Hint: {}", h), "33")); }
            std::process::exit(e.exit_code());
        }
    }
}
