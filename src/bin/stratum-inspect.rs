//! Binary entry point for the Stratum resource inspector.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use stratum::admin::{self, DumpReport, InfoReport, VerifyLevel, VerifyReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "stratum-inspect",
    version,
    about = "Inspect a Stratum resource",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        value_name = "DIR",
        env = "STRATUM_RESOURCE",
        help = "Resource directory"
    )]
    resource: PathBuf,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show configuration and revision summary
    Info,
    /// List the records of one node page
    Dump {
        #[arg(long, help = "Revision to read (default: newest)")]
        revision: Option<u64>,
        #[arg(long, help = "Node page to list")]
        page_key: u64,
    },
    /// Reconstruct every reachable page
    Verify {
        #[arg(long, value_enum, default_value_t = LevelArg::Full)]
        level: LevelArg,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LevelArg {
    Fast,
    Full,
}

impl From<LevelArg> for VerifyLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Fast => VerifyLevel::Fast,
            LevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Info => {
            let report = admin::info(&cli.resource)?;
            emit(cli.format, &report, print_info_text)?;
        }
        Command::Dump { revision, page_key } => {
            let report = admin::dump(&cli.resource, revision, page_key)?;
            emit(cli.format, &report, print_dump_text)?;
        }
        Command::Verify { level } => {
            let report = admin::verify(&cli.resource, level.into())?;
            emit(cli.format, &report, print_verify_text)?;
            return Ok(report.success);
        }
    }
    Ok(true)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {name:.<24} {value}");
}

fn print_info_text(report: &InfoReport) {
    println!("Resource {}", report.location);
    print_field("revisioning", report.revisioning);
    print_field("window", report.window);
    print_field("commit", format!("{:?}", report.commit));
    print_field("store", report.store);
    let pipeline = if report.pipeline.is_empty() {
        "none".to_string()
    } else {
        report.pipeline.join(" -> ")
    };
    print_field("pipeline", pipeline);
    print_field("revisions", report.revision_count);
    print_field("latest revision", report.latest_revision);
    print_field("node pages", report.node_pages);
    match report.max_node_key {
        Some(key) => print_field("max node key", key),
        None => print_field("max node key", "none"),
    }
    print_field("meta entries", report.meta_entries);
}

fn print_dump_text(report: &DumpReport) {
    if !report.present {
        println!(
            "page {} does not exist in revision {}",
            report.page_key, report.revision
        );
        return;
    }
    println!(
        "page {} at revision {}: {} record(s)",
        report.page_key,
        report.revision,
        report.slots.len()
    );
    for slot in &report.slots {
        println!(
            "  slot {:>3}  node {:>8}  {:>6} B  {}",
            slot.slot, slot.node_key, slot.len, slot.preview
        );
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "revisions={} pages={} records={}",
        report.counts.revisions_checked, report.counts.pages_checked, report.counts.records_found
    );
    if report.success {
        println!("status: PASS");
        return;
    }
    println!("status: FAIL");
    for (i, finding) in report.findings.iter().enumerate() {
        println!("  {}. [{:?}] {}", i + 1, finding.severity, finding.message);
    }
}
