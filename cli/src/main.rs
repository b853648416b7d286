//! docstamp CLI - notification letter rewriting tool

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use docstamp::counter::{CounterStore, Sequence};
use docstamp::oracle::{CommandOracle, FlowOracle, OracleClient};
use docstamp::patch::NumberingPattern;
use docstamp::pipeline::{spawn_batch, PipelineOptions, ProgressEvent, Rewriter};
use docstamp::place::{AnchorHint, Asset, PageOutcome, PlacementEngine, PlacementOptions};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "docstamp")]
#[command(version)]
#[command(about = "Stamp issue numbers and place confirmation pictures into letters", long_about = None)]
struct Cli {
    /// Counter store file
    #[arg(long, global = true, env = "DOCSTAMP_STORE", default_value = "config.json")]
    store: PathBuf,

    /// External layout oracle command; the built-in flow model is used when unset
    #[arg(long, global = true, env = "DOCSTAMP_ORACLE")]
    oracle: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite the issue number of documents and advance the counter
    Stamp {
        /// Document snapshots
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,

        /// Issue number style
        #[arg(short, long, value_enum, default_value = "notification")]
        kind: NumberKind,
    },

    /// Place a picture on every page after the first
    Place {
        /// Document snapshot
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Picture file
        #[arg(short, long, value_name = "IMAGE")]
        image: PathBuf,

        #[command(flatten)]
        search: SearchArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a document paginates
    Measure {
        /// Document snapshot
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print the measurement as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or change the counter store
    Counters {
        #[command(subcommand)]
        action: CounterAction,
    },

    /// Rewrite many documents on a background worker
    Batch {
        /// Document snapshots
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,

        /// Issue number style; numbers are left alone when unset
        #[arg(short, long, value_enum)]
        kind: Option<NumberKind>,

        /// Picture to place into notification letters
        #[arg(short, long, value_name = "IMAGE")]
        image: Option<PathBuf>,

        /// Template field, as NAME=VALUE
        #[arg(short, long = "field", value_name = "NAME=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Place pictures into every document, not only notification letters
        #[arg(long)]
        all_documents: bool,

        /// Do not back documents up before rewriting
        #[arg(long)]
        no_backup: bool,

        /// Write the batch report as JSON
        #[arg(short, long, value_name = "FILE")]
        report: Option<PathBuf>,

        #[command(flatten)]
        search: SearchArgs,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CounterAction {
    /// Print the current counters
    Show,

    /// Consume one number from a sequence
    Advance {
        /// Sequence to advance
        #[arg(value_enum)]
        sequence: SequenceArg,
    },

    /// Copy the store file aside
    Backup {
        /// Backup suffix (a timestamp when unset)
        #[arg(long)]
        suffix: Option<String>,
    },
}

#[derive(clap::Args)]
struct SearchArgs {
    /// Starting picture width in inches
    #[arg(long, default_value = "3.5")]
    width: f32,

    /// Width removed per rejected attempt
    #[arg(long, default_value = "0.05")]
    decrement: f32,

    /// Smallest width tried
    #[arg(long, default_value = "1.0")]
    floor: f32,

    /// First page receiving a picture
    #[arg(long, default_value = "2")]
    first_page: u32,
}

impl SearchArgs {
    fn options(&self) -> PlacementOptions {
        PlacementOptions::new()
            .with_nominal_width(self.width)
            .with_decrement(self.decrement)
            .with_floor(self.floor)
            .with_first_page(self.first_page)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum NumberKind {
    /// 〔YYYY〕第N期, sequence A
    Notification,
    /// [YYYY]N号, sequence B
    Rectification,
}

impl From<NumberKind> for NumberingPattern {
    fn from(kind: NumberKind) -> Self {
        match kind {
            NumberKind::Notification => NumberingPattern::notification(),
            NumberKind::Rectification => NumberingPattern::rectification(),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SequenceArg {
    /// Notification numbers
    A,
    /// Rectification numbers
    B,
}

impl From<SequenceArg> for Sequence {
    fn from(arg: SequenceArg) -> Self {
        match arg {
            SequenceArg::A => Sequence::A,
            SequenceArg::B => Sequence::B,
        }
    }
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{}`", s)),
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let store = CounterStore::open(&cli.store);

    let result = match cli.command {
        Commands::Stamp { inputs, kind } => cmd_stamp(&inputs, kind, &store),
        Commands::Place {
            input,
            image,
            search,
            json,
        } => cmd_place(&input, &image, &search, cli.oracle.as_deref(), json),
        Commands::Measure { input, json } => cmd_measure(&input, cli.oracle.as_deref(), json),
        Commands::Counters { action } => cmd_counters(action, &store),
        Commands::Batch {
            inputs,
            kind,
            image,
            fields,
            all_documents,
            no_backup,
            report,
            search,
        } => {
            let mut options = PipelineOptions::new()
                .with_placement(search.options())
                .with_backups(!no_backup);
            if let Some(kind) = kind {
                options = options.with_numbering(kind.into());
            }
            for (name, value) in fields {
                options = options.with_field(name, value);
            }
            if all_documents {
                options = options.place_everywhere();
            }
            match image.as_deref().map(Asset::from_file).transpose() {
                Ok(asset) => {
                    if let Some(asset) = asset {
                        options = options.with_asset(asset);
                    }
                    cmd_batch(inputs, options, store, cli.oracle.as_deref(), report.as_deref())
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Version => {
            cmd_version();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn client(oracle: Option<&str>) -> Result<OracleClient, Box<dyn std::error::Error>> {
    match oracle {
        Some(command) => {
            log::debug!("Using external layout engine: {}", command);
            Ok(OracleClient::new(CommandOracle::from_command_line(command)?))
        }
        None => {
            log::debug!("Using built-in flow layout");
            Ok(OracleClient::new(FlowOracle::new()))
        }
    }
}

fn cmd_stamp(inputs: &[PathBuf], kind: NumberKind, store: &CounterStore) -> CliResult {
    let pattern: NumberingPattern = kind.into();
    let mut failed = 0;

    for input in inputs {
        match docstamp::stamp_file(input, &pattern, store) {
            Ok(Some(stamp)) => println!(
                "{} {}  {}/{} -> {}/{}",
                "Stamped".green(),
                input.display(),
                stamp.old_year,
                stamp.old_number,
                stamp.year,
                stamp.number
            ),
            Ok(None) => println!("{} {}  no issue number", "Skipped".yellow(), input.display()),
            Err(e) => {
                eprintln!("{} {}: {}", "Failed".red(), input.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} documents failed", failed, inputs.len()).into());
    }
    Ok(())
}

fn cmd_place(
    input: &Path,
    image: &Path,
    search: &SearchArgs,
    oracle: Option<&str>,
    json: bool,
) -> CliResult {
    let client = client(oracle)?;
    let asset = Asset::from_file(image)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Placing {} ...", image.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = PlacementEngine::new(&client)
        .with_options(search.options())
        .place(input, &asset, &AnchorHint::default())?;
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", "Placement".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    for outcome in &result.pages {
        let line = match outcome {
            PageOutcome::Inserted {
                page,
                paragraph,
                size,
                attempts,
                fallback,
            } => format!(
                "{} page {}: paragraph {}, {:.2}in after {} attempts{}",
                "✓".green(),
                page,
                paragraph,
                size.width,
                attempts,
                if *fallback { " (fallback)" } else { "" }
            ),
            PageOutcome::AlreadyPresent { page } => {
                format!("{} page {}: already present", "=".dimmed(), page)
            }
            PageOutcome::NoCandidate { page } => {
                format!("{} page {}: no blank paragraph", "✗".yellow(), page)
            }
            PageOutcome::Exhausted { page, attempts } => {
                format!("{} page {}: exhausted after {} attempts", "✗".red(), page, attempts)
            }
            PageOutcome::Contention { page, waited_ms } => {
                format!("{} page {}: busy for {}ms", "✗".red(), page, waited_ms)
            }
            PageOutcome::Failed { page, reason, .. } => {
                format!("{} page {}: {}", "✗".red(), page, reason)
            }
        };
        println!("  {}", line);
    }
    println!();
    println!("{}: {}", "Inserted".bold(), result.inserted_count);
    println!("{}: {}", "Skipped".bold(), result.skipped_pages);
    println!("{}: {}", "Pages".bold(), result.measurement.total_pages);
    if !result.verified {
        println!("{}", "Layout was not verified (path too long)".yellow());
    }
    Ok(())
}

fn cmd_measure(input: &Path, oracle: Option<&str>, json: bool) -> CliResult {
    let client = client(oracle)?;
    let m = client.measure(input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&m)?);
        return Ok(());
    }

    println!("{}", "Pagination".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    println!("{}: {}", "Oracle".bold(), client.oracle_name());
    println!("{}: {}", "Pages".bold(), m.total_pages);
    println!("{}: {}", "Paragraphs".bold(), m.paragraph_count());
    for page in 1..=m.total_pages {
        let on_page = m.paragraphs_on(page);
        match (on_page.first(), on_page.last()) {
            (Some(first), Some(last)) => {
                println!("  page {}: paragraphs {}..={}", page, first, last)
            }
            _ => println!("  page {}: {}", page, "empty".dimmed()),
        }
    }
    Ok(())
}

fn cmd_counters(action: CounterAction, store: &CounterStore) -> CliResult {
    match action {
        CounterAction::Show => {
            let c = store.load()?;
            println!("{}", "Counters".cyan().bold());
            println!("{}", "─".repeat(40).dimmed());
            println!("{}: {}", "Store".bold(), store.path().display());
            println!("{}: {}", "Period".bold(), c.period_key);
            println!("{}: {}", "Sequence A".bold(), c.sequence_a);
            println!("{}: {}", "Sequence B".bold(), c.sequence_b);
            println!("{}: {}", "Updated".bold(), c.last_updated);
        }
        CounterAction::Advance { sequence } => {
            let sequence: Sequence = sequence.into();
            let issued = store.advance(sequence)?;
            println!(
                "{} {} {} (next {})",
                "Issued".green(),
                sequence,
                issued,
                issued + 1
            );
        }
        CounterAction::Backup { suffix } => {
            let path = store.backup(suffix.as_deref())?;
            println!("{} {}", "Saved to".green(), path.display());
        }
    }
    Ok(())
}

fn cmd_batch(
    inputs: Vec<PathBuf>,
    options: PipelineOptions,
    store: CounterStore,
    oracle: Option<&str>,
    report_path: Option<&Path>,
) -> CliResult {
    let rewriter = Rewriter::new(Arc::new(client(oracle)?), Arc::new(store), options);

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let handle = spawn_batch(rewriter, inputs);
    for event in handle.events().iter() {
        match event {
            ProgressEvent::DocumentStarted { path, .. } => {
                pb.set_message(
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
            }
            ProgressEvent::DocumentDone { .. } => pb.inc(1),
            ProgressEvent::DocumentFailed { path, error, .. } => {
                pb.println(format!("{} {}: {}", "Failed".red(), path.display(), error));
                pb.inc(1);
            }
            ProgressEvent::Cancelled { processed } => {
                pb.println(format!("{} after {} documents", "Cancelled".yellow(), processed));
            }
            ProgressEvent::Started { .. } | ProgressEvent::Finished { .. } => {}
        }
    }
    let report = handle.join()?;
    pb.finish_with_message("Done!");

    println!();
    println!("{}: {}", "Succeeded".green().bold(), report.succeeded);
    println!("{}: {}", "Failed".red().bold(), report.failed);
    if !report.review.is_empty() {
        println!();
        print!("{}", report.review.to_string().yellow());
    }

    if let Some(path) = report_path {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("{} {}", "Report saved to".green(), path.display());
    }

    if report.failed > 0 {
        return Err(format!("{} documents failed", report.failed).into());
    }
    Ok(())
}

fn cmd_version() {
    println!("{} {}", "docstamp".cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("Notification letter rewriting tool");
    println!();
    println!("License: MIT");
}
