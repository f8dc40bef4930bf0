//! Nao CLI - Command-line tool for CRIWare and PlatinumGames containers.
//!
//! This is the main entry point for the Nao command-line application.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use nao::prelude::*;

/// Nao - CPK, USM and DAT extraction tool
#[derive(Parser)]
#[command(name = "nao")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Bytes written per chunk while extracting
    #[arg(long, env = "NAO_CHUNK_SIZE", global = true)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the container format of a file
    Detect {
        /// Path to the file
        #[arg(env = "NAO_INPUT")]
        input: PathBuf,
    },

    /// List the entries of a container
    List {
        /// Path to the container
        #[arg(env = "NAO_INPUT")]
        input: PathBuf,

        /// Filter pattern (glob-style, matched against the entry path)
        #[arg(short, long)]
        filter: Option<String>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract a single entry
    Extract {
        /// Path to the container
        #[arg(env = "NAO_INPUT")]
        input: PathBuf,

        /// Entry index as shown by `list`
        #[arg(short, long, conflicts_with = "name", required_unless_present = "name")]
        index: Option<usize>,

        /// Entry name or path
        #[arg(short, long)]
        name: Option<String>,

        /// Output directory
        #[arg(short, long, env = "NAO_OUTPUT")]
        output: PathBuf,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },

    /// Extract every entry of a container
    ExtractAll {
        /// Path to the container
        #[arg(env = "NAO_INPUT")]
        input: PathBuf,

        /// Output root; entries land in <output>/<container name>/
        #[arg(short, long, env = "NAO_OUTPUT")]
        output: PathBuf,

        /// Stop at the first failing entry
        #[arg(long)]
        atomic: bool,

        /// Replace existing output files
        #[arg(long)]
        overwrite: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut options = ExtractOptions::default();
    if let Some(chunk_size) = cli.chunk_size {
        options = options.with_chunk_size(chunk_size);
    }

    match cli.command {
        Commands::Detect { input } => cmd_detect(&input)?,
        Commands::List { input, filter, json } => cmd_list(&input, filter.as_deref(), json)?,
        Commands::Extract {
            input,
            index,
            name,
            output,
            overwrite,
        } => {
            let options = options.with_overwrite(overwrite);
            cmd_extract(&input, index, name.as_deref(), &output, &options)?;
        }
        Commands::ExtractAll {
            input,
            output,
            atomic,
            overwrite,
        } => {
            let policy = if atomic {
                ErrorPolicy::Abort
            } else {
                ErrorPolicy::Continue
            };
            let options = options.with_error_policy(policy).with_overwrite(overwrite);
            cmd_extract_all(&input, &output, &options)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn open(input: &Path) -> Result<Container> {
    let start = Instant::now();
    let container = Container::open(input)
        .with_context(|| format!("Failed to open container {}", input.display()))?;
    tracing::info!(
        entries = container.entries().len(),
        elapsed = ?start.elapsed(),
        "opened {}",
        container.file_type()
    );
    Ok(container)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: &CancelToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("Interrupted, stopping after the current chunk...");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")
}

fn cmd_detect(input: &Path) -> Result<()> {
    let file_type = detect(input).with_context(|| format!("Failed to probe {}", input.display()))?;

    let note = if file_type.is_placeholder() {
        " (recognised, no reader)"
    } else {
        ""
    };
    println!("{}: {}{}", input.display(), file_type, note);

    Ok(())
}

fn cmd_list(input: &Path, filter: Option<&str>, json: bool) -> Result<()> {
    let container = open(input)?;

    let pattern = filter
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid filter pattern")?;

    let entries: Vec<(usize, &EmbeddedEntry)> = container
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| pattern.as_ref().map_or(true, |p| p.matches(&e.display_path())))
        .collect();

    if json {
        let list: Vec<&EmbeddedEntry> = entries.iter().map(|(_, e)| *e).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!(
        "{:>5}  {:>12} {:>12} {:>6}  {:<5} {:>9}  path",
        "#", "embedded", "extracted", "ratio", "kind", "duration"
    );
    for (i, entry) in &entries {
        let ratio = entry
            .compression_ratio()
            .map_or_else(|| "NaN".to_string(), |r| format!("{r:.3}"));
        let kind = entry.kind.map_or_else(String::new, |k| k.to_string());
        let duration = entry
            .duration()
            .map_or_else(String::new, |d| format!("{:.2}s", d.as_secs_f64()));

        println!(
            "{:>5}  {:>12} {:>12} {:>6}  {:<5} {:>9}  {}",
            i,
            entry.embedded_size,
            entry.extracted_size,
            ratio,
            kind,
            duration,
            entry.display_path()
        );
    }

    let (embedded, extracted): (u64, u64) = entries
        .iter()
        .fold((0u64, 0u64), |(a, b), (_, e)| {
            (a.saturating_add(e.embedded_size), b.saturating_add(e.extracted_size))
        });
    println!(
        "\nTotal: {} entries, {} embedded, {} extracted",
        entries.len(),
        HumanBytes(embedded),
        HumanBytes(extracted)
    );

    Ok(())
}

fn cmd_extract(
    input: &Path,
    index: Option<usize>,
    name: Option<&str>,
    output: &Path,
    options: &ExtractOptions,
) -> Result<()> {
    let container = open(input)?;

    let index = match (index, name) {
        (Some(index), _) => index,
        (None, Some(name)) => container
            .entries()
            .iter()
            .position(|e| e.name == name || e.display_path() == name)
            .with_context(|| format!("No entry named {name}"))?,
        (None, None) => anyhow::bail!("Either --index or --name is required"),
    };

    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel)?;

    let progress = BarProgress::new(false)?;
    let start = Instant::now();
    let path = container
        .extract_entry_to_dir(index, output, options, &progress, &cancel)
        .with_context(|| format!("Failed to extract entry {index}"))?;
    progress.bar.finish_and_clear();

    let written = std::fs::metadata(&path).map(|m| m.len()).unwrap_or_default();
    println!(
        "Extracted {} ({}) in {}",
        path.display(),
        HumanBytes(written),
        HumanDuration(start.elapsed())
    );

    Ok(())
}

fn cmd_extract_all(input: &Path, output: &Path, options: &ExtractOptions) -> Result<()> {
    let container = open(input)?;
    let (embedded, extracted) = container.index().totals();
    println!(
        "Extracting {} entries ({}) from {}...",
        container.entries().len(),
        HumanBytes(extracted),
        input.display()
    );

    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel)?;

    let progress = BarProgress::new(true)?;
    let start = Instant::now();
    let result = container.extract_all(output, options, &progress, &cancel);
    progress.bar.finish_and_clear();

    let summary = result.context("Extraction stopped")?;
    println!(
        "Extracted {} entries in {}: read {} of {}, wrote {} of {}",
        summary.entries,
        HumanDuration(start.elapsed()),
        HumanBytes(summary.bytes_read),
        HumanBytes(embedded),
        HumanBytes(summary.bytes_written),
        HumanBytes(extracted)
    );

    check_complete(&summary, container.entries().len())
}

/// Print per-entry failures and fail the command if there were any.
fn check_complete(summary: &BulkSummary, total: usize) -> Result<()> {
    if summary.is_complete() {
        return Ok(());
    }

    eprintln!("{} entries failed:", summary.failures.len());
    for failure in &summary.failures {
        eprintln!("  #{} {}: {}", failure.index, failure.path, failure.error);
    }
    anyhow::bail!(
        "{} of {} entries could not be extracted",
        summary.failures.len(),
        total
    )
}

/// Byte progress bar for single (per entry) or bulk (whole job) extraction.
struct BarProgress {
    bar: ProgressBar,
    bulk: bool,
}

impl BarProgress {
    fn new(bulk: bool) -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { bar, bulk })
    }
}

impl ExtractProgress for BarProgress {
    fn entry_start(&self, _index: usize, entry: &EmbeddedEntry) {
        self.bar.set_message(entry.display_path());
    }

    fn bytes(&self, current: u64, total: u64) {
        if !self.bulk {
            self.bar.set_length(total);
            self.bar.set_position(current);
        }
    }

    fn total(&self, current: u64, total: u64) {
        if self.bulk {
            self.bar.set_length(total);
            self.bar.set_position(current);
        }
    }

    fn entry_failed(&self, index: usize, entry: &EmbeddedEntry, error: &Error) {
        self.bar
            .println(format!("Error extracting #{index} {}: {error}", entry.display_path()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nao::EntryFailure;

    #[test]
    fn test_partial_bulk_extraction_fails_the_command() {
        let mut summary = BulkSummary {
            entries: 2,
            bytes_read: 10,
            bytes_written: 10,
            failures: Vec::new(),
        };
        assert!(check_complete(&summary, 2).is_ok());

        summary.failures.push(EntryFailure {
            index: 2,
            path: "data/broken.bin".into(),
            error: "decompression failure".into(),
        });
        let error = check_complete(&summary, 3).unwrap_err();
        assert_eq!(error.to_string(), "1 of 3 entries could not be extracted");
    }
}
