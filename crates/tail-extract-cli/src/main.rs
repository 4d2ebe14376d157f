//! tail-extract: adoption listing extraction CLI.

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use tail_extract::{ChromiumLauncher, Pipeline, RegressionHarness, RunStats, SampleArchive};
use tail_extract_cli::{
    cleanup_policy, load_sources, resolve_config_path, resolve_samples_dir, CliConfig,
    HttpClient, Runner, Source,
};

#[derive(Parser)]
#[command(
    name = "tail-extract",
    about = "Extract adoptable-animal listings from shelter and municipal pages",
    version
)]
struct Cli {
    /// Path to a config TOML overlaying the built-in tables.
    #[arg(short, long)]
    config: Option<String>,

    /// Sample archive directory.
    #[arg(long)]
    samples: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources and extract their listings.
    Extract {
        /// Source URLs.
        urls: Vec<String>,

        /// TOML file of [[sources]] tables.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Source id for bare URLs (default: derived from the host).
        #[arg(long)]
        source_id: Option<String>,

        /// Never launch a browser.
        #[arg(long)]
        no_render: bool,

        /// Record a sample for every successful run.
        #[arg(long)]
        record: bool,

        /// Print the batch summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract from a saved HTML file without fetching.
    Parse {
        /// HTML file.
        path: PathBuf,

        /// URL the page was served from.
        #[arg(long)]
        url: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Replay archived samples through the current extractor.
    Regress {
        /// Only replay this source URL.
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect or prune the sample archive.
    Samples {
        #[command(subcommand)]
        action: SamplesAction,
    },

    /// Print strategies and effective settings as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   tail-extract completions bash > ~/.local/share/bash-completion/completions/tail-extract
    ///   tail-extract completions zsh > ~/.zfunc/_tail-extract
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SamplesAction {
    /// List archived samples per source.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Evict samples past the retention age.
    Cleanup {
        /// Override the success retention age in days.
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "tail-extract", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = CliConfig::load(config_path.as_deref())?;
    let samples_dir = resolve_samples_dir(cli.samples.as_deref());

    match cli.command {
        Commands::Extract {
            urls,
            file,
            source_id,
            no_render,
            record,
            json,
        } => {
            let mut sources = match &file {
                Some(path) => load_sources(path)?,
                None => Vec::new(),
            };
            for url in &urls {
                let mut source = Source::from_url(url)?;
                if let Some(id) = &source_id {
                    source.id = id.clone();
                }
                sources.push(source);
            }
            if sources.is_empty() {
                bail!("no sources given (pass URLs or --file)");
            }

            let pipeline = Pipeline::new(config.extractor.clone())?;
            let client = HttpClient::new(config.fetch.clone());
            let launcher = if no_render { None } else { ChromiumLauncher::detect() };
            if launcher.is_none() && !no_render {
                tracing::warn!("no Chromium found; script-driven pages will not be rendered");
            }
            let archive = if record {
                Some(SampleArchive::open(&samples_dir, config.extractor.archive.clone())?)
            } else {
                None
            };

            let mut runner = Runner::new(&pipeline);
            if let Some(launcher) = &launcher {
                runner = runner.with_launcher(launcher);
            }
            if let Some(archive) = &archive {
                runner = runner.with_archive(archive);
            }

            let summary = runner.run_all(&client, &sources).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for run in &summary.runs {
                    match (&run.report, &run.error) {
                        (Some(report), _) => println!(
                            "{:<24} {:>4} records  pool {:>4}  {}",
                            run.source_id,
                            report.records.len(),
                            report.pool_size,
                            if report.escalated() { "rendered" } else { "static" },
                        ),
                        (None, Some(err)) => println!("{:<24} FAILED  {err}", run.source_id),
                        (None, None) => {}
                    }
                }
                print_stats(&summary.stats);
            }

            if summary.has_failures() {
                std::process::exit(1);
            }
        }

        Commands::Parse { path, url, json } => {
            let html = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let pipeline = Pipeline::new(config.extractor)?;
            let report = pipeline.extract_static(&html, &url)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for record in &report.records {
                    println!(
                        "{}  {}  {}",
                        record.external_id,
                        record.name.as_deref().unwrap_or("-"),
                        record.extraction_method
                    );
                }
                println!(
                    "{} records from a pool of {} ({} duplicates)",
                    report.records.len(),
                    report.pool_size,
                    report.duplicates
                );
            }
        }

        Commands::Regress { source, json } => {
            let pipeline = Pipeline::new(config.extractor.clone())?;
            let archive = SampleArchive::open(&samples_dir, config.extractor.archive.clone())?;
            let harness = RegressionHarness::new(&pipeline, &archive);
            let report = match &source {
                Some(url) => harness.run_source(url)?,
                None => harness.run()?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for failure in &report.failures {
                    println!(
                        "{:?}  {}  expected {} got {}",
                        failure.kind,
                        failure.blob,
                        failure.expected,
                        failure
                            .actual
                            .map(|n| n.to_string())
                            .or_else(|| failure.message.clone())
                            .unwrap_or_default()
                    );
                }
                println!(
                    "{} samples: {} passed, {} failed ({} false positives, {} success regressions)",
                    report.total,
                    report.passed,
                    report.failed,
                    report.false_positives,
                    report.success_regressions
                );
            }

            if !report.is_clean() {
                std::process::exit(1);
            }
        }

        Commands::Samples { action } => match action {
            SamplesAction::List { json } => {
                let archive = SampleArchive::open(&samples_dir, config.extractor.archive)?;
                let index = archive.load_index()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&index)?);
                } else {
                    let now = Utc::now();
                    for (url, samples) in &index {
                        println!("{url}");
                        for meta in samples {
                            println!(
                                "  {:<7} {:>4} records  {:>3}d  {}",
                                meta.outcome.as_str(),
                                meta.expected_count,
                                (now - meta.recorded_at).num_days(),
                                meta.blob
                            );
                        }
                    }
                }
            }
            SamplesAction::Cleanup { days } => {
                let policy = cleanup_policy(&config.extractor.archive, days)?;
                let archive = SampleArchive::open(&samples_dir, policy)?;
                let removed = archive.cleanup()?;
                println!("Removed {removed} samples from {}", samples_dir.display());
            }
        },

        Commands::Info => {
            let pipeline = Pipeline::new(config.extractor.clone())?;
            let info = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config": config.source.as_ref().map(|p| p.display().to_string()),
                "samples": samples_dir.display().to_string(),
                "strategies": pipeline.strategy_names(),
                "escalation": &config.extractor.escalation,
                "fetch": &config.fetch,
                "chromium": ChromiumLauncher::detect()
                    .map(|l| l.executable().display().to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn print_stats(stats: &RunStats) {
    println!(
        "{} documents, {} records, {} rendered, {} failed, {} anomalies",
        stats.documents, stats.candidates, stats.escalations, stats.failures, stats.anomalies
    );
}
