use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};

use augur::app::App;
use augur::capability::ImageInput;
use augur::config::{self, CacheBackend, Settings};
use augur::consts::{AUTHOR, REPO};
use augur::logging;
use augur::progress::Progress;
use augur::report::{BranchOutcome, FinalReport};
use augur::run::RunId;
use augur::server::{self, ServerState};
use augur::submission::{Submission, SubmitOutcome};

#[derive(Parser)]
#[command(name = "augur", version, about = "Reads an essay off an image and weighs its words.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter when RUST_LOG is unset (e.g. "info", "augur=debug")
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    overrides: Overrides,
}

/// Flags that win over `AUGUR_*` environment variables.
#[derive(Args)]
struct Overrides {
    /// Anthropic model used for extraction and both analyses
    #[arg(long, global = true)]
    model: Option<String>,

    /// Directory holding linguistics.md and argumentative.md
    #[arg(long, global = true)]
    instructions_dir: Option<PathBuf>,

    /// Report cache backend
    #[arg(long, global = true, value_enum)]
    cache: Option<CacheBackend>,

    /// Maximum reports kept by the memory cache (0 for unbounded)
    #[arg(long, global = true)]
    cache_capacity: Option<u64>,

    /// SQLite path for the sqlite cache backend
    #[arg(long, global = true)]
    cache_db: Option<PathBuf>,

    /// Per-analysis timeout in seconds (0 disables)
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Seconds a finished run stays pollable (0 keeps runs forever)
    #[arg(long, global = true)]
    status_ttl: Option<u64>,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(model) = self.model {
            settings.model = model;
        }
        if let Some(dir) = self.instructions_dir {
            settings.instructions_dir = dir;
        }
        if let Some(cache) = self.cache {
            settings.cache_backend = cache;
        }
        if let Some(capacity) = self.cache_capacity {
            settings.cache_capacity = config::non_zero(capacity);
        }
        if let Some(path) = self.cache_db {
            settings.cache_db = path;
        }
        if let Some(secs) = self.timeout {
            settings.capability_timeout = config::seconds(secs);
        }
        if let Some(secs) = self.status_ttl {
            settings.status_ttl = config::seconds(secs);
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        listen: SocketAddr,
    },
    /// Analyse one image and print the report
    Analyze {
        /// Image containing the essay
        image: PathBuf,

        /// Essay topic
        #[arg(long)]
        topic: String,

        /// Supporting texts given alongside the topic
        #[arg(long, conflicts_with = "motivational_file")]
        motivational_texts: Option<String>,

        /// Read the supporting texts from a file
        #[arg(long)]
        motivational_file: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let mut settings = Settings::from_env()?;
    cli.overrides.apply(&mut settings);
    let app = App::from_settings(&settings)?;

    match cli.command {
        Command::Serve { listen } => serve(app, listen).await,
        Command::Analyze {
            image,
            topic,
            motivational_texts,
            motivational_file,
            json,
        } => {
            let auxiliary_context = match motivational_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => motivational_texts,
            };
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let submission = Submission {
                image: ImageInput::sniff(bytes),
                topic,
                auxiliary_context,
            };
            analyze(app, submission, json).await
        }
    }
}

async fn serve(app: App, listen: SocketAddr) -> anyhow::Result<()> {
    eprintln!("augur v{} by {AUTHOR}", env!("CARGO_PKG_VERSION"));
    eprintln!("{REPO}\n");

    let sweeper = app.spawn_status_sweeper();
    let shutdown = app.shutdown_token();
    let state = ServerState {
        submissions: app.submissions.clone(),
        status: app.status.clone(),
    };

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nshutting down");
        }
        on_signal.cancel();
    });

    let served = server::serve(listen, state, shutdown).await;
    app.shutdown();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    served
}

async fn analyze(app: App, submission: Submission, json: bool) -> anyhow::Result<()> {
    let run_id = RunId::generate();
    let progress = Progress::start(app.status.clone(), run_id.clone());

    let outcome = tokio::select! {
        outcome = app.submissions.submit_as(run_id.clone(), submission) => outcome,
        _ = tokio::signal::ctrl_c() => {
            app.shutdown();
            progress.stop().await;
            bail!("interrupted");
        }
    };

    let report = match outcome {
        Ok(SubmitOutcome::Cached { report, .. }) => {
            progress.stop().await;
            eprintln!("served from cache");
            report
        }
        Ok(SubmitOutcome::Accepted { task, .. }) => {
            let joined = tokio::select! {
                joined = task => joined,
                _ = tokio::signal::ctrl_c() => {
                    app.shutdown();
                    progress.stop().await;
                    bail!("interrupted");
                }
            };
            progress.stop().await;
            joined.context("analysis task failed")??
        }
        Err(err) => {
            progress.stop().await;
            return Err(err.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&run_id, &report);
    }
    Ok(())
}

fn print_report(run_id: &RunId, report: &FinalReport) {
    println!("run {run_id}\n");
    println!("── extracted text ──\n{}\n", report.extracted_text.trim_end());
    print_outcome("linguistic analysis", &report.linguistic_analysis);
    print_outcome("argumentative analysis", &report.argumentative_analysis);
}

fn print_outcome(title: &str, outcome: &BranchOutcome) {
    match outcome {
        BranchOutcome::Text(text) => println!("── {title} ──\n{}\n", text.trim_end()),
        BranchOutcome::Failed { error } => println!("── {title} ──\n✗ failed: {error}\n"),
    }
}
