//! Parallax command-line tool.
//!
//! Usage:
//!   parallax analyze --document page.md --context "B2B landing page"
//!   parallax test --agent strategic_analyst --document page.md --iterations 3
//!   parallax variants
//!   parallax history
//!
//! # Environment Variables
//!
//! - `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` - provider credentials, also read from `.env`
//! - `RUST_LOG` - log filter (default: `info,parallax=debug`)

use anyhow::Context;
use clap::{Parser, Subcommand};
use parallax_cli::{ResultStore, Settings, ab_test, analyze, load_ground_truth, load_payload};
use parallax_experiments::TestRequest;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parallax")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-agent document analysis and prompt A/B testing", long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, global = true, default_value = parallax_cli::DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Override the output directory from the settings file
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every analyst over a document and synthesize a brief
    Analyze {
        /// Document to analyze
        #[arg(short, long)]
        document: PathBuf,

        /// Background for the analysts (audience, goal, channel)
        #[arg(long)]
        context: Option<String>,
    },

    /// A/B test the catalog variants of one agent
    Test {
        /// Agent whose variants are compared
        #[arg(short, long)]
        agent: String,

        /// Document the trials run against
        #[arg(short, long)]
        document: PathBuf,

        #[arg(long)]
        context: Option<String>,

        /// Trials per variant
        #[arg(short, long, default_value_t = 3)]
        iterations: usize,

        /// JSON object of output field to reference text
        #[arg(long)]
        ground_truth: Option<PathBuf>,
    },

    /// List the agents and variants in the catalog
    Variants,

    /// List saved runs, newest first
    History {
        /// Show at most this many entries
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut settings = Settings::load(&cli.config)?;
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }

    match cli.command {
        Commands::Analyze { document, context } => {
            let payload = load_payload(&document, context.as_deref())?;
            let client = settings.build_client()?;
            let cancel = cancel_on_ctrl_c();

            let outcome = analyze(&settings, client, &payload, cancel).await?;
            println!("{}", outcome.brief);
            println!("Saved {}", outcome.saved.json_path.display());
            if !outcome.result.success {
                let reason = outcome
                    .result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                anyhow::bail!("analysis did not complete: {reason}");
            }
        }
        Commands::Test {
            agent,
            document,
            context,
            iterations,
            ground_truth,
        } => {
            let payload = load_payload(&document, context.as_deref())?;
            let mut request = TestRequest::new(agent, payload, iterations);
            if let Some(path) = ground_truth {
                request = request.with_ground_truth(load_ground_truth(&path)?);
            }
            let client = settings.build_client()?;
            let cancel = cancel_on_ctrl_c();

            let outcome = ab_test(&settings, client, request, cancel).await?;
            println!("{}", outcome.report);
            println!("Saved {}", outcome.saved.json_path.display());
        }
        Commands::Variants => {
            let catalog = settings.load_catalog()?;
            for agent in catalog.agents() {
                println!("{agent}");
                for variant in catalog.variants_for(agent).unwrap_or_default() {
                    println!(
                        "  {:<8} {} (temperature {:.2})",
                        variant.variant_id, variant.name, variant.temperature
                    );
                    if !variant.hypothesis.is_empty() {
                        println!("           hypothesis: {}", variant.hypothesis);
                    }
                }
            }
        }
        Commands::History { limit } => {
            let store = ResultStore::new(&settings.output_dir);
            let history = store
                .history()
                .with_context(|| format!("Failed to list '{}'", store.root().display()))?;
            if history.is_empty() {
                println!("No saved runs in {}", store.root().display());
            }
            for entry in history.iter().take(limit) {
                println!(
                    "{}  {}  {}",
                    entry.started_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.summary,
                    entry.path.display()
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,parallax=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Cancel the returned token on the first Ctrl-C so partial results are
/// still saved.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}
