//! Storyline command-line entry point

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use storyline::{ClusteringStrategy, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

/// Storyline: story clustering and user interest embeddings for news articles
#[derive(Parser, Debug)]
#[command(name = "storyline")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print metrics to stderr when the command finishes (a JSON snapshot with --json)
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed and cluster unprocessed articles
    Cluster {
        /// JSON snapshot with articles, interactions and preferences
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Clustering strategy (overrides config)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Cosine similarity threshold for the threshold strategy
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Write stored results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compute user interest embeddings
    Users {
        /// JSON snapshot with articles, interactions and preferences
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Recalculate only this user
        #[arg(short, long)]
        user: Option<i64>,
        /// Write stored results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Threshold,
    Density,
}

impl From<StrategyArg> for ClusteringStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Threshold => ClusteringStrategy::Threshold,
            StrategyArg::Density => ClusteringStrategy::Density,
        }
    }
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    tracing::debug!("storyline v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_from(args.config.as_deref())?;

    let result = match args.command {
        Command::Cluster {
            snapshot,
            strategy,
            threshold,
            output,
        } => {
            let overrides = cli::ClusterOverrides {
                strategy: strategy.map(Into::into),
                threshold,
            };
            cli::run_cluster(config, snapshot, overrides, output, args.json).await
        }
        Command::Users {
            snapshot,
            user,
            output,
        } => cli::run_users(config, snapshot, user, output, args.json).await,
        Command::Config => cli::run_show_config(&config, args.json),
    };

    if args.metrics {
        cli::run_print_metrics(args.json)?;
    }

    result
}
