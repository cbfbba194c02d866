//! Slack Knowledge CLI - main entry point
//!
//! Crawls Slack into MySQL and turns conversation windows into topic documents.

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use slack_knowledge::commands::{self, Selection};
use slack_knowledge::config::Config;
use slack_knowledge::lock::RunLock;
use slack_knowledge::{metrics, Error};
use tracing::warn;

#[derive(Parser)]
#[command(name = "slack_knowledge")]
#[command(about = "Slack crawler and topic document generator", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: config.yml)
    #[arg(long, global = true, env = "SLACK_KNOWLEDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, global = true, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SelectionArgs {
    /// Window start (YYYY-MM-DD, "YYYY-MM-DD HH:MM[:SS]" or RFC 3339)
    #[arg(long)]
    start: String,

    /// Window end, inclusive; a bare date covers the whole day
    #[arg(long)]
    end: String,

    /// Only messages from this sender (repeatable): <@U123>, U123, @name or name
    #[arg(long = "sender")]
    senders: Vec<String>,

    /// Only messages mentioning this user or group (repeatable)
    #[arg(long = "mention")]
    mentions: Vec<String>,

    /// Pull in in-window messages of threads the selection touches
    #[arg(long, default_value_t = false)]
    include_threads: bool,
}

impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Selection {
            start: args.start,
            end: args.end,
            senders: args.senders,
            mentions: args.mentions,
            include_threads: args.include_threads,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Crawl channels into the database
    Crawl {
        /// Channel id to crawl (repeatable; default: configured channels)
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Days to look back for channels never crawled before
        #[arg(long)]
        days: Option<i64>,
    },

    /// Print grouped messages as markdown
    Messages {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cluster messages into topics and write topic documents
    Generate {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Show planned topics without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// List stored topics
    Topics,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Migrate => "migrate",
            Commands::Crawl { .. } => "crawl",
            Commands::Messages { .. } => "messages",
            Commands::Generate { .. } => "generate",
            Commands::Topics => "topics",
        }
    }

    /// Commands that write and must not overlap with another run.
    fn needs_lock(&self) -> bool {
        match self {
            Commands::Crawl { .. } | Commands::Migrate => true,
            Commands::Generate { dry_run, .. } => !dry_run,
            Commands::Messages { .. } | Commands::Topics => false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("slack_knowledge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = Config::load(cli.config.as_deref())?;

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(&config, cli.command).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_usage_error() => {
            eprintln!("error: {}\n", err);
            let _ = Cli::command().print_help();
            std::process::exit(2);
        }
        Err(err) => Err(err.into()),
    }
}

async fn execute_command(config: &Config, command: Commands) -> Result<(), Error> {
    let _lock = if command.needs_lock() {
        Some(RunLock::acquire(&config.lock_file)?)
    } else {
        None
    };

    match command {
        Commands::Migrate => commands::migrate::run(config).await,
        Commands::Crawl { channels, days } => commands::crawl::run(config, &channels, days).await,
        Commands::Messages { selection, output } => {
            commands::messages::run(config, &selection.into(), output.as_deref()).await
        }
        Commands::Generate { selection, dry_run } => {
            commands::generate::run(config, &selection.into(), dry_run).await
        }
        Commands::Topics => commands::topics::run(config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["slack_knowledge"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn only_schema_writers_take_the_run_lock() {
        let window = ["--start", "2024-01-01", "--end", "2024-01-02"];

        assert!(parse(&["migrate"]).needs_lock());
        assert!(parse(&["crawl"]).needs_lock());
        assert!(parse(&[&["generate"][..], &window[..]].concat()).needs_lock());

        // unlocked commands connect without migrating
        assert!(!parse(&[&["generate"][..], &window[..], &["--dry-run"][..]].concat()).needs_lock());
        assert!(!parse(&[&["messages"][..], &window[..]].concat()).needs_lock());
        assert!(!parse(&["topics"]).needs_lock());
    }
}
