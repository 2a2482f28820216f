use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod aws;
mod commands;
mod config;
mod ec2;
mod error;
mod guarded;
mod logger;
mod ssm;

use aws::api::Tags;
use aws::session::{CredentialSource, SdkConnector, SessionPool};
use commands::run::{load_commands, RunOptions};
use commands::session::SessionOptions;
use config::{resolve_profiles, resolve_regions, Environment};
use logger::{Logger, Verbosity};
use ssm::filter::parse_tag;
use ssm::invocation::{ExecutionLimit, PollSettings};

#[derive(Parser)]
#[command(name = "ssm-fanout")]
#[command(about = "Run commands and open sessions on SSM managed instances across AWS profiles and regions")]
#[command(version)]
struct Cli {
    /// AWS profiles to use (comma separated)
    #[arg(short = 'p', long = "profile", value_delimiter = ',', global = true)]
    profiles: Vec<String>,

    /// AWS regions to use (comma separated)
    #[arg(short = 'r', long = "region", value_delimiter = ',', global = true)]
    regions: Vec<String>,

    /// Only target instances with these tags, as key=value (comma separated)
    #[arg(short = 'f', long = "filter", value_parser = parse_tag, value_delimiter = ',', global = true)]
    filters: Vec<(String, String)>,

    /// Show what would be targeted without running anything
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,

    /// Use every profile in the AWS config file
    #[arg(long = "all-profiles", global = true)]
    all_profiles: bool,

    /// Log level: 0 quiet, 1 terse, 2 standard, 3 debug
    #[arg(
        short = 'v',
        long = "verbose",
        default_value_t = 2,
        value_parser = clap::value_parser!(u8).range(0..=3),
        global = true
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run shell commands on matching instances
    Run(RunArgs),
    /// Open interactive sessions on matching instances
    Session(SessionArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Instance IDs to target (comma separated, at most 50)
    #[arg(short = 'i', long = "instance", value_delimiter = ',')]
    instances: Vec<String>,

    /// Commands to run (semicolon separated)
    #[arg(short = 'c', long = "command", value_delimiter = ';')]
    commands: Vec<String>,

    /// Script whose lines are run after any --command entries
    #[arg(long = "file")]
    file: Option<PathBuf>,

    /// Maximum targets running the command at once, as a count or percentage
    #[arg(long = "max-concurrency", value_parser = ExecutionLimit::max_concurrency)]
    max_concurrency: Option<ExecutionLimit>,

    /// Errors allowed before SSM stops sending the command, as a count or percentage
    #[arg(long = "max-errors", value_parser = ExecutionLimit::max_errors)]
    max_errors: Option<ExecutionLimit>,

    /// Maximum targets per profile and region (0 for no limit)
    #[arg(short = 'l', long = "limit", default_value_t = 0)]
    limit: usize,

    /// Submit one command per instance instead of one per batch
    #[arg(long = "per-instance")]
    per_instance: bool,

    /// Let SSM resolve --filter tags when the command is sent
    #[arg(long = "server-side-filter", conflicts_with_all = ["instances", "limit", "per_instance"])]
    server_side_filter: bool,

    /// Print results as JSON on stdout
    #[arg(long = "json")]
    json: bool,
}

#[derive(Args)]
struct SessionArgs {
    /// Instance IDs to connect to (comma separated)
    #[arg(short = 'i', long = "instance", value_delimiter = ',')]
    instances: Vec<String>,

    /// Tag keys to show in the selection prompt (comma separated)
    #[arg(short = 't', long = "tag", value_delimiter = ',')]
    tags: Vec<String>,

    /// Name of the tmux session to create
    #[arg(long = "session-name", default_value = "ssm-session")]
    session_name: String,

    /// Maximum ready instances per profile and region (0 for no limit)
    #[arg(short = 'l', long = "limit", default_value_t = 10)]
    limit: usize,

    /// Only use instances running the latest SSM agent
    #[arg(long = "latest-agent")]
    latest_agent: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    Logger::init_colors();
    let mut verbosity = Verbosity::from(cli.verbose);
    if cli.dry_run {
        verbosity = verbosity.max(Verbosity::Standard);
    }
    let logger = Logger::new(verbosity);

    match run(cli, &logger).await {
        Ok(code) => std::process::exit(code),
        Err(e) => logger.fatal(format!("{:#}", e)),
    }
}

async fn run(cli: Cli, logger: &Logger) -> Result<i32> {
    let env = Environment::from_env();
    let filter_tags: Tags = cli.filters.into_iter().collect();

    let profiles = resolve_profiles(&cli.profiles, cli.all_profiles, &env)?;
    let regions = resolve_regions(&cli.regions, &env);
    let source = CredentialSource::resolve(profiles, regions, &env);

    logger.debug(format!("Credential source: {:?}", source));
    if !filter_tags.is_empty() {
        logger.debug(format!("Filter tags: {:?}", filter_tags));
    }

    match cli.command {
        Commands::Run(args) => {
            let options = RunOptions {
                instance_ids: args.instances,
                filter_tags,
                commands: load_commands(&args.commands, args.file.as_deref())?,
                max_concurrency: args.max_concurrency,
                max_errors: args.max_errors,
                limit: args.limit,
                per_instance: args.per_instance,
                server_side_filter: args.server_side_filter,
                dry_run: cli.dry_run,
            };
            options.validate()?;

            let pool = build_pool(&source, logger).await?;
            let collector =
                commands::run::execute(&pool, &options, PollSettings::default(), logger).await?;

            if options.dry_run {
                return Ok(0);
            }

            let tally = if args.json {
                let results = collector.snapshot();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&results).context("Could not serialize results")?
                );
                let tally = collector.tally();
                logger.info(format!("Execution results: {}", tally));
                tally
            } else {
                collector.report(logger)
            };
            Ok(tally.exit_code())
        }
        Commands::Session(args) => {
            let options = SessionOptions {
                instance_ids: args.instances,
                filter_tags,
                tag_columns: args.tags,
                session_name: args.session_name,
                limit: args.limit,
                latest_agent: args.latest_agent,
                dry_run: cli.dry_run,
            };

            let pool = build_pool(&source, logger).await?;
            commands::session::run(&pool, &options, &env, logger).await?;
            Ok(0)
        }
    }
}

async fn build_pool(source: &CredentialSource, logger: &Logger) -> Result<SessionPool> {
    let pool = SessionPool::build(source, Arc::new(SdkConnector), logger).await?;
    logger.debug(format!(
        "Created {} sessions: {}",
        pool.len(),
        pool.names().collect::<Vec<_>>().join(", ")
    ));
    Ok(pool)
}
