use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::aws::api::Tags;
use crate::aws::session::{Session, SessionPool};
use crate::logger::Logger;
use crate::ssm::filter::{describe_filters, target_filters};
use crate::ssm::instance::discover;
use crate::ssm::invocation::{
    ExecutionLimit, InvocationJob, InvocationRunner, PollSettings, ShellParameters, MAX_INSTANCE_IDS,
};
use crate::ssm::results::ResultCollector;

/// Everything the `run` command needs, after flag parsing.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub instance_ids: Vec<String>,
    pub filter_tags: Tags,
    pub commands: Vec<String>,
    pub max_concurrency: Option<ExecutionLimit>,
    pub max_errors: Option<ExecutionLimit>,
    /// Targets per session, 0 for no limit.
    pub limit: usize,
    pub per_instance: bool,
    /// Let SSM resolve `--filter` tags at submission instead of listing instances first.
    pub server_side_filter: bool,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        let has_filters = !self.filter_tags.is_empty();
        let has_instances = !self.instance_ids.is_empty();

        if has_filters && has_instances {
            return Err(anyhow!(
                "The --filter flag cannot be used when specifying instances with --instance"
            ));
        }
        if !has_filters && !has_instances {
            return Err(anyhow!(
                "You must supply target arguments using either the --filter or --instance flags"
            ));
        }
        if self.instance_ids.len() > MAX_INSTANCE_IDS {
            return Err(anyhow!(
                "The --instance flag can only be used to specify a maximum of {} instances",
                MAX_INSTANCE_IDS
            ));
        }
        if self.commands.is_empty() {
            return Err(anyhow!("Please specify a command to be run on your instances"));
        }
        if self.server_side_filter && !has_filters {
            return Err(anyhow!("The --server-side-filter flag requires --filter"));
        }
        Ok(())
    }

    fn parameters(&self) -> Result<ShellParameters> {
        ShellParameters::new(self.commands.clone()).context("Invalid command parameters")
    }
}

/// Commands from `--command` followed by each non-empty line of `--file`.
pub fn load_commands(flag_commands: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut commands: Vec<String> = flag_commands
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(path) = file {
        let script = fs::read_to_string(path)
            .with_context(|| format!("Could not read script file {}", path.display()))?;
        commands.extend(
            script
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string),
        );
    }

    Ok(commands)
}

/// Run the job in every session concurrently and collect all results.
///
/// `options` must already have passed [`RunOptions::validate`]. Discovery
/// failures are logged and cost only that session's targets.
pub async fn execute(
    pool: &SessionPool,
    options: &RunOptions,
    poll: PollSettings,
    logger: &Logger,
) -> Result<Arc<ResultCollector>> {
    let parameters = options.parameters()?;
    let options = Arc::new(options.clone());
    let collector = Arc::new(ResultCollector::new());
    let mut tasks = JoinSet::new();

    for session in pool.sessions() {
        let session = Arc::clone(session);
        let options = Arc::clone(&options);
        let parameters = parameters.clone();
        let collector = Arc::clone(&collector);
        tasks.spawn(async move {
            if let Err(e) = run_session(&session, &options, parameters, poll, &collector).await {
                session.logger.error(format!("{:#}", e));
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            logger.error(format!("Session task failed: {}", e));
        }
    }

    Ok(collector)
}

async fn run_session(
    session: &Arc<Session>,
    options: &RunOptions,
    parameters: ShellParameters,
    poll: PollSettings,
    collector: &ResultCollector,
) -> Result<()> {
    let logger = &session.logger;

    let job = if options.server_side_filter {
        InvocationJob::new(parameters, vec![], target_filters(&options.filter_tags))?
    } else {
        let filters = describe_filters(&options.filter_tags, &options.instance_ids);
        let mut instances = discover(session, &filters, false)
            .await
            .context("Could not retrieve SSM instance info")?;

        if options.limit > 0 {
            instances.truncate(options.limit);
        }
        if instances.is_empty() {
            logger.info("No matching instances found");
            return Ok(());
        }

        let ids = instances.into_iter().map(|i| i.instance_id).collect();
        InvocationJob::new(parameters, ids, vec![])?
    };
    let job = job.with_limits(options.max_concurrency.clone(), options.max_errors.clone());

    if options.dry_run {
        match job.instance_ids() {
            Some(ids) => {
                for id in ids {
                    logger.info(format!("Would run on {}", id));
                }
            }
            None => logger.info("Would run on every instance matching the filter tags"),
        }
        return Ok(());
    }

    let runner = InvocationRunner::new(Arc::clone(session)).with_poll_settings(poll);
    let results = if options.per_instance {
        runner.run_per_instance(&job).await
    } else {
        runner.run_batch(&job).await
    };
    collector.extend(results);

    Ok(())
}
