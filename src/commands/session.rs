use anyhow::{anyhow, Context, Result};
use dialoguer::MultiSelect;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::attach::{attach_tmux_session, create_tmux_session, start_ssm_session, SessionTarget};
use crate::aws::api::Tags;
use crate::aws::session::SessionPool;
use crate::config::Environment;
use crate::logger::Logger;
use crate::ssm::filter::describe_filters;
use crate::ssm::instance::{discover, format_table, InstanceInfo, InstancePool};
use crate::ssm::readiness::collect_ready_instances;

const PROMPT_PAGE_SIZE: usize = 25;

/// Everything the `session` command needs, after flag parsing.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub instance_ids: Vec<String>,
    pub filter_tags: Tags,
    /// Tag keys shown as extra columns in the selection prompt.
    pub tag_columns: Vec<String>,
    pub session_name: String,
    /// Ready instances per session, 0 for no limit.
    pub limit: usize,
    pub latest_agent: bool,
    pub dry_run: bool,
}

/// Instances that passed readiness in any session.
#[derive(Debug, Default)]
pub struct Discovery {
    pub instances: Vec<InstanceInfo>,
    /// Candidates seen across sessions before readiness probing.
    pub total_seen: usize,
}

/// Discover and probe instances in every session concurrently.
pub async fn discover_ready(pool: &SessionPool, options: &SessionOptions, logger: &Logger) -> Discovery {
    let filters = Arc::new(describe_filters(&options.filter_tags, &options.instance_ids));
    let instance_pool = Arc::new(InstancePool::new());
    let total_seen = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();

    for session in pool.sessions() {
        let session = Arc::clone(session);
        let filters = Arc::clone(&filters);
        let instance_pool = Arc::clone(&instance_pool);
        let total_seen = Arc::clone(&total_seen);
        let (limit, latest_agent, dry_run) = (options.limit, options.latest_agent, options.dry_run);

        tasks.spawn(async move {
            let candidates = match discover(&session, &filters, latest_agent).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    session
                        .logger
                        .error(format!("Could not retrieve SSM instance info: {}", e));
                    return;
                }
            };
            total_seen.fetch_add(candidates.len(), Ordering::Relaxed);

            if dry_run {
                for candidate in &candidates {
                    session
                        .logger
                        .info(format!("Would probe {}", candidate.instance_id));
                }
                return;
            }

            let added = collect_ready_instances(&session, &candidates, limit, &instance_pool).await;
            session
                .logger
                .debug(format!("{} of {} candidates are ready for sessions", added, candidates.len()));
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            logger.error(format!("Session task failed: {}", e));
        }
    }

    Discovery {
        instances: instance_pool.snapshot().into_values().collect(),
        total_seen: total_seen.load(Ordering::Relaxed),
    }
}

/// The `session` command: discover, choose, then connect directly or through tmux.
pub async fn run(pool: &SessionPool, options: &SessionOptions, env: &Environment, logger: &Logger) -> Result<()> {
    let discovery = discover_ready(pool, options, logger).await;
    logger.info(format!("Retrieved {} usable instances.", discovery.instances.len()));

    if discovery.instances.is_empty() || options.dry_run {
        return Ok(());
    }

    let pass_profile = !env.sts_credentials_set();
    let to_target = |info: &InstanceInfo| SessionTarget::from_instance(info, pass_profile);

    let selected: Vec<InstanceInfo> = if discovery.instances.len() == 1 || options.instance_ids.len() > 1 {
        discovery.instances
    } else {
        match select_instances(&discovery, &options.tag_columns)? {
            Some(selected) => selected,
            None => {
                logger.info("Instance selection interrupted.");
                return Ok(());
            }
        }
    };

    if let [only] = selected.as_slice() {
        return start_ssm_session(&to_target(only), logger)
            .await
            .with_context(|| format!("Failed to start session for instance {}", only.instance_id));
    }

    let targets: Vec<SessionTarget> = selected.iter().map(to_target).collect();
    create_tmux_session(&options.session_name, &targets, logger)?;

    if env.in_tmux() {
        logger.info("To force nested tmux sessions, unset $TMUX.");
        logger.info(format!(
            "Attach to the session with `tmux attach -t {}`",
            options.session_name
        ));
        return Ok(());
    }

    attach_tmux_session(&options.session_name)
        .with_context(|| format!("Could not attach to tmux session '{}'", options.session_name))
}

/// Multi-select prompt over the table rows. `None` when the user aborts.
fn select_instances(discovery: &Discovery, tag_columns: &[String]) -> Result<Option<Vec<InstanceInfo>>> {
    let rows = format_table(&discovery.instances, tag_columns);
    let (header, items) = rows
        .split_first()
        .ok_or_else(|| anyhow!("No instances to select from"))?;

    eprintln!("      {}", header);
    let chosen = MultiSelect::new()
        .with_prompt(format!(
            "Showing {}/{} instances. Make a selection",
            discovery.instances.len(),
            discovery.total_seen
        ))
        .items(items)
        .max_length(PROMPT_PAGE_SIZE)
        .interact_opt()?;

    match chosen {
        None => Ok(None),
        Some(indices) if indices.is_empty() => Err(anyhow!("No instances selected")),
        Some(indices) => Ok(Some(
            indices
                .into_iter()
                .map(|i| discovery.instances[i].clone())
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::api::fixtures::instance;
    use crate::aws::api::{MockEc2Api, MockSsmApi, Page};
    use crate::aws::session::testing;
    use crate::error::ApiError;
    use crate::logger::Verbosity;
    use pretty_assertions::assert_eq;

    fn probing_client(ids: &'static [&'static str], not_connected: &'static str) -> MockSsmApi {
        let mut ssm = MockSsmApi::new();
        ssm.expect_describe_instance_information().returning(move |_, _, _| {
            Ok(Page {
                items: ids.iter().map(|id| instance(id, "Linux", "Online", true)).collect(),
                next_token: None,
            })
        });
        ssm.expect_start_session().returning(move |target| {
            if target == not_connected {
                Err(ApiError::TargetNotConnected(target.to_string()))
            } else {
                Ok(Some(format!("session-{target}")))
            }
        });
        ssm.expect_terminate_session().returning(|_| Ok(()));
        ssm
    }

    fn untagged_ec2() -> MockEc2Api {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_instance_tags()
            .returning(|_, _| Ok(Page::default()));
        ec2
    }

    #[tokio::test]
    async fn test_discover_ready_across_sessions() {
        let pool = SessionPool::from_sessions([
            testing::session("a", "us-east-1", probing_client(&["i-1", "i-2"], "i-2"), untagged_ec2()),
            testing::session("b", "us-east-1", probing_client(&["i-3", "i-4", "i-5"], "i-9"), untagged_ec2()),
        ]);

        let discovery = discover_ready(&pool, &SessionOptions::default(), &Logger::new(Verbosity::Quiet)).await;

        assert_eq!(discovery.total_seen, 5);
        let mut ids: Vec<_> = discovery.instances.iter().map(|i| i.instance_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["i-1", "i-3", "i-4", "i-5"]);
    }

    #[tokio::test]
    async fn test_discover_ready_limit_still_counts_every_candidate() {
        let pool = SessionPool::from_sessions([testing::session(
            "a",
            "us-east-1",
            probing_client(&["i-1", "i-2", "i-3"], "none"),
            untagged_ec2(),
        )]);
        let options = SessionOptions {
            limit: 1,
            ..Default::default()
        };

        let discovery = discover_ready(&pool, &options, &Logger::new(Verbosity::Quiet)).await;

        assert_eq!(discovery.instances.len(), 1);
        assert_eq!(discovery.total_seen, 3);
    }

    #[tokio::test]
    async fn test_dry_run_opens_no_sessions() {
        let mut ssm = MockSsmApi::new();
        ssm.expect_describe_instance_information()
            .returning(|_, _, _| Ok(Page { items: vec![instance("i-1", "Linux", "Online", true)], next_token: None }));
        ssm.expect_start_session().never();
        let pool = SessionPool::from_sessions([testing::session("a", "r", ssm, MockEc2Api::new())]);
        let options = SessionOptions {
            dry_run: true,
            ..Default::default()
        };

        let discovery = discover_ready(&pool, &options, &Logger::new(Verbosity::Quiet)).await;

        assert!(discovery.instances.is_empty());
        assert_eq!(discovery.total_seen, 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_not_fatal() {
        let mut broken = MockSsmApi::new();
        broken
            .expect_describe_instance_information()
            .returning(|_, _, _| Err(ApiError::service("DescribeInstanceInformation", "AccessDenied")));
        let pool = SessionPool::from_sessions([
            testing::session("broken", "us-east-1", broken, MockEc2Api::new()),
            testing::session("ok", "us-east-1", probing_client(&["i-1"], "none"), untagged_ec2()),
        ]);

        let discovery = discover_ready(&pool, &SessionOptions::default(), &Logger::new(Verbosity::Quiet)).await;

        assert_eq!(discovery.instances.len(), 1);
    }
}
