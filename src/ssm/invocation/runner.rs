use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;

use super::types::{InvocationJob, InvocationResult};
use crate::aws::api::{InvocationOutput, SsmApi};
use crate::aws::session::Session;
use crate::error::ApiError;

const NO_INVOCATIONS: &str = "API response contained no invocations";
const NOT_LISTED: &str = "no invocation was created for this instance";
const RESULT_LOST: &str = "invocation result could not be collected";

/// Delays used while waiting on SSM. Tests shrink these to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between `ListCommands` and `GetCommandInvocation` polls.
    pub interval: Duration,
    /// Delay between attempts while invocations are not yet visible.
    pub retry_delay: Duration,
    /// Total attempts, including the first, while invocations are not yet visible.
    pub attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            attempts: 3,
        }
    }
}

/// Submits jobs through one session and turns them into per-target results.
///
/// Every intended target comes back with exactly one result, whatever fails along
/// the way: API failures become `ClientError` results instead of errors.
#[derive(Debug, Clone)]
pub struct InvocationRunner {
    session: Arc<Session>,
    poll: PollSettings,
}

impl InvocationRunner {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// One submission per batch of targets. MaxConcurrency/MaxErrors apply within a batch.
    pub async fn run_batch(&self, job: &InvocationJob) -> Vec<InvocationResult> {
        let runs = job.batches().into_iter().map(|batch| self.run(batch));
        join_all(runs).await.into_iter().flatten().collect()
    }

    /// One submission per target, all in flight at once.
    pub async fn run_per_instance(&self, job: &InvocationJob) -> Vec<InvocationResult> {
        match job.instance_ids() {
            Some(ids) => {
                let runs = ids.iter().map(|id| self.run(job.for_instance(id)));
                join_all(runs).await.into_iter().flatten().collect()
            }
            None => self.run(job.clone()).await,
        }
    }

    async fn run(&self, job: InvocationJob) -> Vec<InvocationResult> {
        let logger = &self.session.logger;

        let command_id = match self.session.ssm.send_command(&job).await {
            Ok(id) => id,
            Err(e) => {
                logger.error(format!("Error when calling the SendCommand API: {}", e));
                return self.client_errors(&job, None, &e);
            }
        };
        logger.info(format!(
            "Started invocation {} for {} in {}",
            command_id,
            self.session.profile_name(),
            self.session.region
        ));

        if let Err(e) = self.wait_for_command(&command_id).await {
            logger.error(format!("Error when waiting on command {}: {}", command_id, e));
            return self.client_errors(&job, Some(&command_id), &e);
        }

        let listed = match self.list_invocation_targets(&command_id).await {
            Ok(listed) => listed,
            Err(e) => {
                logger.error(format!("Error when listing invocations for {}: {}", command_id, e));
                return self.client_errors(&job, Some(&command_id), &e);
            }
        };

        let mut results = self.fetch_results(&command_id, &listed).await;

        let collected: BTreeSet<String> = results.iter().filter_map(|r| r.instance_id.clone()).collect();
        for instance_id in &listed {
            if !collected.contains(instance_id) {
                results.push(self.client_error(Some(&command_id), instance_id, RESULT_LOST));
            }
        }
        if let Some(ids) = job.instance_ids() {
            for instance_id in ids {
                if !collected.contains(instance_id) && !listed.contains(instance_id) {
                    logger.warning(format!("Command {} never reached {}", command_id, instance_id));
                    results.push(self.client_error(Some(&command_id), instance_id, NOT_LISTED));
                }
            }
        }

        results
    }

    /// Poll `ListCommands` until the command leaves its pending states.
    async fn wait_for_command(&self, command_id: &str) -> Result<String, ApiError> {
        loop {
            let statuses = self.session.ssm.list_command_statuses(command_id).await?;
            let status = match statuses.as_slice() {
                [status] => status.clone(),
                other => {
                    return Err(ApiError::incomplete(
                        "ListCommands",
                        format!("expected 1 command for {}, got {}", command_id, other.len()),
                    ))
                }
            };

            if status != "Pending" && status != "InProgress" {
                return Ok(status);
            }
            self.session
                .logger
                .debug(format!("Command {} is {}, waiting", command_id, status));
            sleep(self.poll.interval).await;
        }
    }

    /// Every instance with an invocation for the command, retried while the listing is empty.
    async fn list_invocation_targets(&self, command_id: &str) -> Result<BTreeSet<String>, ApiError> {
        for attempt in 0..self.poll.attempts {
            if attempt > 0 {
                sleep(self.poll.retry_delay).await;
            }

            let mut targets = BTreeSet::new();
            let mut next_token = None;
            loop {
                let page = self
                    .session
                    .ssm
                    .list_command_invocations(command_id, next_token)
                    .await?;
                targets.extend(page.items);
                match page.next_token.filter(|t| !t.is_empty()) {
                    Some(token) => next_token = Some(token),
                    None => break,
                }
            }

            if !targets.is_empty() {
                return Ok(targets);
            }
        }

        Err(ApiError::incomplete("ListCommandInvocations", NO_INVOCATIONS))
    }

    async fn fetch_results(&self, command_id: &str, targets: &BTreeSet<String>) -> Vec<InvocationResult> {
        let mut tasks = JoinSet::new();
        for instance_id in targets {
            let session = Arc::clone(&self.session);
            let command_id = command_id.to_string();
            let instance_id = instance_id.clone();
            let poll = self.poll;
            tasks.spawn(async move {
                match wait_for_invocation(session.ssm.as_ref(), &command_id, &instance_id, &poll).await {
                    Ok(output) => InvocationResult::from_output(&session, &command_id, output),
                    Err(e) => {
                        session.logger.error(format!(
                            "Error when retrieving invocation output for {}: {}",
                            instance_id, e
                        ));
                        InvocationResult::client_error(&session, Some(&command_id), Some(instance_id), e)
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => self
                    .session
                    .logger
                    .error(format!("Invocation fetch task failed: {}", e)),
            }
        }
        results
    }

    fn client_error(&self, command_id: Option<&str>, instance_id: &str, error: &str) -> InvocationResult {
        InvocationResult::client_error(&self.session, command_id, Some(instance_id.to_string()), error)
    }

    /// One `ClientError` per intended target, or a single one when targets were filters.
    fn client_errors(&self, job: &InvocationJob, command_id: Option<&str>, error: &ApiError) -> Vec<InvocationResult> {
        match job.instance_ids() {
            Some(ids) => ids
                .iter()
                .map(|id| InvocationResult::client_error(&self.session, command_id, Some(id.clone()), error))
                .collect(),
            None => vec![InvocationResult::client_error(&self.session, command_id, None, error)],
        }
    }
}

/// Poll `GetCommandInvocation` until the invocation is terminal.
///
/// An invocation that is not visible yet, or a throttled poll, counts as a miss;
/// the call gives up after `attempts` misses.
pub async fn wait_for_invocation(
    api: &dyn SsmApi,
    command_id: &str,
    instance_id: &str,
    poll: &PollSettings,
) -> Result<InvocationOutput, ApiError> {
    let mut misses = 0;
    loop {
        match api.get_command_invocation(command_id, instance_id).await {
            Ok(output) if output.status.is_terminal() => return Ok(output),
            Ok(_) => sleep(poll.interval).await,
            Err(e) if matches!(e, ApiError::InvocationNotFound(_)) || e.is_throttling() => {
                misses += 1;
                if misses >= poll.attempts {
                    return Err(e);
                }
                sleep(poll.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
