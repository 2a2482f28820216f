use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::aws::api::InvocationOutput;
use crate::aws::session::Session;

pub const RUN_SHELL_SCRIPT: &str = "AWS-RunShellScript";

/// `executionTimeout` sent with every job, in seconds.
pub const EXECUTION_TIMEOUT_SECONDS: &str = "600";

/// Most instance IDs a single `SendCommand` call accepts.
pub const MAX_INSTANCE_IDS: usize = 50;

static MAX_CONCURRENCY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([1-9][0-9]*|[1-9][0-9]%|[1-9]%|100%)$")
        .expect("max-concurrency pattern is valid")
});
static MAX_ERRORS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([1-9][0-9]*|0|[1-9][0-9]%|[0-9]%|100%)$")
        .expect("max-errors pattern is valid")
});
const MAX_LIMIT_LEN: usize = 7;

/// Status of one command invocation on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvocationStatus {
    Pending,
    InProgress,
    Delayed,
    Cancelling,
    Success,
    Failed,
    DeliveryTimedOut,
    ExecutionTimedOut,
    Cancelled,
    Undeliverable,
    Terminated,
    /// Synthesized locally when the API call itself failed.
    ClientError,
    Other(String),
}

impl InvocationStatus {
    /// Parse the `StatusDetails` (or `Status`) string returned by `GetCommandInvocation`.
    pub fn from_details(details: &str) -> Self {
        match details {
            "Pending" => InvocationStatus::Pending,
            "InProgress" => InvocationStatus::InProgress,
            "Delayed" => InvocationStatus::Delayed,
            "Cancelling" => InvocationStatus::Cancelling,
            "Success" => InvocationStatus::Success,
            "Failed" => InvocationStatus::Failed,
            "DeliveryTimedOut" => InvocationStatus::DeliveryTimedOut,
            "ExecutionTimedOut" | "TimedOut" => InvocationStatus::ExecutionTimedOut,
            "Canceled" | "Cancelled" => InvocationStatus::Cancelled,
            "Undeliverable" => InvocationStatus::Undeliverable,
            "Terminated" => InvocationStatus::Terminated,
            other => InvocationStatus::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            InvocationStatus::Pending
                | InvocationStatus::InProgress
                | InvocationStatus::Delayed
                | InvocationStatus::Cancelling
        )
    }

    pub fn is_success(&self) -> bool {
        *self == InvocationStatus::Success
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationStatus::Pending => "Pending",
            InvocationStatus::InProgress => "InProgress",
            InvocationStatus::Delayed => "Delayed",
            InvocationStatus::Cancelling => "Cancelling",
            InvocationStatus::Success => "Success",
            InvocationStatus::Failed => "Failed",
            InvocationStatus::DeliveryTimedOut => "DeliveryTimedOut",
            InvocationStatus::ExecutionTimedOut => "ExecutionTimedOut",
            InvocationStatus::Cancelled => "Cancelled",
            InvocationStatus::Undeliverable => "Undeliverable",
            InvocationStatus::Terminated => "Terminated",
            InvocationStatus::ClientError => "ClientError",
            InvocationStatus::Other(s) => s,
        };
        f.write_str(name)
    }
}

impl Serialize for InvocationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("value must be 1 to {max} characters long, got {len}")]
    Length { len: usize, max: usize },
    #[error("'{value}' is not a valid {kind} (expected a count such as 10 or a percentage such as 10%)")]
    Format { value: String, kind: &'static str },
}

/// A `MaxConcurrency` or `MaxErrors` value: an absolute count or a percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimit(String);

impl ExecutionLimit {
    pub fn max_concurrency(value: &str) -> Result<Self, LimitError> {
        Self::parse(value, &MAX_CONCURRENCY_PATTERN, "max-concurrency")
    }

    /// Like [`ExecutionLimit::max_concurrency`], but `0` is also allowed.
    pub fn max_errors(value: &str) -> Result<Self, LimitError> {
        Self::parse(value, &MAX_ERRORS_PATTERN, "max-errors")
    }

    fn parse(value: &str, pattern: &Regex, kind: &'static str) -> Result<Self, LimitError> {
        if value.is_empty() || value.len() > MAX_LIMIT_LEN {
            return Err(LimitError::Length {
                len: value.len(),
                max: MAX_LIMIT_LEN,
            });
        }
        if !pattern.is_match(value) {
            return Err(LimitError::Format {
                value: value.to_string(),
                kind,
            });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("instance IDs and target filters cannot be used in the same job")]
    ConflictingTargets,
    #[error("a job needs either instance IDs or target filters")]
    NoTargets,
    #[error("no commands were given")]
    NoCommands,
}

/// Parameters for the `AWS-RunShellScript` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellParameters {
    commands: Vec<String>,
    execution_timeout: String,
}

impl ShellParameters {
    pub fn new(commands: Vec<String>) -> Result<Self, JobError> {
        if commands.is_empty() {
            return Err(JobError::NoCommands);
        }
        Ok(Self {
            commands,
            execution_timeout: EXECUTION_TIMEOUT_SECONDS.to_string(),
        })
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn to_map(&self) -> HashMap<String, Vec<String>> {
        HashMap::from([
            ("commands".to_string(), self.commands.clone()),
            (
                "executionTimeout".to_string(),
                vec![self.execution_timeout.clone()],
            ),
        ])
    }
}

/// A `SendCommand` target expression such as `tag:env = [prod]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFilter {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTargets {
    Instances(Vec<String>),
    Filters(Vec<TargetFilter>),
}

/// One `SendCommand` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationJob {
    document_name: String,
    targets: JobTargets,
    parameters: ShellParameters,
    max_concurrency: Option<ExecutionLimit>,
    max_errors: Option<ExecutionLimit>,
}

impl InvocationJob {
    /// Exactly one of `instance_ids` and `filters` must be non-empty.
    pub fn new(
        parameters: ShellParameters,
        instance_ids: Vec<String>,
        filters: Vec<TargetFilter>,
    ) -> Result<Self, JobError> {
        let targets = match (instance_ids.is_empty(), filters.is_empty()) {
            (false, false) => return Err(JobError::ConflictingTargets),
            (true, true) => return Err(JobError::NoTargets),
            (false, true) => JobTargets::Instances(instance_ids),
            (true, false) => JobTargets::Filters(filters),
        };
        Ok(Self {
            document_name: RUN_SHELL_SCRIPT.to_string(),
            targets,
            parameters,
            max_concurrency: None,
            max_errors: None,
        })
    }

    pub fn with_limits(
        mut self,
        max_concurrency: Option<ExecutionLimit>,
        max_errors: Option<ExecutionLimit>,
    ) -> Self {
        self.max_concurrency = max_concurrency;
        self.max_errors = max_errors;
        self
    }

    /// The same job aimed at a single instance. Limits do not apply to one target.
    pub fn for_instance(&self, instance_id: &str) -> Self {
        Self {
            document_name: self.document_name.clone(),
            targets: JobTargets::Instances(vec![instance_id.to_string()]),
            parameters: self.parameters.clone(),
            max_concurrency: None,
            max_errors: None,
        }
    }

    /// Split into jobs of at most [`MAX_INSTANCE_IDS`] instances each.
    pub fn batches(&self) -> Vec<Self> {
        match &self.targets {
            JobTargets::Instances(ids) if ids.len() > MAX_INSTANCE_IDS => ids
                .chunks(MAX_INSTANCE_IDS)
                .map(|chunk| Self {
                    targets: JobTargets::Instances(chunk.to_vec()),
                    ..self.clone()
                })
                .collect(),
            _ => vec![self.clone()],
        }
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn targets(&self) -> &JobTargets {
        &self.targets
    }

    pub fn parameters(&self) -> &ShellParameters {
        &self.parameters
    }

    pub fn max_concurrency(&self) -> Option<&ExecutionLimit> {
        self.max_concurrency.as_ref()
    }

    pub fn max_errors(&self) -> Option<&ExecutionLimit> {
        self.max_errors.as_ref()
    }

    /// Explicit instance IDs, or `None` when the service resolves targets from filters.
    pub fn instance_ids(&self) -> Option<&[String]> {
        match &self.targets {
            JobTargets::Instances(ids) => Some(ids),
            JobTargets::Filters(_) => None,
        }
    }
}

/// Outcome of one invocation on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResult {
    pub instance_id: Option<String>,
    pub profile: String,
    pub region: String,
    pub command_id: Option<String>,
    pub status: InvocationStatus,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl InvocationResult {
    pub fn from_output(session: &Session, command_id: &str, output: InvocationOutput) -> Self {
        Self {
            instance_id: Some(output.instance_id),
            profile: session.profile_name().to_string(),
            region: session.region.clone(),
            command_id: Some(command_id.to_string()),
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            error: None,
        }
    }

    pub fn client_error(
        session: &Session,
        command_id: Option<&str>,
        instance_id: Option<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            instance_id,
            profile: session.profile_name().to_string(),
            region: session.region.clone(),
            command_id: command_id.map(str::to_string),
            status: InvocationStatus::ClientError,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Instance ID, or `-` for results not tied to one instance.
    pub fn target(&self) -> &str {
        self.instance_id.as_deref().unwrap_or("-")
    }
}
