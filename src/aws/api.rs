//! The subset of the SSM and EC2 APIs this tool talks to.
//!
//! Kept as traits so every component can run against mocks in tests; the
//! SDK-backed implementations live in [`super::sdk`].

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::ssm::invocation::{InvocationJob, InvocationStatus};

pub const PLATFORM_LINUX: &str = "Linux";
pub const PING_ONLINE: &str = "Online";

pub type Tags = BTreeMap<String, String>;

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Server-side filter for `DescribeInstanceInformation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFilter {
    pub key: String,
    pub values: Vec<String>,
}

/// An SSM managed instance as reported by `DescribeInstanceInformation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInstance {
    pub instance_id: String,
    pub platform_type: String,
    pub ping_status: String,
    pub is_latest_version: bool,
}

impl ManagedInstance {
    pub fn is_online(&self) -> bool {
        self.ping_status == PING_ONLINE
    }

    pub fn is_linux(&self) -> bool {
        self.platform_type == PLATFORM_LINUX
    }
}

/// Output of `GetCommandInvocation` for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutput {
    pub instance_id: String,
    pub status: InvocationStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceTags {
    pub instance_id: String,
    pub tags: Tags,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SsmApi: Send + Sync {
    async fn describe_instance_information(
        &self,
        filters: Vec<InstanceFilter>,
        max_results: i32,
        next_token: Option<String>,
    ) -> Result<Page<ManagedInstance>, ApiError>;

    /// Returns the session ID, if the service handed one back.
    async fn start_session(&self, target: &str) -> Result<Option<String>, ApiError>;

    async fn terminate_session(&self, session_id: &str) -> Result<(), ApiError>;

    /// Submit a job and return its command ID.
    async fn send_command(&self, job: &InvocationJob) -> Result<String, ApiError>;

    /// Command-level statuses for a command ID (`ListCommands`).
    async fn list_command_statuses(&self, command_id: &str) -> Result<Vec<String>, ApiError>;

    /// Instance IDs that have an invocation for the command (`ListCommandInvocations`).
    async fn list_command_invocations(
        &self,
        command_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>, ApiError>;

    async fn get_command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<InvocationOutput, ApiError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ec2Api: Send + Sync {
    async fn describe_instance_tags(
        &self,
        instance_ids: Vec<String>,
        next_token: Option<String>,
    ) -> Result<Page<InstanceTags>, ApiError>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn instance(id: &str, platform: &str, ping: &str, latest: bool) -> ManagedInstance {
        ManagedInstance {
            instance_id: id.to_string(),
            platform_type: platform.to_string(),
            ping_status: ping.to_string(),
            is_latest_version: latest,
        }
    }

    pub fn output(id: &str, status: InvocationStatus, stdout: &str, stderr: &str) -> InvocationOutput {
        InvocationOutput {
            instance_id: id.to_string(),
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}
