use async_trait::async_trait;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ssm::types::{InstanceInformationStringFilter, Target};
use aws_sdk_ssm::Client as SsmClient;

use super::api::{
    Ec2Api, InstanceFilter, InstanceTags, InvocationOutput, ManagedInstance, Page, SsmApi, Tags,
};
use crate::error::ApiError;
use crate::ssm::invocation::{InvocationJob, InvocationStatus, JobTargets};

/// [`SsmApi`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct SdkSsm {
    client: SsmClient,
}

impl SdkSsm {
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SsmApi for SdkSsm {
    async fn describe_instance_information(
        &self,
        filters: Vec<InstanceFilter>,
        max_results: i32,
        next_token: Option<String>,
    ) -> Result<Page<ManagedInstance>, ApiError> {
        let mut sdk_filters = Vec::with_capacity(filters.len());
        for filter in filters {
            let built = InstanceInformationStringFilter::builder()
                .key(filter.key)
                .set_values(Some(filter.values))
                .build()
                .map_err(|e| ApiError::service("DescribeInstanceInformation", e.to_string()))?;
            sdk_filters.push(built);
        }

        let response = self
            .client
            .describe_instance_information()
            .set_filters((!sdk_filters.is_empty()).then_some(sdk_filters))
            .max_results(max_results)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("DescribeInstanceInformation", e))?;

        let items = response
            .instance_information_list()
            .iter()
            .filter_map(|info| {
                Some(ManagedInstance {
                    instance_id: info.instance_id()?.to_string(),
                    platform_type: info
                        .platform_type()
                        .map(|p| p.as_str())
                        .unwrap_or("Unknown")
                        .to_string(),
                    ping_status: info
                        .ping_status()
                        .map(|s| s.as_str())
                        .unwrap_or("Unknown")
                        .to_string(),
                    is_latest_version: info.is_latest_version().unwrap_or(false),
                })
            })
            .collect();

        Ok(Page {
            items,
            next_token: response.next_token().map(str::to_string),
        })
    }

    async fn start_session(&self, target: &str) -> Result<Option<String>, ApiError> {
        let response = self
            .client
            .start_session()
            .target(target)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("StartSession", e))?;

        Ok(response.session_id().map(str::to_string))
    }

    async fn terminate_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.client
            .terminate_session()
            .session_id(session_id)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("TerminateSession", e))?;
        Ok(())
    }

    async fn send_command(&self, job: &InvocationJob) -> Result<String, ApiError> {
        let mut request = self
            .client
            .send_command()
            .document_name(job.document_name())
            .set_parameters(Some(job.parameters().to_map()))
            .set_max_concurrency(job.max_concurrency().map(|l| l.to_string()))
            .set_max_errors(job.max_errors().map(|l| l.to_string()));

        request = match job.targets() {
            JobTargets::Instances(ids) => request.set_instance_ids(Some(ids.clone())),
            JobTargets::Filters(filters) => request.set_targets(Some(
                filters
                    .iter()
                    .map(|f| {
                        Target::builder()
                            .key(f.key.clone())
                            .set_values(Some(f.values.clone()))
                            .build()
                    })
                    .collect(),
            )),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("SendCommand", e))?;

        response
            .command()
            .and_then(|c| c.command_id())
            .map(str::to_string)
            .ok_or_else(|| ApiError::incomplete("SendCommand", "missing command ID"))
    }

    async fn list_command_statuses(&self, command_id: &str) -> Result<Vec<String>, ApiError> {
        let response = self
            .client
            .list_commands()
            .command_id(command_id)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListCommands", e))?;

        Ok(response
            .commands()
            .iter()
            .map(|c| c.status().map(|s| s.as_str()).unwrap_or("Unknown").to_string())
            .collect())
    }

    async fn list_command_invocations(
        &self,
        command_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>, ApiError> {
        let response = self
            .client
            .list_command_invocations()
            .command_id(command_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("ListCommandInvocations", e))?;

        Ok(Page {
            items: response
                .command_invocations()
                .iter()
                .filter_map(|i| i.instance_id().map(str::to_string))
                .collect(),
            next_token: response.next_token().map(str::to_string),
        })
    }

    async fn get_command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<InvocationOutput, ApiError> {
        let response = self
            .client
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("GetCommandInvocation", e))?;

        let details = response
            .status_details()
            .or_else(|| response.status().map(|s| s.as_str()))
            .ok_or_else(|| ApiError::incomplete("GetCommandInvocation", "missing status"))?;

        Ok(InvocationOutput {
            instance_id: response.instance_id().unwrap_or(instance_id).to_string(),
            status: InvocationStatus::from_details(details),
            stdout: response.standard_output_content().unwrap_or_default().to_string(),
            stderr: response.standard_error_content().unwrap_or_default().to_string(),
        })
    }
}

/// [`Ec2Api`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct SdkEc2 {
    client: Ec2Client,
}

impl SdkEc2 {
    pub fn new(client: Ec2Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Ec2Api for SdkEc2 {
    async fn describe_instance_tags(
        &self,
        instance_ids: Vec<String>,
        next_token: Option<String>,
    ) -> Result<Page<InstanceTags>, ApiError> {
        let response = self
            .client
            .describe_instances()
            .set_instance_ids(Some(instance_ids))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk("DescribeInstances", e))?;

        let mut items = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(instance_id) = instance.instance_id() else {
                    continue;
                };
                let tags: Tags = instance
                    .tags()
                    .iter()
                    .filter_map(|tag| match (tag.key(), tag.value()) {
                        (Some(key), Some(value)) => Some((key.to_string(), value.to_string())),
                        _ => None,
                    })
                    .collect();
                items.push(InstanceTags {
                    instance_id: instance_id.to_string(),
                    tags,
                });
            }
        }

        Ok(Page {
            items,
            next_token: response.next_token().map(str::to_string),
        })
    }
}
