use serde::Serialize;

use super::filter::MAX_RESULTS;
use crate::aws::api::{InstanceFilter, ManagedInstance, SsmApi, Tags};
use crate::aws::session::Session;
use crate::error::ApiError;
use crate::guarded::GuardedMap;

/// An instance that passed discovery and readiness, with its EC2 tags attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub profile: String,
    pub region: String,
    pub tags: Tags,
}

/// Ready instances from every session, keyed by instance ID.
///
/// Instance IDs are globally unique in AWS, so an ID seen through two sessions
/// (shared infrastructure visible to two profiles) collapses to the last one written.
pub type InstancePool = GuardedMap<String, InstanceInfo>;

/// Fetch every page of managed instances matching `filters`.
pub async fn fetch_instances(
    api: &dyn SsmApi,
    filters: &[InstanceFilter],
) -> Result<Vec<ManagedInstance>, ApiError> {
    let mut instances = Vec::new();
    let mut next_token = None;

    loop {
        let page = api
            .describe_instance_information(filters.to_vec(), MAX_RESULTS, next_token)
            .await?;
        instances.extend(page.items);

        match page.next_token.filter(|t| !t.is_empty()) {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    Ok(instances)
}

/// Drop instances that are offline or not Linux, and optionally those not running
/// the latest agent. The listing API cannot filter on these alongside tags.
pub fn usable_instances(instances: Vec<ManagedInstance>, latest_agent_only: bool) -> Vec<ManagedInstance> {
    instances
        .into_iter()
        .filter(|i| i.is_online() && i.is_linux())
        .filter(|i| !latest_agent_only || i.is_latest_version)
        .collect()
}

/// Discovery for one session: list, then apply the client-side predicates.
pub async fn discover(
    session: &Session,
    filters: &[InstanceFilter],
    latest_agent_only: bool,
) -> Result<Vec<ManagedInstance>, ApiError> {
    let raw = fetch_instances(session.ssm.as_ref(), filters).await?;
    let total = raw.len();
    let usable = usable_instances(raw, latest_agent_only);
    session.logger.debug(format!(
        "{} of {} managed instances are online Linux targets",
        usable.len(),
        total
    ));
    Ok(usable)
}

/// Render instances as aligned rows with a header line first.
pub fn format_table(instances: &[InstanceInfo], tag_columns: &[String]) -> Vec<String> {
    let mut rows: Vec<Vec<&str>> = Vec::with_capacity(instances.len() + 1);

    let mut header = vec!["Instance ID", "Region", "Profile"];
    header.extend(tag_columns.iter().map(String::as_str));
    rows.push(header);

    for instance in instances {
        let mut row = vec![
            instance.instance_id.as_str(),
            instance.region.as_str(),
            instance.profile.as_str(),
        ];
        row.extend(
            tag_columns
                .iter()
                .map(|tag| instance.tags.get(tag).map(String::as_str).unwrap_or("")),
        );
        rows.push(row);
    }

    let columns = rows[0].len();
    let widths: Vec<usize> = (0..columns)
        .map(|col| rows.iter().map(|row| row[col].len()).max().unwrap_or(0))
        .collect();

    rows.iter()
        .map(|row| {
            row.iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width + 2))
                .collect::<String>()
                .trim_end()
                .to_string()
        })
        .collect()
}
