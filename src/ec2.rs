use std::collections::HashMap;

use crate::aws::api::{Ec2Api, Tags};
use crate::error::ApiError;
use crate::logger::Logger;

/// Managed (non-EC2) instances registered through hybrid activations use this prefix
/// and have no EC2 tags to fetch.
pub const MANAGED_INSTANCE_PREFIX: &str = "mi-";

/// Most instance IDs sent in a single `DescribeInstances` call.
pub const DESCRIBE_BATCH_SIZE: usize = 1000;

pub fn is_ec2_instance(instance_id: &str) -> bool {
    !instance_id.starts_with(MANAGED_INSTANCE_PREFIX)
}

/// Tags for every EC2 instance in `instance_ids`.
///
/// A failed batch is logged and skipped; its instances are simply absent from the
/// returned map.
pub async fn fetch_instance_tags(
    ec2: &dyn Ec2Api,
    instance_ids: &[String],
    logger: &Logger,
) -> HashMap<String, Tags> {
    let ec2_ids: Vec<String> = instance_ids
        .iter()
        .filter(|id| is_ec2_instance(id))
        .cloned()
        .collect();

    let mut tags = HashMap::new();
    for batch in ec2_ids.chunks(DESCRIBE_BATCH_SIZE) {
        match describe_batch(ec2, batch).await {
            Ok(found) => tags.extend(found),
            Err(e) => logger.error(format!(
                "Error when trying to retrieve EC2 instance tags for {} instances: {}",
                batch.len(),
                e
            )),
        }
    }
    tags
}

async fn describe_batch(ec2: &dyn Ec2Api, batch: &[String]) -> Result<Vec<(String, Tags)>, ApiError> {
    let mut found = Vec::new();
    let mut next_token = None;

    loop {
        let page = ec2.describe_instance_tags(batch.to_vec(), next_token).await?;
        found.extend(page.items.into_iter().map(|i| (i.instance_id, i.tags)));

        match page.next_token.filter(|t| !t.is_empty()) {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    Ok(found)
}
