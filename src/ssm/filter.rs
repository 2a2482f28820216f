use crate::aws::api::{InstanceFilter, Tags};
use crate::ssm::invocation::TargetFilter;

/// Largest page `DescribeInstanceInformation` will return.
pub const MAX_RESULTS: i32 = 50;

/// One `tag:<key>` filter per tag. The service ANDs them together.
pub fn tag_filters(tags: &Tags) -> Vec<InstanceFilter> {
    tags.iter()
        .map(|(key, value)| InstanceFilter {
            key: format!("tag:{}", key),
            values: vec![value.clone()],
        })
        .collect()
}

/// Filters for `DescribeInstanceInformation` from `--filter` tags and `--instance` IDs.
pub fn describe_filters(tags: &Tags, instance_ids: &[String]) -> Vec<InstanceFilter> {
    let mut filters = tag_filters(tags);
    if !instance_ids.is_empty() {
        filters.push(InstanceFilter {
            key: "InstanceIds".to_string(),
            values: instance_ids.to_vec(),
        });
    }
    filters
}

/// `SendCommand` targets for the same tags, resolved by the service at submission.
pub fn target_filters(tags: &Tags) -> Vec<TargetFilter> {
    tags.iter()
        .map(|(key, value)| TargetFilter {
            key: format!("tag:{}", key),
            values: vec![value.clone()],
        })
        .collect()
}

/// Parse a `key=value` tag argument.
pub fn parse_tag(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected a tag in key=value form, got '{}'", arg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_describe_filters_tags_and_instances() {
        let filters = describe_filters(
            &tags(&[("foo", "1"), ("bar", "2"), ("baz", "3")]),
            &["i-12345".to_string(), "i-67890".to_string()],
        );

        assert_eq!(filters.len(), 4);
        assert_eq!(
            filters.last(),
            Some(&InstanceFilter {
                key: "InstanceIds".into(),
                values: vec!["i-12345".into(), "i-67890".into()],
            })
        );
    }

    #[test]
    fn test_tag_filters_are_stable() {
        let tags = tags(&[("env", "dev"), ("team", "core"), ("app", "api")]);
        let first = tag_filters(&tags);
        let second = tag_filters(&tags);
        assert_eq!(first.len(), tags.len());
        assert_eq!(first, second);
        assert!(first.iter().any(|f| f.key == "tag:env" && f.values == vec!["dev"]));
    }

    #[test]
    fn test_target_filters() {
        let targets = target_filters(&tags(&[("env", "prod")]));
        assert_eq!(
            targets,
            vec![TargetFilter {
                key: "tag:env".into(),
                values: vec!["prod".into()],
            }]
        );
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("env=dev"), Ok(("env".into(), "dev".into())));
        assert_eq!(parse_tag("url=a=b"), Ok(("url".into(), "a=b".into())));
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=dev").is_err());
    }
}
