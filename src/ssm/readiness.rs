use crate::aws::api::{ManagedInstance, SsmApi};
use crate::aws::session::Session;
use crate::ec2;
use crate::error::ApiError;
use crate::ssm::instance::{InstanceInfo, InstancePool};

/// Outcome of probing one instance for start-session support.
#[derive(Debug)]
pub enum Readiness {
    Ready,
    /// The session opened, so the instance is usable, but closing it failed.
    ReadyTeardownFailed(ApiError),
    NotReady,
    Failed(ApiError),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready | Readiness::ReadyTeardownFailed(_))
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Readiness::ReadyTeardownFailed(e) | Readiness::Failed(e) => Some(e),
            Readiness::Ready | Readiness::NotReady => None,
        }
    }
}

/// Open and immediately close a session against `instance_id`.
///
/// Sessions are rate limited per account and region, so every probe that opens one
/// also terminates it.
pub async fn check_session_readiness(api: &dyn SsmApi, instance_id: &str) -> Readiness {
    match api.start_session(instance_id).await {
        Ok(Some(session_id)) => match api.terminate_session(&session_id).await {
            Ok(()) => Readiness::Ready,
            Err(e) => Readiness::ReadyTeardownFailed(e),
        },
        Ok(None) => Readiness::Ready,
        Err(ApiError::TargetNotConnected(_)) | Err(ApiError::Throttled(_)) => Readiness::NotReady,
        Err(e) => Readiness::Failed(e),
    }
}

/// Probe candidates in order until `limit` ready instances are found (0 = no limit),
/// enrich the ready ones with EC2 tags and add them to `pool`. Returns how many were added.
pub async fn collect_ready_instances(
    session: &Session,
    candidates: &[ManagedInstance],
    limit: usize,
    pool: &InstancePool,
) -> usize {
    let mut ready = Vec::new();

    for candidate in candidates {
        if limit > 0 && ready.len() >= limit {
            break;
        }

        let id = candidate.instance_id.as_str();
        let readiness = check_session_readiness(session.ssm.as_ref(), id).await;
        match &readiness {
            Readiness::ReadyTeardownFailed(e) => session
                .logger
                .warning(format!("Could not terminate readiness probe session for {}: {}", id, e)),
            Readiness::Failed(e) => session
                .logger
                .error(format!("Error when checking session readiness for {}: {}", id, e)),
            Readiness::NotReady => session
                .logger
                .debug(format!("Instance {} is not ready for sessions", id)),
            Readiness::Ready => {}
        }

        if readiness.is_ready() {
            ready.push(candidate.instance_id.clone());
        }
    }

    let mut tags = ec2::fetch_instance_tags(session.ec2.as_ref(), &ready, &session.logger).await;

    for instance_id in &ready {
        pool.insert(
            instance_id.clone(),
            InstanceInfo {
                instance_id: instance_id.clone(),
                profile: session.profile_name().to_string(),
                region: session.region.clone(),
                tags: tags.remove(instance_id).unwrap_or_default(),
            },
        );
    }

    ready.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::api::fixtures::instance;
    use crate::aws::api::{InstanceTags, MockEc2Api, MockSsmApi, Page};
    use crate::aws::session::testing;
    use pretty_assertions::assert_eq;

    fn session_client() -> MockSsmApi {
        let mut ssm = MockSsmApi::new();
        ssm.expect_start_session().returning(|target| match target {
            "i-123" => Ok(Some("ready-instance-id".to_string())),
            "i-456" => Err(ApiError::TargetNotConnected(
                "bad instance role permissions".to_string(),
            )),
            "i-789" => Err(ApiError::service("StartSession", "any other error")),
            "i-000" => Ok(Some("session-term-error".to_string())),
            "i-999" => Err(ApiError::Throttled("rate exceeded".to_string())),
            _ => Ok(None),
        });
        ssm.expect_terminate_session().returning(|session_id| {
            if session_id == "session-term-error" {
                Err(ApiError::service("TerminateSession", "DoesNotExistException"))
            } else {
                Ok(())
            }
        });
        ssm
    }

    #[tokio::test]
    async fn test_check_session_readiness() {
        let ssm = session_client();

        let ready = check_session_readiness(&ssm, "i-123").await;
        assert!(ready.is_ready());
        assert!(ready.error().is_none());

        let not_connected = check_session_readiness(&ssm, "i-456").await;
        assert!(!not_connected.is_ready());
        assert!(not_connected.error().is_none());

        let failed = check_session_readiness(&ssm, "i-789").await;
        assert!(!failed.is_ready());
        assert!(failed.error().is_some());

        let teardown = check_session_readiness(&ssm, "i-000").await;
        assert!(teardown.is_ready());
        assert!(teardown.error().is_some());

        let throttled = check_session_readiness(&ssm, "i-999").await;
        assert!(!throttled.is_ready());
        assert!(throttled.error().is_none());
    }

    #[tokio::test]
    async fn test_collect_ready_instances_with_tags() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_instance_tags()
            .withf(|ids, token| ids == &["i-123".to_string(), "i-000".to_string()] && token.is_none())
            .times(1)
            .returning(|_, _| {
                Ok(Page {
                    items: vec![InstanceTags {
                        instance_id: "i-123".into(),
                        tags: [("Name".to_string(), "web-1".to_string())].into_iter().collect(),
                    }],
                    next_token: None,
                })
            });
        let session = testing::session("test", "us-east-1", session_client(), ec2);
        let candidates = vec![
            instance("i-123", "Linux", "Online", true),
            instance("i-456", "Linux", "Online", true),
            instance("i-789", "Linux", "Online", true),
            instance("i-000", "Linux", "Online", true),
            instance("mi-555", "Linux", "Online", true),
        ];

        let pool = InstancePool::new();
        let added = collect_ready_instances(&session, &candidates, 0, &pool).await;

        assert_eq!(added, 3);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["i-000", "i-123", "mi-555"]);
        assert_eq!(snapshot["i-123"].tags.get("Name").map(String::as_str), Some("web-1"));
        assert!(snapshot["i-000"].tags.is_empty());
        assert_eq!(snapshot["mi-555"].profile, "test");
        assert_eq!(snapshot["mi-555"].region, "us-east-1");
    }

    #[tokio::test]
    async fn test_collect_ready_instances_keeps_instances_when_tags_fail() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_instance_tags()
            .times(1)
            .returning(|_, _| Err(ApiError::service("DescribeInstances", "UnauthorizedOperation")));
        let session = testing::session("test", "us-east-1", session_client(), ec2);
        let candidates = vec![
            instance("i-123", "Linux", "Online", true),
            instance("i-456", "Linux", "Online", true),
            instance("i-000", "Linux", "Online", true),
            instance("mi-555", "Linux", "Online", true),
        ];

        let pool = InstancePool::new();
        let added = collect_ready_instances(&session, &candidates, 0, &pool).await;

        assert_eq!(added, 3);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["i-000", "i-123", "mi-555"]);
        for info in snapshot.values() {
            assert!(info.tags.is_empty(), "{}", info.instance_id);
            assert_eq!(info.profile, "test");
            assert_eq!(info.region, "us-east-1");
        }
    }

    #[tokio::test]
    async fn test_collect_ready_instances_stops_at_limit() {
        let mut ssm = MockSsmApi::new();
        ssm.expect_start_session().times(2).returning(|_| Ok(None));
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_instance_tags()
            .returning(|_, _| Ok(Page::default()));
        let session = testing::session("test", "us-east-1", ssm, ec2);
        let candidates: Vec<_> = (0..5)
            .map(|n| instance(&format!("i-{n}"), "Linux", "Online", true))
            .collect();

        let pool = InstancePool::new();
        let added = collect_ready_instances(&session, &candidates, 2, &pool).await;

        assert_eq!(added, 2);
        assert_eq!(pool.len(), 2);
    }
}
