use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::api::{Ec2Api, SsmApi};
use super::sdk::{SdkEc2, SdkSsm};
use crate::config::{Environment, DEFAULT_PROFILE};
use crate::guarded::GuardedMap;
use crate::logger::Logger;

const MAX_API_ATTEMPTS: u32 = 10;

/// Where session credentials come from. Resolved once, before any session is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Named profiles from the shared config/credentials files.
    SharedProfiles {
        profiles: Vec<String>,
        regions: Vec<String>,
    },
    /// STS credentials exported in the environment; profiles are ignored.
    EnvironmentSts { regions: Vec<String> },
}

impl CredentialSource {
    pub fn resolve(profiles: Vec<String>, regions: Vec<String>, env: &Environment) -> Self {
        if env.sts_credentials_set() {
            CredentialSource::EnvironmentSts { regions }
        } else {
            CredentialSource::SharedProfiles { profiles, regions }
        }
    }

    /// Every unique (profile, region) permutation to build a session for.
    pub fn session_keys(&self) -> Vec<SessionKey> {
        let keys: BTreeSet<SessionKey> = match self {
            CredentialSource::SharedProfiles { profiles, regions } if regions.is_empty() => profiles
                .iter()
                .map(|p| SessionKey::new(Some(p.clone()), None))
                .collect(),
            CredentialSource::SharedProfiles { profiles, regions } => profiles
                .iter()
                .flat_map(|p| {
                    regions
                        .iter()
                        .map(move |r| SessionKey::new(Some(p.clone()), Some(r.clone())))
                })
                .collect(),
            CredentialSource::EnvironmentSts { regions } if regions.is_empty() => {
                std::iter::once(SessionKey::new(None, None)).collect()
            }
            CredentialSource::EnvironmentSts { regions } => regions
                .iter()
                .map(|r| SessionKey::new(None, Some(r.clone())))
                .collect(),
        };
        keys.into_iter().collect()
    }
}

/// Identifies one session: a profile (absent for environment credentials) and a region
/// (absent when the profile's configured region should be used).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    pub profile: Option<String>,
    pub region: Option<String>,
}

impl SessionKey {
    pub fn new(profile: Option<String>, region: Option<String>) -> Self {
        Self { profile, region }
    }

    pub fn name(&self) -> String {
        match (&self.profile, &self.region) {
            (Some(profile), Some(region)) => format!("{}-{}", profile, region),
            (Some(profile), None) => profile.clone(),
            (None, Some(region)) => format!("{}-{}", DEFAULT_PROFILE, region),
            (None, None) => DEFAULT_PROFILE.to_string(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Clients produced by a successful connection.
#[derive(Clone)]
pub struct AwsClients {
    pub ssm: Arc<dyn SsmApi>,
    pub ec2: Arc<dyn Ec2Api>,
    /// The region the clients were actually configured with.
    pub region: String,
}

/// An authenticated context for one profile/region pair.
pub struct Session {
    pub key: SessionKey,
    pub region: String,
    pub ssm: Arc<dyn SsmApi>,
    pub ec2: Arc<dyn Ec2Api>,
    pub logger: Logger,
}

impl Session {
    pub fn new(key: SessionKey, clients: AwsClients, logger: &Logger) -> Self {
        let logger = logger.with_context(key.name());
        Self {
            key,
            region: clients.region,
            ssm: clients.ssm,
            ec2: clients.ec2,
            logger,
        }
    }

    pub fn name(&self) -> String {
        self.key.name()
    }

    /// Profile name for display; environment credentials show as `default`.
    pub fn profile_name(&self) -> &str {
        self.key.profile.as_deref().unwrap_or(DEFAULT_PROFILE)
    }

    /// Profile to hand to the `aws` CLI, if any.
    pub fn cli_profile(&self) -> Option<&str> {
        self.key.profile.as_deref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Builds validated clients for a session key.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn connect(&self, key: &SessionKey) -> Result<AwsClients>;
}

/// [`Connect`] implementation using the shared AWS config chain and STS validation.
#[derive(Debug, Default, Clone)]
pub struct SdkConnector;

impl SdkConnector {
    async fn load_config(key: &SessionKey) -> SdkConfig {
        // Precedence: explicit key values, then AWS_PROFILE/AWS_REGION,
        // then the shared config/credentials files, then instance metadata.
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_API_ATTEMPTS));

        if let Some(region) = &key.region {
            config_loader = config_loader.region(Region::new(region.clone()));
        }

        if let Some(profile) = &key.profile {
            config_loader = config_loader.profile_name(profile);
        }

        config_loader.load().await
    }

    async fn validate(config: &SdkConfig) -> Result<()> {
        let sts_client = aws_sdk_sts::Client::new(config);

        match sts_client.get_caller_identity().send().await {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!(
                "Failed to authenticate with AWS: {}",
                aws_sdk_sts::error::DisplayErrorContext(&e)
            )),
        }
    }
}

#[async_trait]
impl Connect for SdkConnector {
    async fn connect(&self, key: &SessionKey) -> Result<AwsClients> {
        let config = Self::load_config(key).await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| anyhow!("No region configured for session {}", key))?;

        Self::validate(&config).await?;

        Ok(AwsClients {
            ssm: Arc::new(SdkSsm::new(aws_sdk_ssm::Client::new(&config))),
            ec2: Arc::new(SdkEc2::new(aws_sdk_ec2::Client::new(&config))),
            region,
        })
    }
}

/// All sessions for one run, keyed by session name.
#[derive(Debug)]
pub struct SessionPool {
    sessions: BTreeMap<String, Arc<Session>>,
}

impl SessionPool {
    /// Connect every permutation concurrently. Any failed connection fails the whole
    /// pool: a partial pool would silently skip an account.
    pub async fn build<C: Connect>(
        source: &CredentialSource,
        connector: Arc<C>,
        logger: &Logger,
    ) -> Result<Self> {
        let sessions = Arc::new(GuardedMap::new());
        let mut tasks = JoinSet::new();

        for key in source.session_keys() {
            let connector = Arc::clone(&connector);
            let sessions = Arc::clone(&sessions);
            let logger = logger.clone();
            tasks.spawn(async move {
                logger.debug(format!("Creating session {}", key));
                let clients = connector
                    .connect(&key)
                    .await
                    .with_context(|| format!("Error when trying to create session {}", key))?;
                let session = Session::new(key, clients, &logger);
                sessions.insert(session.name(), Arc::new(session));
                Ok::<_, anyhow::Error>(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.context("Session task panicked")??;
        }

        Ok(Self {
            sessions: sessions.snapshot(),
        })
    }

    #[cfg(test)]
    pub fn from_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|s| (s.name(), Arc::new(s)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.sessions.values()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::aws::api::{MockEc2Api, MockSsmApi};

    /// A session whose clients are the given mocks.
    pub fn session(profile: &str, region: &str, ssm: MockSsmApi, ec2: MockEc2Api) -> Session {
        Session::new(
            SessionKey::new(Some(profile.to_string()), Some(region.to_string())),
            AwsClients {
                ssm: Arc::new(ssm),
                ec2: Arc::new(ec2),
                region: region.to_string(),
            },
            &Logger::new(crate::logger::Verbosity::Quiet),
        )
    }
}
