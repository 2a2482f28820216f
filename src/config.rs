use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_PROFILE: &str = "default";

static PROFILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[profile (.*)\]").expect("profile pattern is valid"));

/// The environment variables this tool cares about, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub session_token: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
    /// Deprecated fallback for `AWS_REGION`.
    pub default_region: Option<String>,
    pub config_file: Option<PathBuf>,
    pub tmux: Option<String>,
}

impl Environment {
    pub fn from_env() -> Self {
        Self {
            session_token: var("AWS_SESSION_TOKEN"),
            access_key_id: var("AWS_ACCESS_KEY_ID"),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            profile: var("AWS_PROFILE"),
            region: var("AWS_REGION"),
            default_region: var("AWS_DEFAULT_REGION"),
            config_file: var("AWS_CONFIG_FILE").map(PathBuf::from),
            tmux: var("TMUX"),
        }
    }

    /// All three STS variables present selects the environment-credential strategy.
    pub fn sts_credentials_set(&self) -> bool {
        self.session_token.is_some() && self.access_key_id.is_some() && self.secret_access_key.is_some()
    }

    pub fn resolved_region(&self) -> Option<&str> {
        self.region.as_deref().or(self.default_region.as_deref())
    }

    pub fn in_tmux(&self) -> bool {
        self.tmux.is_some()
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config_file {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(home.join(".aws").join("config"))
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Profile names declared as `[profile <name>]` in an AWS config file.
pub fn read_profiles(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Could not read AWS config file at {}", path.display()))?;
    Ok(parse_profiles(&contents))
}

fn parse_profiles(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| PROFILE_PATTERN.captures(line))
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

/// Profiles to target: `--profile`, else `--all-profiles`, else `AWS_PROFILE`, else `default`.
pub fn resolve_profiles(flag_profiles: &[String], all_profiles: bool, env: &Environment) -> Result<Vec<String>> {
    if !flag_profiles.is_empty() && all_profiles {
        return Err(anyhow!(
            "The --profile and --all-profiles flags cannot be used simultaneously."
        ));
    }

    if all_profiles {
        let path = env.config_path()?;
        let profiles = read_profiles(&path).context("Could not load profiles")?;
        if profiles.is_empty() {
            return Err(anyhow!("No profiles found in {}", path.display()));
        }
        return Ok(profiles);
    }

    if !flag_profiles.is_empty() {
        return Ok(flag_profiles.to_vec());
    }

    Ok(vec![env
        .profile
        .clone()
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string())])
}

/// Regions to target: `--region`, else `AWS_REGION`/`AWS_DEFAULT_REGION`, else none.
pub fn resolve_regions(flag_regions: &[String], env: &Environment) -> Vec<String> {
    if !flag_regions.is_empty() {
        return flag_regions.to_vec();
    }
    env.resolved_region()
        .map(|r| vec![r.to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = "\
[default]
region = us-east-1

[profile dev]
region = us-west-2

[profile prod-admin]
role_arn = arn:aws:iam::123456789012:role/admin
source_profile = dev
";

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_profiles() {
        assert_eq!(parse_profiles(SAMPLE_CONFIG), strings(&["dev", "prod-admin"]));
    }

    #[test]
    fn test_parse_profiles_repeatedly() {
        for _ in 0..3 {
            assert_eq!(parse_profiles(SAMPLE_CONFIG), strings(&["dev", "prod-admin"]));
        }
        assert!(parse_profiles("[default]\nregion = eu-west-1\n").is_empty());
        assert_eq!(parse_profiles("[profile  spaced ]"), strings(&["spaced"]));
    }

    #[test]
    fn test_read_profiles_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let profiles = read_profiles(file.path()).unwrap();
        assert_eq!(profiles, strings(&["dev", "prod-admin"]));
    }

    #[test]
    fn test_read_profiles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_profiles(&dir.path().join("does-not-exist"));
        assert!(result.is_err());
    }

    #[test]
    fn test_profiles_conflicting_flags() {
        let env = Environment::default();
        let result = resolve_profiles(&strings(&["profile1"]), true, &env);
        assert!(result.is_err());
    }

    #[test]
    fn test_profiles_from_all_profiles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();
        let env = Environment {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let profiles = resolve_profiles(&[], true, &env).unwrap();
        assert_eq!(profiles, strings(&["dev", "prod-admin"]));
    }

    #[test]
    fn test_profiles_fallbacks() {
        let env = Environment {
            profile: Some("testProfile".into()),
            ..Default::default()
        };
        assert_eq!(resolve_profiles(&[], false, &env).unwrap(), strings(&["testProfile"]));

        let env = Environment::default();
        assert_eq!(resolve_profiles(&[], false, &env).unwrap(), strings(&["default"]));

        let flags = strings(&["account1", "account2", "account3"]);
        assert_eq!(resolve_profiles(&flags, false, &env).unwrap(), flags);
    }

    #[test]
    fn test_regions_fallbacks() {
        let env = Environment {
            default_region: Some("eu-west-1".into()),
            ..Default::default()
        };
        assert_eq!(resolve_regions(&[], &env), strings(&["eu-west-1"]));

        let env = Environment {
            region: Some("us-east-1".into()),
            default_region: Some("eu-west-1".into()),
            ..Default::default()
        };
        assert_eq!(resolve_regions(&[], &env), strings(&["us-east-1"]));

        let flags = strings(&["us-east-1", "us-west-2", "eu-central-1"]);
        assert_eq!(resolve_regions(&flags, &env), flags);

        assert!(resolve_regions(&[], &Environment::default()).is_empty());
    }

    #[test]
    fn test_sts_credentials_require_all_three() {
        let mut env = Environment {
            session_token: Some("token".into()),
            access_key_id: Some("AKIA".into()),
            ..Default::default()
        };
        assert!(!env.sts_credentials_set());

        env.secret_access_key = Some("secret".into());
        assert!(env.sts_credentials_set());
    }
}
