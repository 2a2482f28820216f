use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::logger::Logger;
use crate::ssm::instance::InstanceInfo;

const TMUX_WINDOW: &str = "ssm";

/// Where an interactive `aws ssm start-session` should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub instance_id: String,
    /// `None` when credentials come from the environment.
    pub profile: Option<String>,
    pub region: String,
}

impl SessionTarget {
    pub fn from_instance(info: &InstanceInfo, pass_profile: bool) -> Self {
        Self {
            instance_id: info.instance_id.clone(),
            profile: pass_profile.then(|| info.profile.clone()),
            region: info.region.clone(),
        }
    }

    pub fn start_session_args(&self) -> Vec<String> {
        let mut args = vec!["ssm".to_string(), "start-session".to_string()];
        if let Some(profile) = &self.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }
        args.extend([
            "--region".to_string(),
            self.region.clone(),
            "--target".to_string(),
            self.instance_id.clone(),
        ]);
        args
    }

    /// The same invocation as a shell command line, for tmux panes.
    pub fn shell_command(&self) -> String {
        std::iter::once("aws".to_string())
            .chain(self.start_session_args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run `aws ssm start-session` in the current terminal until it exits.
///
/// Ctrl+C belongs to the remote shell: the child receives it from the terminal
/// and this process keeps waiting.
pub async fn start_ssm_session(target: &SessionTarget, logger: &Logger) -> Result<()> {
    let mut cmd = tokio::process::Command::new("aws");
    cmd.args(target.start_session_args())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    logger.info(format!("Starting SSM session to {}...", target.instance_id));
    let started = Instant::now();
    let mut child = cmd.spawn().context("Failed to launch the aws CLI")?;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status.context("Failed to wait for the aws CLI")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                logger.debug("Ctrl+C sent to remote session");
            }
        }
    };

    if !status.success() {
        return Err(anyhow!(
            "SSM session failed with exit code: {:?}",
            status.code()
        ));
    }

    logger.success(format!(
        "SSM session to {} completed after {}",
        target.instance_id,
        format_duration(started.elapsed())
    ));
    Ok(())
}

/// Build a detached tmux session with one tiled pane per target.
pub fn create_tmux_session(session_name: &str, targets: &[SessionTarget], logger: &Logger) -> Result<()> {
    let (first, rest) = targets
        .split_first()
        .ok_or_else(|| anyhow!("No instances to add to tmux session"))?;
    let window = format!("{}:{}", session_name, TMUX_WINDOW);

    let pane = tmux(&[
        "new-session", "-d", "-s", session_name, "-n", TMUX_WINDOW, "-P", "-F", "#{pane_id}",
        &first.shell_command(),
    ])
    .context("Failed to create tmux session")?;
    name_pane(&pane, first)?;

    for option in [["pane-border-status", "top"], ["mouse", "on"]] {
        tmux(&["set-option", "-t", session_name, option[0], option[1]])
            .context("Failed to set tmux configuration for window")?;
    }

    for target in rest {
        let pane = tmux(&[
            "split-window", "-t", &window, "-P", "-F", "#{pane_id}", &target.shell_command(),
        ])
        .with_context(|| format!("Failed to add instance {} to tmux session", target.instance_id))?;
        name_pane(&pane, target)?;

        // Re-tile after each split so panes never get too small to split again
        tmux(&["select-layout", "-t", &window, "tiled"]).context("Failed to re-tile panes")?;
    }

    logger.debug(format!(
        "Created tmux session {} with {} panes",
        session_name,
        targets.len()
    ));
    Ok(())
}

/// Attach the current terminal to `session_name`.
pub fn attach_tmux_session(session_name: &str) -> Result<()> {
    let status = Command::new("tmux")
        .args(["attach", "-t", session_name])
        .status()
        .context("Failed to run tmux")?;

    if !status.success() {
        return Err(anyhow!(
            "tmux attach exited with code: {:?}",
            status.code()
        ));
    }
    Ok(())
}

fn name_pane(pane: &str, target: &SessionTarget) -> Result<()> {
    tmux(&["select-pane", "-t", pane, "-T", &target.instance_id])
        .with_context(|| format!("Failed to name pane for {}", target.instance_id))?;
    Ok(())
}

fn tmux(args: &[&str]) -> Result<String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .context("Failed to run tmux")?;

    if !output.status.success() {
        return Err(anyhow!(
            "tmux {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info() -> InstanceInfo {
        InstanceInfo {
            instance_id: "i-123".into(),
            profile: "dev".into(),
            region: "us-east-1".into(),
            tags: Default::default(),
        }
    }

    #[test]
    fn test_shell_command_with_profile() {
        let target = SessionTarget::from_instance(&info(), true);
        assert_eq!(
            target.shell_command(),
            "aws ssm start-session --profile dev --region us-east-1 --target i-123"
        );
    }

    #[test]
    fn test_environment_credentials_omit_profile() {
        let target = SessionTarget::from_instance(&info(), false);
        assert_eq!(target.profile, None);
        assert_eq!(
            target.start_session_args(),
            vec!["ssm", "start-session", "--region", "us-east-1", "--target", "i-123"]
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_tmux_session_needs_targets() {
        let err = create_tmux_session("empty", &[], &Logger::default()).unwrap_err();
        assert!(err.to_string().contains("No instances"));
    }
}
