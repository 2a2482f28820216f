use std::fmt;

use crate::guarded::GuardedList;
use crate::logger::Logger;
use crate::ssm::invocation::InvocationResult;

/// Success/failure counts over every collected result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

impl Tally {
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SUCCESS, {} FAILED", self.succeeded, self.failed)
    }
}

/// Results from every session worker. Read only after all workers have joined.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: GuardedList<InvocationResult>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, result: InvocationResult) {
        self.results.push(result);
    }

    pub fn extend(&self, results: impl IntoIterator<Item = InvocationResult>) {
        self.results.extend(results);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results ordered by profile, region and instance for display.
    pub fn snapshot(&self) -> Vec<InvocationResult> {
        let mut results = self.results.snapshot();
        results.sort_by(|a, b| {
            (&a.profile, &a.region, a.target()).cmp(&(&b.profile, &b.region, b.target()))
        });
        results
    }

    /// Only `Success` counts as a success.
    pub fn tally(&self) -> Tally {
        self.results
            .snapshot()
            .iter()
            .fold(Tally::default(), |mut tally, result| {
                if result.is_success() {
                    tally.succeeded += 1;
                } else {
                    tally.failed += 1;
                }
                tally
            })
    }

    /// Log one line per target, its output, then the tally.
    pub fn report(&self, logger: &Logger) -> Tally {
        let results = self.snapshot();

        if !results.is_empty() {
            logger.info(format!(
                "{:<24} {:<15} {:<15} {}",
                "Instance ID", "Region", "Profile", "Status"
            ));
        }

        for result in &results {
            let line = format!(
                "{:<24} {:<15} {:<15} {}",
                result.target(),
                result.region,
                result.profile,
                result.status
            );

            if result.is_success() {
                logger.success(line);
                if !result.stdout.trim().is_empty() {
                    logger.info(result.stdout.trim_end());
                }
                if !result.stderr.trim().is_empty() {
                    logger.warning(result.stderr.trim_end());
                }
            } else {
                match &result.error {
                    Some(error) => logger.error(format!("{} ({})", line, error)),
                    None => logger.error(line),
                }
                if !result.stderr.trim().is_empty() {
                    logger.error(result.stderr.trim_end());
                }
            }
        }

        let tally = self.tally();
        logger.info(format!("Execution results: {}", tally));
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssm::invocation::InvocationStatus;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    fn result(id: &str, region: &str, status: InvocationStatus) -> InvocationResult {
        InvocationResult {
            instance_id: Some(id.to_string()),
            profile: "test".to_string(),
            region: region.to_string(),
            command_id: Some("cmd-1".to_string()),
            status,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    #[test]
    fn test_tally_counts_everything_but_success_as_failure() {
        let collector = ResultCollector::new();
        collector.add(result("i-1", "us-east-1", InvocationStatus::Success));
        collector.extend([
            result("i-2", "us-east-1", InvocationStatus::Failed),
            result("i-3", "us-east-1", InvocationStatus::Pending),
            result("i-4", "us-east-1", InvocationStatus::ClientError),
        ]);

        let tally = collector.tally();
        assert_eq!(tally, Tally { succeeded: 1, failed: 3 });
        assert_eq!(tally.to_string(), "1 SUCCESS, 3 FAILED");
        assert_eq!(tally.exit_code(), 1);
        assert_eq!(Tally { succeeded: 2, failed: 0 }.exit_code(), 0);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let collector = ResultCollector::new();
        collector.add(result("i-2", "us-west-2", InvocationStatus::Success));
        collector.add(result("i-9", "us-east-1", InvocationStatus::Success));
        collector.add(result("i-1", "us-west-2", InvocationStatus::Success));

        let order: Vec<_> = collector.snapshot().iter().map(|r| r.target().to_string()).collect();
        assert_eq!(order, vec!["i-9", "i-1", "i-2"]);
    }

    #[tokio::test]
    async fn test_concurrent_adds() {
        let collector = Arc::new(ResultCollector::new());
        let mut tasks = JoinSet::new();
        for n in 0..16 {
            let collector = Arc::clone(&collector);
            tasks.spawn(async move {
                collector.add(result(&format!("i-{n}"), "us-east-1", InvocationStatus::Success));
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(collector.len(), 16);
        assert_eq!(collector.tally().succeeded, 16);
    }

    #[test]
    fn test_report_returns_tally() {
        let collector = ResultCollector::new();
        assert!(collector.is_empty());
        collector.add(result("i-1", "us-east-1", InvocationStatus::ExecutionTimedOut));

        let tally = collector.report(&Logger::new(crate::logger::Verbosity::Quiet));
        assert_eq!(tally, Tally { succeeded: 0, failed: 1 });
    }
}
