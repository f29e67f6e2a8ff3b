//! Fixed-delay retry policy.

use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::engine::EngineError;
use crate::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry budget stamped on newly submitted jobs.
    pub max_retries: u32,
    /// Delay between a failed attempt and the next dispatch.
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the job; `attempt` is the retry_count it will have.
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Decides what happens to `job` after `error`. The budget used is the
    /// one stored on the job, so changing the policy never strands old jobs.
    pub fn decide(&self, job: &Job, error: &EngineError) -> RetryDecision {
        if error.is_retryable() && job.can_retry() {
            RetryDecision::Retry {
                attempt: job.retry_count + 1,
                delay: self.delay,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SubmitRequest;
    use uuid::Uuid;

    fn job_with(retry_count: u32, max_retries: u32) -> Job {
        let mut job = Job::new(SubmitRequest::new(Uuid::new_v4()), Uuid::new_v4(), max_retries);
        job.retry_count = retry_count;
        job
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(10));
    }

    #[test]
    fn test_retries_until_budget_spent() {
        let policy = RetryPolicy::default();
        let err = EngineError::Transport("connection refused".to_string());

        assert_eq!(
            policy.decide(&job_with(0, 3), &err),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(10)
            }
        );
        assert!(matches!(
            policy.decide(&job_with(2, 3), &err),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert_eq!(policy.decide(&job_with(3, 3), &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_job_budget_wins_over_policy() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let err = EngineError::Engine("bad page".to_string());
        assert_eq!(policy.decide(&job_with(1, 1), &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        let err = EngineError::Protocol("truncated body".to_string());
        assert_eq!(policy.decide(&job_with(0, 0), &err), RetryDecision::GiveUp);
    }
}
