//! Process exit statuses and their severity ordering
//!
//! Children report their outcome through `_exit()` codes; the parent folds
//! every observed outcome into a single final exit code, keeping the most
//! severe one.

use serde::{Deserialize, Serialize};

/// Exit status codes shared between the harness and its workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ExitStatus {
    /// Normal completion
    Success = 0,
    /// A bug in the harness itself, not in a workload
    Failure = 1,
    /// A workload ran but failed
    NotSuccess = 2,
    /// A workload ran out of system resources
    NoResource = 3,
    /// A workload discovered at runtime that it cannot run here
    NotImplemented = 4,
    /// Terminated by a signal
    Signaled = 5,
    /// A child called `exit()` instead of returning from its workload
    BySysExit = 6,
    /// Counter state was suspect when the workload returned
    MetricsUntrustworthy = 7,
}

impl ExitStatus {
    /// Decode a raw wait status exit code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitStatus::Success,
            1 => ExitStatus::Failure,
            2 => ExitStatus::NotSuccess,
            3 => ExitStatus::NoResource,
            4 => ExitStatus::NotImplemented,
            5 => ExitStatus::Signaled,
            6 => ExitStatus::BySysExit,
            7 => ExitStatus::MetricsUntrustworthy,
            // Unknown codes are treated as workload failures
            _ => ExitStatus::NotSuccess,
        }
    }

    /// The raw process exit code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human readable description, used in reap logging and summaries
    pub fn describe(self) -> &'static str {
        match self {
            ExitStatus::Success => "success",
            ExitStatus::Failure => "harness core failure",
            ExitStatus::NotSuccess => "stressor failed",
            ExitStatus::NoResource => "no resources",
            ExitStatus::NotImplemented => "not implemented",
            ExitStatus::Signaled => "killed by signal",
            ExitStatus::BySysExit => "stressor terminated using _exit()",
            ExitStatus::MetricsUntrustworthy => "metrics may be untrustworthy",
        }
    }

    /// Severity rank for folding outcomes into a final exit code.
    ///
    /// Ordering: metrics < no-resource < not-success < everything else.
    fn severity(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::MetricsUntrustworthy => 1,
            ExitStatus::NoResource => 2,
            ExitStatus::NotSuccess => 3,
            ExitStatus::NotImplemented => 4,
            ExitStatus::BySysExit => 5,
            ExitStatus::Signaled => 6,
            ExitStatus::Failure => 7,
        }
    }

    /// Return the more severe of two statuses
    pub fn most_severe(self, other: ExitStatus) -> ExitStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 0..=7 {
            assert_eq!(ExitStatus::from_code(code).code(), code);
        }
        assert_eq!(ExitStatus::from_code(42), ExitStatus::NotSuccess);
    }

    #[test]
    fn test_severity_ordering() {
        let s = ExitStatus::Success;
        assert_eq!(
            s.most_severe(ExitStatus::MetricsUntrustworthy),
            ExitStatus::MetricsUntrustworthy
        );
        assert_eq!(
            ExitStatus::MetricsUntrustworthy.most_severe(ExitStatus::NoResource),
            ExitStatus::NoResource
        );
        assert_eq!(
            ExitStatus::NoResource.most_severe(ExitStatus::NotSuccess),
            ExitStatus::NotSuccess
        );
        assert_eq!(
            ExitStatus::NotSuccess.most_severe(ExitStatus::Failure),
            ExitStatus::Failure
        );
        // Folding is commutative on the winner
        assert_eq!(
            ExitStatus::Failure.most_severe(ExitStatus::NotSuccess),
            ExitStatus::Failure
        );
    }

    #[test]
    fn test_describe_all_distinct() {
        let all = [
            ExitStatus::Success,
            ExitStatus::Failure,
            ExitStatus::NotSuccess,
            ExitStatus::NoResource,
            ExitStatus::NotImplemented,
            ExitStatus::Signaled,
            ExitStatus::BySysExit,
            ExitStatus::MetricsUntrustworthy,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.describe(), b.describe());
            }
        }
    }
}
