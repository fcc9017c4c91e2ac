use std::fmt;

/// Job state as printed by `squeue -O State`
///
/// Matching is exact and case-sensitive; anything else ends up in `Unknown` and is not
/// counted by the queue aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    Running,
    Pending,
    Suspended,
    Cancelled,
    Completing,
    Completed,
    Configuring,
    Failed,
    Timeout,
    Preempted,
    NodeFail,
    /// A catch-all for any state we don't explicitly handle.
    Unknown(String),
}

impl From<&str> for JobState {
    fn from(state: &str) -> Self {
        match state {
            "RUNNING" => JobState::Running,
            "PENDING" => JobState::Pending,
            "SUSPENDED" => JobState::Suspended,
            "CANCELLED" => JobState::Cancelled,
            "COMPLETING" => JobState::Completing,
            "COMPLETED" => JobState::Completed,
            "CONFIGURING" => JobState::Configuring,
            "FAILED" => JobState::Failed,
            "TIMEOUT" => JobState::Timeout,
            "PREEMPTED" => JobState::Preempted,
            "NODE_FAIL" => JobState::NodeFail,
            other => JobState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "RUNNING"),
            JobState::Pending => write!(f, "PENDING"),
            JobState::Suspended => write!(f, "SUSPENDED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
            JobState::Completing => write!(f, "COMPLETING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Configuring => write!(f, "CONFIGURING"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Timeout => write!(f, "TIMEOUT"),
            JobState::Preempted => write!(f, "PREEMPTED"),
            JobState::NodeFail => write!(f, "NODE_FAIL"),
            JobState::Unknown(s) => write!(f, "UNKNOWN({})", s),
        }
    }
}
