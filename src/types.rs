use std::fmt;

use serde::Deserialize;

/// Remote run lifecycle state as reported by the pipeline status endpoint.
///
/// The server reports free-form strings; anything unrecognized is kept
/// verbatim and treated as still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl RunState {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "pending" | "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Terminal states stop polling; the run emits no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress tallies the pipeline reports alongside a run's status.
/// Either counter may be absent early in a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunResults {
    pub generated: Option<i64>,
    pub written: Option<i64>,
}

/// One observation of a remote run: its state plus progress counters.
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub state: RunState,
    pub results: RunResults,
}

/// Local registry record lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Completed,
    Failed,
}

impl ItemStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
