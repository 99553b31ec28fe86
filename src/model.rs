use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Loosely-typed fields pulled off a page by one strategy. Not yet trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateRecord {
    pub title: Option<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub posted: Option<String>,
    pub department: Option<String>,
}

impl CandidateRecord {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[cfg(test)]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    #[cfg(test)]
    pub fn with_posted(mut self, posted: impl Into<String>) -> Self {
        self.posted = Some(posted.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Inactive,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => JobStatus::Inactive,
            _ => JobStatus::Active,
        }
    }
}

/// The canonical job record. `external_id` is a pure function of
/// `(source_name, natural_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub external_id: String,
    pub source_name: String,
    pub title: String,
    pub apply_url: String,
    pub location: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub department: String,
    pub posted_at: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Empty,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Empty => "empty",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "empty" => Some(RunStatus::Empty),
            "failed" => Some(RunStatus::Failed),
            "timed_out" => Some(RunStatus::TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one source's scrape attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub source_name: String,
    pub status: RunStatus,
    pub record_count: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn new(source_name: &str, status: RunStatus, record_count: usize, duration: Duration) -> Self {
        Self {
            source_name: source_name.to_string(),
            status,
            record_count,
            error: None,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub records: Vec<NormalizedRecord>,
    pub outcome: RunOutcome,
}

/// Aggregate of one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub empty: usize,
    pub timed_out: usize,
    pub total_records: usize,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn record(&mut self, outcome: &RunOutcome) {
        self.total += 1;
        self.total_records += outcome.record_count;
        match outcome.status {
            RunStatus::Success => self.succeeded += 1,
            RunStatus::Empty => self.empty += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::TimedOut => self.timed_out += 1,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}
