use crate::models::title_info::{TitleKey, TrimRange};
use crate::progress_tracker::ProgressTracker;
use crate::services::ffmpeg_command::DumpCommand;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// One dump attempt. Lives for a single runner invocation.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub key: TitleKey,
    pub trim: TrimRange,
    pub output_path: PathBuf,
    pub label: String,
    pub status: JobStatus,
    duration_secs: Option<f64>,
    tracker: ProgressTracker,
}

impl Job {
    pub fn new(key: TitleKey, trim: TrimRange, output_path: PathBuf, label: String) -> Self {
        Job {
            id: JobId::new(),
            key,
            trim,
            output_path,
            label,
            status: JobStatus::Starting,
            duration_secs: None,
            tracker: ProgressTracker::new(),
        }
    }

    pub fn for_command(command: &DumpCommand) -> Self {
        Self::new(
            command.key,
            command.trim,
            command.output_path.clone(),
            command.label.clone(),
        )
    }

    /// Starting -> Running, on the first diagnostic line.
    pub fn mark_running(&mut self) {
        if self.status == JobStatus::Starting {
            debug!("Job {} ({}) is running", self.id, self.label);
            self.status = JobStatus::Running;
        }
    }

    /// Moves to a terminal state. Terminal states are final.
    pub fn update_status(&mut self, status: JobStatus) {
        if self.is_finished() {
            warn!(
                "Job {} already {}, ignoring transition to {}",
                self.id, self.status, status
            );
            return;
        }
        self.status = status;
        if self.status == JobStatus::Completed {
            self.tracker.finish();
        }
    }

    /// Records the total duration. Only the first marker counts.
    pub fn set_duration(&mut self, seconds: f64) -> bool {
        if self.duration_secs.is_some() || !(seconds > 0.0) {
            return false;
        }
        debug!("Job {} duration is {seconds}s", self.id);
        self.duration_secs = Some(seconds);
        true
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Feeds a `time=` marker; returns the fraction when the duration is known.
    pub fn update_time(&mut self, seconds: f64) -> Option<f64> {
        let duration = self.duration_secs?;
        let fraction = (seconds / duration).clamp(0.0, 1.0);
        self.tracker.set_fraction(fraction);
        Some(fraction)
    }

    pub fn progress_label(&self) -> String {
        self.tracker.label(&self.label)
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

// Starting -> Running -> Completed | Cancelled | Failed
// A job can also fail or be cancelled before it ever produced output.
#[derive(Default, Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum JobStatus {
    #[default]
    Starting,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "Starting"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn new() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
