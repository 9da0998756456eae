//! Signing jobs and the FIFO queue they wait in.
//!
//! Jobs are appended in arrival order and dispatched in exactly that
//! order: the queue's cursor only ever moves forward, and the daemon keeps
//! at most one job in [`JobState::Running`] at any time. A job whose file
//! is already missing at enqueue time starts out terminal and is never
//! dispatched.

use std::fmt;
use std::path::{Path, PathBuf};

use sigq_core::containers::Array;
use sigq_core::output::OutputBuffer;
use sigq_core::{CertIdentity, SignTemplate};
use tracing::debug;

/// Lifecycle state of one signing job.
///
/// `Idle` and `Running` are the only non-terminal states; everything else
/// is final once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued, not yet dispatched.
    Idle,
    /// The signing command is executing.
    Running,
    /// The signing command exited with code zero.
    Succeeded,
    /// The signing command exited nonzero or could not be completed.
    Failed,
    /// The file was absent when the job was created.
    FileNotFound,
    /// The output pipe could not be established or was hijacked.
    BrokenPipe,
    /// The signing application could not be started.
    AppNotFound,
    /// No PIN was obtained for the job's identity.
    PinMissing,
    /// A PIN was obtained but not accepted.
    PinWrong,
}

impl JobState {
    /// Returns `true` once the state can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }

    /// Display string, as shown to the user.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "pending",
            Self::Running => "running",
            Self::Succeeded => "success",
            Self::Failed => "failed",
            Self::FileNotFound => "file not found",
            Self::BrokenPipe => "broken pipe",
            Self::AppNotFound => "app not found",
            Self::PinMissing => "pin missing",
            Self::PinWrong => "pin wrong",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued request to sign one file.
#[derive(Debug)]
pub struct SigningJob {
    /// Current lifecycle state.
    pub state: JobState,
    /// Shared signing credential identity.
    pub identity: CertIdentity,
    /// Shared command template.
    pub template: SignTemplate,
    /// Absolute path of the file to sign.
    pub path: PathBuf,
    /// Captured output of the signing command.
    pub output: OutputBuffer,
}

impl SigningJob {
    /// Creates a job for `path`, absolutized against the current working
    /// directory. A missing file puts the job straight into
    /// [`JobState::FileNotFound`].
    #[must_use]
    pub fn new(
        identity: CertIdentity,
        template: SignTemplate,
        path: &Path,
        output_limit: usize,
    ) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let state = if path.is_file() {
            JobState::Idle
        } else {
            JobState::FileNotFound
        };
        Self {
            state,
            identity,
            template,
            path,
            output: OutputBuffer::new(output_limit),
        }
    }
}

/// Append-only FIFO queue of signing jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Array<SigningJob>,
    /// Lowest index not yet confirmed non-idle. Only ever moves forward;
    /// a job reset to `Idle` behind it would never be picked up again, but
    /// no code path performs such a reset.
    cursor: usize,
}

impl JobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job and returns its index.
    pub fn push(&mut self, job: SigningJob) -> usize {
        debug!(path = %job.path.display(), state = %job.state, "job queued");
        self.jobs.push(job);
        self.jobs.len() - 1
    }

    /// Finds the next `Idle` job at or after the cursor and parks the
    /// cursor on it.
    pub fn next_idle(&mut self) -> Option<usize> {
        for index in self.cursor..self.jobs.len() {
            if self.jobs[index].state == JobState::Idle {
                self.cursor = index;
                return Some(index);
            }
        }
        None
    }

    /// The job at `index`, if any.
    #[must_use]
    pub fn job(&self, index: usize) -> Option<&SigningJob> {
        self.jobs.get(index)
    }

    /// The job at `index` mutably, if any.
    pub fn job_mut(&mut self, index: usize) -> Option<&mut SigningJob> {
        self.jobs.get_mut(index)
    }

    /// Number of queued jobs, in any state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if no job was ever queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Returns `true` if every queued job reached a terminal state.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.jobs.iter().all(|job| job.state.is_terminal())
    }

    /// Iterates over the jobs in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &SigningJob> {
        self.jobs.iter()
    }
}
