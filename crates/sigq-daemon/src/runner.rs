//! Execution of one signing job.
//!
//! [`start`] wires up a private socketpair for the child's merged
//! stdout/stderr, fetches and decrypts the PIN, expands the command
//! template and spawns the command through `sh -c`. If the template never
//! references `%2`, the PIN is delivered on the child's standard input
//! right after spawn instead. Every buffer that held decrypted PIN
//! material is a [`Zeroizing`] guard and is wiped on all exit paths.
//!
//! Failure before the child runs assigns the job's terminal state directly
//! (pipe failure, PIN failure, spawn failure), in the same order the
//! states are ruled out.

use std::process::Stdio;

use sigq_core::credentials::{PinCache, PinPrompt, PinProtector, TokenValidator};
use sigq_core::output::OutputBuffer;
use sigq_core::template;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::dispatch::{JobState, SigningJob};

/// `sh` reports an unknown command with this exit code.
const SH_COMMAND_NOT_FOUND: i32 = 127;

/// A started signing command: the child process plus the read end of its
/// merged output pipe.
pub struct RunningJob {
    child: Child,
    output: UnixStream,
}

impl RunningJob {
    /// Reads the next chunk of merged stdout/stderr. `Ok(0)` means the
    /// child closed its end.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.output.read(buf).await
    }

    /// Waits for the child to exit and maps its status onto a job state,
    /// appending the failure banner to `output` where due.
    pub async fn finish(mut self, output: &mut OutputBuffer) -> JobState {
        drop(self.output);
        match self.child.wait().await {
            Ok(status) => match status.code() {
                Some(0) => JobState::Succeeded,
                // `sh` could not find the signing application.
                Some(SH_COMMAND_NOT_FOUND) => JobState::AppNotFound,
                Some(code) => {
                    output.append_exit_failure(code);
                    JobState::Failed
                }
                None => {
                    #[cfg(unix)]
                    let signal = std::os::unix::process::ExitStatusExt::signal(&status);
                    #[cfg(not(unix))]
                    let signal = None;
                    output.append_signal_failure(signal);
                    JobState::Failed
                }
            },
            Err(e) => {
                warn!("waiting for the signing command failed: {e}");
                JobState::Failed
            }
        }
    }
}

/// Starts `job`'s signing command.
///
/// On success the job is `Running` and the returned [`RunningJob`] feeds
/// the output pump. On failure the job's terminal state is already
/// assigned and `None` is returned; the caller moves on to the next job.
pub async fn start<P: PinProtector>(
    job: &mut SigningJob,
    pins: &mut PinCache<P>,
    prompt: &mut dyn PinPrompt,
    validator: &mut dyn TokenValidator,
) -> Option<RunningJob> {
    // Merged-output pipe first: its failure modes rule out everything else.
    let Ok((read_end, write_end)) = UnixStream::pair() else {
        job.state = JobState::BrokenPipe;
        return None;
    };
    if !pair_is_private(&read_end, &write_end) {
        job.state = JobState::BrokenPipe;
        return None;
    }

    let pin = match pins.fetch(&job.identity, prompt, validator) {
        Ok(pin) => pin,
        Err(e) => {
            warn!(identity = %job.identity, "PIN fetch failed: {e}");
            job.state = if e.is_missing() {
                JobState::PinMissing
            } else {
                JobState::PinWrong
            };
            return None;
        }
    };

    let expanded = template::expand(
        job.template.as_str(),
        &job.path.to_string_lossy(),
        &pin,
    );

    let mut command = Command::new("sh");
    command.arg("-c").arg(&*expanded.command_line);
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            command.current_dir(dir);
        }
    }
    command.stdin(if expanded.pin_on_stdin {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    match child_output(write_end) {
        Ok((stdout, stderr)) => {
            command.stdout(stdout).stderr(stderr);
        }
        Err(_) => {
            job.state = JobState::BrokenPipe;
            return None;
        }
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(path = %job.path.display(), "failed to spawn the signing command: {e}");
            job.state = JobState::AppNotFound;
            return None;
        }
    };
    // The parent's copies of the write end die with `command` at the end
    // of this function; the child holds the only remaining ones.

    if expanded.pin_on_stdin {
        let Some(mut stdin) = child.stdin.take() else {
            job.state = JobState::PinMissing;
            return None;
        };
        if stdin.write_all(pin.as_bytes()).await.is_err()
            || stdin.flush().await.is_err()
        {
            job.state = JobState::PinMissing;
            return None;
        }
        // Dropping stdin closes it; the PIN guard is wiped on return.
    }

    debug!(path = %job.path.display(), "signing command started");
    job.state = JobState::Running;
    Some(RunningJob {
        child,
        output: read_end,
    })
}

/// Converts the pipe's write end into the child's stdout and stderr.
fn child_output(write_end: UnixStream) -> std::io::Result<(Stdio, Stdio)> {
    use std::os::fd::OwnedFd;

    let stream = write_end.into_std()?;
    stream.set_nonblocking(false)?;
    let clone = stream.try_clone()?;
    let stdout: OwnedFd = stream.into();
    let stderr: OwnedFd = clone.into();
    Ok((Stdio::from(stdout), Stdio::from(stderr)))
}

/// Verifies that both ends of the output pipe are connected to this
/// process and nothing else.
fn pair_is_private(a: &UnixStream, b: &UnixStream) -> bool {
    let own = std::process::id();
    peer_pid(a) == Some(own) && peer_pid(b) == Some(own)
}

#[allow(clippy::cast_sign_loss)]
fn peer_pid(stream: &UnixStream) -> Option<u32> {
    let pid = stream.peer_cred().ok()?.pid()?;
    (pid > 0).then_some(pid as u32)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use sigq_core::credentials::doubles::{ScriptedPrompt, ScriptedValidator};
    use sigq_core::credentials::ProcessKeyProtector;
    use sigq_core::output::DEFAULT_OUTPUT_LIMIT;
    use sigq_core::{CertIdentity, SignTemplate};

    use super::*;

    fn identity() -> CertIdentity {
        CertIdentity::new(Some("CID".into()), Some("CARD".into()), Some("R".into()))
    }

    fn job_with_template(template: &str, path: &Path) -> SigningJob {
        SigningJob::new(
            identity(),
            SignTemplate::new(template),
            path,
            DEFAULT_OUTPUT_LIMIT,
        )
    }

    async fn run_to_completion(job: &mut SigningJob, pin: &str) {
        let mut pins = PinCache::new(ProcessKeyProtector::new());
        let mut prompt = ScriptedPrompt::new([Some(pin)]);
        let mut validator = ScriptedValidator::accepting();
        let Some(mut running) = start(job, &mut pins, &mut prompt, &mut validator).await else {
            return;
        };
        assert_eq!(job.state, JobState::Running);
        let mut chunk = [0u8; 4096];
        loop {
            match running.read_chunk(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => job.output.feed(&chunk[..n]),
            }
        }
        job.state = running.finish(&mut job.output).await;
    }

    #[tokio::test]
    async fn test_successful_command_captures_output() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job = job_with_template("printf 'signing %1 with %2'", file.path());
        run_to_completion(&mut job, "1234").await;

        assert_eq!(job.state, JobState::Succeeded);
        let expected = format!("signing {} with 1234", file.path().display());
        assert_eq!(job.output.as_str(), expected);
    }

    #[tokio::test]
    async fn test_output_line_endings_are_normalized() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job = job_with_template("printf 'a\\nb' # %2", file.path());
        run_to_completion(&mut job, "1234").await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.output.as_str(), "a\r\nb");
    }

    #[tokio::test]
    async fn test_stderr_is_merged_into_the_output() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job = job_with_template("echo out; echo err >&2 # %2", file.path());
        run_to_completion(&mut job, "1234").await;

        assert_eq!(job.state, JobState::Succeeded);
        assert!(job.output.as_str().contains("out"));
        assert!(job.output.as_str().contains("err"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_appends_failure_banner() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job = job_with_template("exit 3 # %2", file.path());
        run_to_completion(&mut job, "1234").await;

        assert_eq!(job.state, JobState::Failed);
        assert!(
            job.output
                .as_str()
                .contains("Command failed with exit code 3.")
        );
    }

    #[tokio::test]
    async fn test_unknown_command_maps_to_app_not_found() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job =
            job_with_template("definitely-not-a-signing-tool %1 %2", file.path());
        run_to_completion(&mut job, "1234").await;

        assert_eq!(job.state, JobState::AppNotFound);
    }

    #[tokio::test]
    async fn test_pin_is_delivered_on_stdin_without_placeholder() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // No %2 in the template: the PIN arrives on standard input.
        let mut job = job_with_template("head -c 6", file.path());
        run_to_completion(&mut job, "867530").await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.output.as_str(), "867530");
    }

    #[tokio::test]
    async fn test_cancelled_prompt_fails_without_spawning() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job = job_with_template("echo %2", file.path());
        let mut pins = PinCache::new(ProcessKeyProtector::new());
        let mut prompt = ScriptedPrompt::new([None]);
        let mut validator = ScriptedValidator::accepting();

        let running = start(&mut job, &mut pins, &mut prompt, &mut validator).await;
        assert!(running.is_none());
        assert_eq!(job.state, JobState::PinMissing);
        assert!(job.output.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_pin_maps_to_pin_wrong() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut job = job_with_template("echo %2", file.path());
        let mut pins = PinCache::new(ProcessKeyProtector::new());
        let mut prompt = ScriptedPrompt::new([Some("0000")]);
        let mut validator = ScriptedValidator::rejecting();

        let running = start(&mut job, &mut pins, &mut prompt, &mut validator).await;
        assert!(running.is_none());
        assert_eq!(job.state, JobState::PinWrong);
    }
}
