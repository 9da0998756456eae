//! Primary-instance context and event loop.
//!
//! One [`Daemon`] value bundles everything the primary owns: the
//! listening socket, at most one live request session, the job queue and
//! its cursor, the PIN cache and the collaborators, and the output pipe of
//! the active child. The driving loop waits on the union of those sources
//! with `select!` and runs each completion handler to exhaustion before
//! waiting again, so job-visible effects are serialized no matter in which
//! order I/O completes.
//!
//! [`advance`](Daemon::advance) enforces the dispatch invariant: at most
//! one job `Running` system-wide, dispatched strictly in enqueue order. A
//! job whose startup fails gets its terminal state and the scan continues,
//! so a mid-queue failure cannot stall the jobs behind it.

use anyhow::{Context, Result};
use sigq_core::credentials::{PinCache, PinPrompt, PinProtector, TokenValidator};
use sigq_core::{CertIdentity, SignTemplate};
use tokio::net::UnixStream;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::dispatch::{JobQueue, SigningJob};
use crate::protocol::{IpcSession, JobRequest, PrimaryListener, SessionRead, TransportError};
use crate::runner::{self, RunningJob};

/// Read chunk size for child output.
const OUTPUT_CHUNK: usize = 4096;

/// One completion from the wait set.
enum Event {
    Accepted(Result<UnixStream, TransportError>),
    Session(Result<SessionRead, TransportError>),
    /// A chunk of child output; empty means the child closed its end.
    Output(std::io::Result<Vec<u8>>),
}

/// The primary instance's state and collaborators.
pub struct Daemon<P: PinProtector> {
    listener: PrimaryListener,
    /// At most one request connection is served at a time.
    session: Option<IpcSession>,
    queue: JobQueue,
    /// Queue index of the running job plus its process handles.
    active: Option<(usize, RunningJob)>,
    pins: PinCache<P>,
    prompt: Box<dyn PinPrompt>,
    validator: Box<dyn TokenValidator>,
    output_limit: usize,
}

impl<P: PinProtector> Daemon<P> {
    /// Creates a primary context around a bound listener.
    #[must_use]
    pub fn new(
        listener: PrimaryListener,
        output_limit: usize,
        prompt: Box<dyn PinPrompt>,
        validator: Box<dyn TokenValidator>,
        protector: P,
    ) -> Self {
        Self {
            listener,
            session: None,
            queue: JobQueue::new(),
            active: None,
            pins: PinCache::new(protector),
            prompt,
            validator,
            output_limit,
        }
    }

    /// Queues the initial batch passed on the primary's own command line.
    pub async fn seed(
        &mut self,
        identity: CertIdentity,
        template: SignTemplate,
        files: impl IntoIterator<Item = std::path::PathBuf>,
    ) {
        for path in files {
            self.enqueue(JobRequest {
                identity: identity.clone(),
                template: template.clone(),
                path,
            })
            .await;
        }
    }

    /// Appends a job for `request` and nudges the dispatcher.
    pub async fn enqueue(&mut self, request: JobRequest) {
        let job = SigningJob::new(
            request.identity,
            request.template,
            &request.path,
            self.output_limit,
        );
        info!(path = %job.path.display(), state = %job.state, "signing job queued");
        self.queue.push(job);
        self.advance().await;
    }

    /// Serves the channel until interrupted or terminated.
    ///
    /// # Errors
    ///
    /// Returns an error only if the signal handlers cannot be installed.
    pub async fn run(&mut self) -> Result<()> {
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("interrupt received, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("termination requested, shutting down");
                    return Ok(());
                }
                event = Self::next_event(
                    &self.listener,
                    self.session.as_mut(),
                    self.active.as_mut(),
                ) => {
                    self.handle_event(event).await;
                }
            }
        }
    }

    /// Serves the channel until at least `jobs` jobs were queued and every
    /// queued job is terminal, with no session left open.
    ///
    /// This is the batch mode used by the test harness: a primary seeded
    /// (directly or over IPC) with a finite request finishes it and
    /// returns instead of waiting for a signal.
    pub async fn run_until_settled(&mut self, jobs: usize) {
        loop {
            if self.session.is_none()
                && self.active.is_none()
                && self.queue.len() >= jobs
                && self.queue.all_terminal()
            {
                return;
            }
            let event = Self::next_event(
                &self.listener,
                self.session.as_mut(),
                self.active.as_mut(),
            )
            .await;
            self.handle_event(event).await;
        }
    }

    /// Waits for the next completion across all pending sources.
    ///
    /// Accepting is suppressed while a session is live; absent sources are
    /// represented by pending futures, so the `select!` shape is constant.
    async fn next_event(
        listener: &PrimaryListener,
        session: Option<&mut IpcSession>,
        active: Option<&mut (usize, RunningJob)>,
    ) -> Event {
        let accepting = session.is_none();
        tokio::select! {
            result = listener.accept(), if accepting => Event::Accepted(result),
            result = Self::session_read(session) => Event::Session(result),
            result = Self::output_read(active) => Event::Output(result),
        }
    }

    async fn session_read(
        session: Option<&mut IpcSession>,
    ) -> Result<SessionRead, TransportError> {
        match session {
            Some(session) => session.read().await,
            None => std::future::pending().await,
        }
    }

    async fn output_read(active: Option<&mut (usize, RunningJob)>) -> std::io::Result<Vec<u8>> {
        match active {
            Some((_, running)) => {
                let mut chunk = [0u8; OUTPUT_CHUNK];
                let n = running.read_chunk(&mut chunk).await?;
                Ok(chunk[..n].to_vec())
            }
            None => std::future::pending().await,
        }
    }

    /// Runs one completion handler to exhaustion.
    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accepted(Ok(stream)) => {
                self.session = Some(IpcSession::new(stream));
            }
            Event::Accepted(Err(e)) => {
                // Transport errors are never fatal; keep listening.
                warn!("accepting a connection failed: {e}");
            }
            Event::Session(Ok(SessionRead::Requests(requests))) => {
                for request in requests {
                    self.enqueue(request).await;
                }
            }
            Event::Session(Ok(SessionRead::Closed)) => {
                debug!("request connection closed");
                self.session = None;
            }
            Event::Session(Err(e)) => {
                // Discard the session, partial request and all.
                warn!("request session failed: {e}");
                self.session = None;
            }
            Event::Output(Ok(bytes)) if bytes.is_empty() => self.finish_active(None).await,
            Event::Output(Ok(bytes)) => {
                if let Some((index, _)) = self.active {
                    if let Some(job) = self.queue.job_mut(index) {
                        job.output.feed(&bytes);
                    }
                }
            }
            Event::Output(Err(e)) => self.finish_active(Some(e)).await,
        }
    }

    /// Waits for the active child and records its terminal state.
    async fn finish_active(&mut self, read_error: Option<std::io::Error>) {
        let Some((index, running)) = self.active.take() else {
            // The job was torn down in the meantime; nothing to do.
            return;
        };
        if let Some(e) = read_error {
            debug!("output pipe closed with error: {e}");
        }
        if let Some(job) = self.queue.job_mut(index) {
            job.state = running.finish(&mut job.output).await;
            info!(path = %job.path.display(), state = %job.state, "signing job finished");
            debug!(output = %job.output.as_str(), "captured signing output");
        }
        self.advance().await;
    }

    /// Starts the next `Idle` job unless one is already running.
    ///
    /// Jobs that fail to start get their terminal state and the scan
    /// continues with the job behind them.
    async fn advance(&mut self) {
        if self.active.is_some() {
            return;
        }
        while let Some(index) = self.queue.next_idle() {
            let Some(job) = self.queue.job_mut(index) else {
                return;
            };
            match runner::start(
                job,
                &mut self.pins,
                self.prompt.as_mut(),
                self.validator.as_mut(),
            )
            .await
            {
                Some(running) => {
                    info!(path = %job.path.display(), "signing job running");
                    self.active = Some((index, running));
                    return;
                }
                None => {
                    info!(path = %job.path.display(), state = %job.state, "signing job failed to start");
                }
            }
        }
    }

    /// The jobs in queue order, for inspection and reporting.
    pub fn jobs(&self) -> impl Iterator<Item = &SigningJob> {
        self.queue.iter()
    }

    /// Number of identities that have a PIN cache slot.
    #[must_use]
    pub fn cached_identities(&self) -> usize {
        self.pins.len()
    }
}
