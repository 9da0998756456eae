//! sigq - single-instance code-signing coordinator.
//!
//! The first invocation becomes the primary instance: it binds the
//! coordination socket, queues any files given on its command line and
//! serves requests from later invocations until interrupted. Every later
//! invocation connects as a secondary, forwards its request (or, with no
//! files, merely probes that a primary is reachable) and exits.
//!
//! The event system is strictly single-threaded, so the binary builds a
//! current-thread runtime by hand in a synchronous `fn main()` and drives
//! everything from one task.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use sigq_core::credentials::ProcessKeyProtector;
use sigq_core::output::DEFAULT_OUTPUT_LIMIT;
use sigq_core::{CertIdentity, SignTemplate};
use sigq_daemon::daemon::Daemon;
use sigq_daemon::prompt::{DeferredValidator, PinentryPrompt};
use sigq_daemon::protocol::{Role, SignRequest, bind_or_connect, default_socket_path, send_request};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// sigq - coordinate invocations of a code-signing utility
#[derive(Parser, Debug)]
#[command(name = "sigq")]
#[command(version, about, long_about = None)]
struct Args {
    /// Certificate (key container) identifier
    #[arg(long)]
    cert_id: Option<String>,

    /// Smart-card name
    #[arg(long)]
    card_name: Option<String>,

    /// Card-reader name
    #[arg(long)]
    card_reader: Option<String>,

    /// Signing command template; %1 = file, %2 = PIN, %% = literal %
    #[arg(long)]
    template: Option<String>,

    /// Files to sign
    files: Vec<PathBuf>,

    /// Path to the coordination Unix socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Captured output ceiling per job, in code points
    #[arg(long, default_value_t = DEFAULT_OUTPUT_LIMIT)]
    output_limit: usize,
}

/// Synchronous entry point; the runtime is built by hand because the
/// whole system runs on a single thread.
fn main() -> Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing(&args)?;

    let socket_path = args.socket.clone().unwrap_or_else(default_socket_path);
    match bind_or_connect(&socket_path)
        .await
        .context("failed to open the coordination channel")?
    {
        Role::Secondary(mut stream) => {
            if args.files.is_empty() {
                // Connecting alone confirms a primary is reachable.
                info!("primary instance is reachable");
                return Ok(());
            }
            let request = SignRequest {
                cert_id: args.cert_id,
                card_name: args.card_name,
                card_reader: args.card_reader,
                template: args
                    .template
                    .context("--template is required when files are given")?,
                files: args.files,
            };
            send_request(&mut stream, &request)
                .await
                .context("failed to forward the signing request")?;
            info!(files = request.files.len(), "request handed to the primary instance");
            Ok(())
        }
        Role::Primary(listener) => {
            let mut daemon = Daemon::new(
                listener,
                args.output_limit,
                Box::new(PinentryPrompt),
                Box::new(DeferredValidator),
                ProcessKeyProtector::new(),
            );
            if !args.files.is_empty() {
                let Some(template) = args.template else {
                    bail!("--template is required when files are given");
                };
                let identity =
                    CertIdentity::new(args.cert_id, args.card_name, args.card_reader);
                daemon
                    .seed(identity, SignTemplate::new(template), args.files)
                    .await;
            }
            daemon.run().await
        }
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
