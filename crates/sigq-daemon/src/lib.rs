//! sigq-daemon - single-instance code-signing coordinator.
//!
//! One binary serves both roles of the coordination channel: the first
//! invocation binds the well-known socket, becomes the primary instance
//! and executes signing jobs one at a time; every later invocation
//! connects as a secondary, forwards its request and exits.
//!
//! # Modules
//!
//! - [`protocol`]: IPC transport, election, request protocol
//! - [`dispatch`]: signing jobs and the FIFO queue
//! - [`runner`]: child-process execution and output capture
//! - [`prompt`]: interactive PIN entry and the shipped validator
//! - [`daemon`]: the primary instance's context object and event loop

pub mod daemon;
pub mod dispatch;
pub mod prompt;
pub mod protocol;
pub mod runner;

pub use daemon::Daemon;
pub use dispatch::{JobQueue, JobState, SigningJob};
