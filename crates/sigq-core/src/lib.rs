//! Core primitives for the sigq signing coordinator.
//!
//! Everything in this crate is host-agnostic: no sockets, no processes,
//! no event loop. The daemon crate builds the transport and dispatcher on
//! top of these pieces.
//!
//! # Modules
//!
//! - [`containers`]: growable array and open-chaining hash map used as
//!   building blocks by the other components
//! - [`identity`]: reference-counted certificate identities and sign
//!   templates with value-based equality
//! - [`template`]: `%1`/`%2`/`%%` command-template expansion
//! - [`credentials`]: identity-keyed PIN cache with prompt/validate/
//!   protect collaborator ports
//! - [`output`]: incremental UTF-8 decoding, line-ending normalization and
//!   capped capture of child-process output

pub mod containers;
pub mod credentials;
pub mod identity;
pub mod output;
pub mod template;

pub use identity::{CertIdentity, SignTemplate};
