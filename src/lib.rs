//! ModScope - diagnostics engine for Bethesda-game mod collections
//!
//! Given a published NexusMods collection, this crate produces three
//! structured reports:
//! - a parsed FOMOD installer model for a single mod archive
//! - a load-order analysis of the collection's plugins
//! - a conflict analysis of the files the collection's mods install
//!
//! Reports are cached in a TTL store; archives only ever touch scratch
//! storage that is cleaned up when each pipeline finishes.

pub mod analysis;
pub mod archive;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fomod;
pub mod manifest;
pub mod nexus;
pub mod pipeline;
pub mod plugins;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{ConflictAnalysis, Engine, FomodAnalysis, LoadOrderAnalysis, Registry};
