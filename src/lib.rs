//! HomeCloud sync endpoint
//!
//! Receives batches of files pushed by HomeCloud clients over TCP, checks each
//! against its MD5 and keeps a per-client last-sync timestamp on disk.

pub mod checksum;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod logging;
pub mod metadata;
pub mod mutf8;
pub mod paths;
pub mod properties;
pub mod protocol;
pub mod server;
pub mod session;
pub mod wire;

pub use config::SessionConfig;
pub use error::{StartupError, SyncError};
pub use metadata::MetadataStore;
pub use server::{serve, Server};
pub use session::{FileOutcome, SessionReport};
