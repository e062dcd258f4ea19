//! Common utilities and shared types for brewlog.
//!
//! This crate provides foundational components used across all brewlog crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`SyncError`] and [`SyncResult`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use brewlog_common::{Config, IdGenerator, SyncResult};
//!
//! fn example() -> SyncResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.generate();
//!     println!("Generated ID: {}", id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::{Config, FeedConfig, NotificationConfig, RetryConfig};
pub use error::{SyncError, SyncResult};
pub use id::IdGenerator;
