// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod metrics;
pub mod retry;
pub mod scheduler;

// Pipeline stages
pub mod enrich;
pub mod ingest;
pub mod moderation;
pub mod pipeline;
pub mod store;

// Query side
pub mod identity;
pub mod leaderboard;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::pipeline::{Pipeline, PipelineError, RunOptions, RunReport};
pub use crate::store::{Identity, Post, PostStore, SqlitePostStore, SyncRun};
