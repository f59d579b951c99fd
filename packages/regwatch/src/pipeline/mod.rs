//! Pipeline orchestration.
//!
//! Fetch → archive → normalize → hash → decide → (extract → diff)? → write.
//! Each run holds its source's lock from before the latest-revision read
//! until the writer commits.

pub mod config;
pub mod locks;
mod retry;
pub mod runner;

pub use config::{LockPolicy, PipelineConfig, RetryPolicy};
pub use locks::{SourceGuard, SourceLocks};
pub use runner::{Pipeline, RunReport, RunStatus, StageAttempts};
