//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobStatus for work items
//! - The JobStore contract implemented by each storage backend
//! - Events emitted by producers, workers and the supervisor

mod events;
mod job;
mod store;

pub use events::JobEvent;
pub use job::{Job, JobId, JobStatus, StatusCounts, UnknownStatus};
pub use store::{Completion, JobStore, StoreError, StoreFuture};
