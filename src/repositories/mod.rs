//! # Repository Layer
//!
//! Storage for sync jobs. Jobs live in process memory only and are lost on
//! restart.

pub mod sync_job;

pub use sync_job::{JobStore, ListJobsFilter};
