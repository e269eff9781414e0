//! # GradeSync Relay Library
//!
//! Relays course grade synchronization requests to the GradeSync service and
//! tracks long-running syncs as pollable in-memory jobs.

pub mod config;
pub mod error;
pub mod gradesync;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod retention;
pub mod server;
pub mod sync_executor;
pub mod sync_service;
pub mod telemetry;
