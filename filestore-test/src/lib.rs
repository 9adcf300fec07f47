//! Test utilities for the filestore stresstest.
//!
//! This crate provides in-process fake file stores and logging setup for integration tests. See
//! the modules for all available utilities.

pub mod server;
pub mod tracing;
