//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Maintenance runtime and index assembly
//! - [`time`] - Timestamps and clock sources
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
