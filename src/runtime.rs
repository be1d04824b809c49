//! Runtime glue: validated configuration, background task supervision, and
//! telemetry.

pub mod config;
pub mod supervisor;
pub mod telemetry;
