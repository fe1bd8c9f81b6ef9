//! Core taskmux library (orchestrator, host boundary, config).

pub mod config;
pub mod host;
pub mod orchestrator;
