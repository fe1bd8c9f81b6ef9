//! Orchestrator module: background-task lifecycle and scheduling.
//!
//! This module contains:
//! - `task`: task records and the status state machine
//! - `policy`: which agent types may spawn which other agent types
//! - `fallback`: model-identifier parsing and fallback-chain resolution
//! - `manager`: registry, start queue, lifecycle engine, completion waiters

pub mod fallback;
pub mod manager;
pub mod policy;
pub mod task;

pub use fallback::{FallbackResolver, ModelRef};
pub use manager::{LaunchOptions, TaskManager};
pub use policy::DelegationPolicy;
pub use task::{Task, TaskId, TaskStatus};
