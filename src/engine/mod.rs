//! Execution engine for paratrooper
//!
//! The engine orchestrates:
//! 1. Discovery - Per-host run lists and remote defaults
//! 2. Packaging - Cookbook fetch and kitchen archive
//! 3. Transfer - Archive to every host, then `solo.rb` / `solo.json`
//! 4. Execution - chef-solo, uniformly or per host

pub mod pipeline;
pub mod planner;

pub use pipeline::{Coordinator, DeployReport, package};
pub use planner::{ExecutionPlan, RunMode};
