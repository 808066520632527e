//! Verification harness for intercepts.
//!
//! Runs interception scenarios under a chosen pool isolation mode and records
//! the results as structured JSONL logs that can be validated afterwards.

pub mod scenarios;
pub mod structured_log;

pub use scenarios::{ScenarioError, ScenarioKind, ScenarioReport, run_all, run_scenario};
pub use structured_log::{
    Decision, LogEmitter, LogEntry, LogLevel, LogValidationError, Outcome, validate_log_file,
    validate_log_line,
};
