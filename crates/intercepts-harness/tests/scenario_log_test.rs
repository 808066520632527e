//! Integration test: scenario runs produce schema-valid structured logs.
//!
//! Validates that:
//! 1. Every scenario passes under both isolation modes.
//! 2. The JSONL written for a run passes `validate_log_file`.
//! 3. Each line carries isolation, outcome and, for passing runs, an identity.
//!
//! Run: cargo test -p intercepts-harness --test scenario_log_test

use std::path::PathBuf;

use intercepts_core::PoolIsolation;
use intercepts_harness::{LogEmitter, Outcome, ScenarioKind, run_all, validate_log_file, validate_log_line};

fn temp_log(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("intercepts-{name}-{}.jsonl", std::process::id()))
}

#[test]
fn all_scenarios_pass_in_both_modes() {
    for isolation in [PoolIsolation::PerThread, PoolIsolation::Serialized] {
        let reports = run_all(isolation, None).unwrap();
        assert_eq!(reports.len(), ScenarioKind::ALL.len());
        for report in &reports {
            assert!(
                report.passed(),
                "{} failed under {isolation}: {:?}",
                report.scenario.as_str(),
                report.error
            );
        }
    }
}

#[test]
fn run_log_validates() {
    let path = temp_log("run");
    let mut emitter = LogEmitter::to_file(&path, "intercepts", "run-test").unwrap();
    run_all(PoolIsolation::Serialized, Some(&mut emitter)).unwrap();
    drop(emitter);

    let (lines, errors) = validate_log_file(&path).unwrap();
    assert_eq!(lines, ScenarioKind::ALL.len());
    assert!(errors.is_empty(), "{errors:?}");

    let content = std::fs::read_to_string(&path).unwrap();
    for (i, line) in content.lines().enumerate() {
        let entry = validate_log_line(line, i + 1).unwrap();
        assert_eq!(entry.isolation.as_deref(), Some("serialized"));
        assert_eq!(entry.outcome, Some(Outcome::Pass));
        assert!(entry.identity.is_some());
        assert!(entry.trace_id.starts_with("intercepts::run-test::"));
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn buffered_emitter_collects_every_scenario() {
    let mut emitter = LogEmitter::to_buffer("intercepts", "buffered");
    run_all(PoolIsolation::PerThread, Some(&mut emitter)).unwrap();
    let text = emitter.buffered().unwrap();
    let symbols: Vec<String> = text
        .lines()
        .map(|line| validate_log_line(line, 0).unwrap().symbol.unwrap_or_default())
        .collect();
    let expected: Vec<String> = ScenarioKind::ALL.iter().map(|k| k.as_str().to_string()).collect();
    assert_eq!(symbols, expected);
}
