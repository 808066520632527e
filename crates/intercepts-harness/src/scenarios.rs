//! Scenario runners exercising the interception contract end to end.
//!
//! Each scenario builds its own [`Interceptor`] with an explicit isolation mode
//! and checks one observable property: passthrough fidelity, override and
//! restore, failure propagation, reentrancy, concurrency, and pool restoration
//! after a panic.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use intercepts_core::{
    Args, CallSite, Callable, CallableIdentity, InterceptError, Interceptor, Policy,
    PoolIsolation, Value, global_metrics,
};
use thiserror::Error;

use crate::structured_log::{Decision, LogEmitter, LogEntry, LogLevel, Outcome};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("{what}: expected {expected}, got {actual}")]
    Mismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },
    #[error("constant pool not restored after {after}")]
    PoolNotRestored { after: &'static str },
    #[error(transparent)]
    Intercept(#[from] InterceptError),
    #[error("worker thread panicked")]
    WorkerPanicked,
}

fn expect(what: &'static str, actual: &Value, expected: &Value) -> Result<(), ScenarioError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ScenarioError::Mismatch {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn expect_restored(interceptor: &Interceptor, after: &'static str) -> Result<(), ScenarioError> {
    let entry = interceptor.dispatch_entry();
    if entry.constant_pool() == *entry.base_constant_pool() {
        Ok(())
    } else {
        Err(ScenarioError::PoolNotRestored { after })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    Passthrough,
    Override,
    Failure,
    Reentrancy,
    Concurrency,
    PanicUnwind,
}

impl ScenarioKind {
    pub const ALL: [Self; 6] = [
        Self::Passthrough,
        Self::Override,
        Self::Failure,
        Self::Reentrancy,
        Self::Concurrency,
        Self::PanicUnwind,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Override => "override",
            Self::Failure => "failure",
            Self::Reentrancy => "reentrancy",
            Self::Concurrency => "concurrency",
            Self::PanicUnwind => "panic_unwind",
        }
    }

    /// Dispatch decision the scenario mostly exercises.
    const fn decision(self) -> Decision {
        match self {
            Self::Passthrough => Decision::Passthrough,
            _ => Decision::Policy,
        }
    }
}

/// Result of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub scenario: ScenarioKind,
    pub isolation: PoolIsolation,
    pub identity: Option<CallableIdentity>,
    pub latency_ns: u64,
    pub error: Option<ScenarioError>,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.passed() { Outcome::Pass } else { Outcome::Fail }
    }

    /// Structured log record for this report. The trace id is left for the
    /// emitter to assign.
    #[must_use]
    pub fn to_log_entry(&self) -> LogEntry {
        let level = if self.passed() { LogLevel::Info } else { LogLevel::Error };
        let mut entry = LogEntry::new("", level, "scenario_result")
            .with_symbol(self.scenario.as_str())
            .with_isolation(self.isolation)
            .with_outcome(self.outcome())
            .with_latency_ns(self.latency_ns)
            .with_details(serde_json::json!({
                "error": self.error.as_ref().map(ToString::to_string),
                "metrics": global_metrics().snapshot().to_string(),
            }));
        if let Some(identity) = self.identity {
            entry = entry.with_identity(identity).with_decision(self.scenario.decision());
        }
        entry
    }
}

#[derive(Debug, Error)]
#[error("domain error: {0}")]
pub struct DomainError(pub &'static str);

fn int_arg(args: &Args, i: usize) -> i64 {
    args.get(i).and_then(Value::as_int).unwrap_or(0)
}

/// `add(a, b)`, failing with [`DomainError`] on `(0, 0)`.
#[must_use]
pub fn add_site() -> Arc<CallSite> {
    Arc::new(CallSite::new(
        Callable::builder("add")
            .doc("Add two integers.")
            .build(|args, _| {
                let (a, b) = (int_arg(args, 0), int_arg(args, 1));
                if a == 0 && b == 0 {
                    return Err(InterceptError::raised(DomainError("zero operands")));
                }
                Ok(Value::Int(a + b))
            }),
    ))
}

/// `mul(a, b)`.
#[must_use]
pub fn mul_site() -> Arc<CallSite> {
    Arc::new(CallSite::new(Callable::function("mul", |args, _| {
        Ok(Value::Int(int_arg(args, 0) * int_arg(args, 1)))
    })))
}

/// Policy negating the integer result of the next layer.
#[must_use]
pub fn negate() -> Policy {
    Policy::named("negate", |next, args, kwargs| {
        let v = next.call(args, kwargs)?.as_int().unwrap_or(0);
        Ok(Value::Int(-v))
    })
}

type ScenarioResult = Result<Option<CallableIdentity>, ScenarioError>;

fn passthrough(isolation: PoolIsolation) -> ScenarioResult {
    let interceptor = Interceptor::with_isolation(isolation);
    let site = add_site();
    let trampoline = interceptor.make_trampoline(site.original())?;
    let direct = site.call_positional([2, 3])?;
    let routed = trampoline.callable().call_positional([2, 3])?;
    expect("passthrough result", &routed, &direct)?;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let identity = interceptor.register(
        &site,
        Policy::named("observe", move |next, args, kwargs| {
            counter.fetch_add(1, Ordering::Relaxed);
            next.call(args, kwargs)
        }),
    )?;
    expect("observed result", &site.call_positional([2, 3])?, &direct)?;
    expect(
        "observer calls",
        &Value::Int(seen.load(Ordering::Relaxed) as i64),
        &Value::Int(1),
    )?;
    expect_restored(&interceptor, "passthrough")?;
    Ok(Some(identity))
}

fn override_and_restore(isolation: PoolIsolation) -> ScenarioResult {
    let interceptor = Interceptor::with_isolation(isolation);
    let site = add_site();
    expect("original", &site.call_positional([2, 3])?, &Value::Int(5))?;
    let identity = interceptor.register(&site, negate())?;
    expect("overridden", &site.call_positional([2, 3])?, &Value::Int(-5))?;
    interceptor.unregister(&site, None)?;
    expect("restored", &site.call_positional([2, 3])?, &Value::Int(5))?;
    Ok(Some(identity))
}

fn failure(isolation: PoolIsolation) -> ScenarioResult {
    let interceptor = Interceptor::with_isolation(isolation);
    let site = add_site();
    let identity = interceptor.register(&site, negate())?;
    match site.call_positional([0, 0]) {
        Err(err) if err.downcast_raised::<DomainError>().is_some() => {}
        Err(err) => return Err(err.into()),
        Ok(value) => {
            return Err(ScenarioError::Mismatch {
                what: "failure",
                expected: "DomainError".to_string(),
                actual: value.to_string(),
            });
        }
    }
    expect_restored(&interceptor, "failure")?;
    expect("after failure", &site.call_positional([1, 2])?, &Value::Int(-3))?;
    Ok(Some(identity))
}

fn reentrancy(isolation: PoolIsolation) -> ScenarioResult {
    let interceptor = Interceptor::with_isolation(isolation);
    let add = add_site();
    let mul = mul_site();
    interceptor.register(&mul, negate())?;

    let entry = Arc::downgrade(interceptor.dispatch_entry());
    let inner = mul.clone();
    let identity = interceptor.register(
        &add,
        Policy::named("nested", move |next, args, kwargs| {
            let outer = entry
                .upgrade()
                .and_then(|e| e.constant_pool().trailing_identity());
            let product = inner.call(args, kwargs)?;
            let after = entry
                .upgrade()
                .and_then(|e| e.constant_pool().trailing_identity());
            if outer != after {
                return Err(InterceptError::raised(DomainError(
                    "outer identity clobbered by nested call",
                )));
            }
            let sum = next.call(args, kwargs)?;
            Ok(Value::tuple([sum, product]))
        }),
    )?;

    expect(
        "nested result",
        &add.call_positional([3, 4])?,
        &Value::tuple([7, -12]),
    )?;

    // The same trampoline, reentered from its own policy.
    let countdown = Arc::new(CallSite::new(Callable::function("countdown", |_, _| {
        Ok(Value::Int(0))
    })));
    let own_identity = intercepts_core::encode(countdown.original())?;
    let entry = Arc::downgrade(interceptor.dispatch_entry());
    let site = Arc::downgrade(&countdown);
    interceptor.register(
        &countdown,
        Policy::named("recurse", move |next, args, kwargs| {
            let n = args.get(0).and_then(Value::as_int).unwrap_or(0);
            let Some(site) = site.upgrade().filter(|_| n > 0) else {
                return next.call(args, kwargs);
            };
            let below = site.call_positional([n - 1])?.as_int().unwrap_or(0);
            let after = entry
                .upgrade()
                .and_then(|e| e.constant_pool().trailing_identity());
            if after != Some(own_identity) {
                return Err(InterceptError::raised(DomainError(
                    "identity clobbered by recursive call",
                )));
            }
            Ok(Value::Int(below + 1))
        }),
    )?;
    expect(
        "recursive result",
        &countdown.call_positional([4])?,
        &Value::Int(4),
    )?;

    expect_restored(&interceptor, "reentrancy")?;
    Ok(Some(identity))
}

fn concurrency(isolation: PoolIsolation) -> ScenarioResult {
    const WORKERS: i64 = 8;
    const CALLS: i64 = 250;

    let interceptor = Interceptor::with_isolation(isolation);
    let add = add_site();
    let mul = mul_site();
    let identity = interceptor.register(&add, negate())?;
    interceptor.register(
        &mul,
        Policy::named("tag", |next, args, kwargs| {
            Ok(Value::tuple([Value::from("mul"), next.call(args, kwargs)?]))
        }),
    )?;

    let outcomes: Vec<Result<(), ScenarioError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let (add, mul) = (&add, &mul);
                scope.spawn(move || -> Result<(), ScenarioError> {
                    for i in 0..CALLS {
                        let a = worker * 10_000 + i;
                        expect("add", &add.call_positional([a, 1])?, &Value::Int(-(a + 1)))?;
                        expect(
                            "mul",
                            &mul.call_positional([a, 3])?,
                            &Value::tuple([Value::from("mul"), Value::Int(a * 3)]),
                        )?;
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(ScenarioError::WorkerPanicked)))
            .collect()
    });
    for outcome in outcomes {
        outcome?;
    }
    expect_restored(&interceptor, "concurrency")?;
    Ok(Some(identity))
}

fn panic_unwind(isolation: PoolIsolation) -> ScenarioResult {
    let interceptor = Interceptor::with_isolation(isolation);
    let site = add_site();
    let identity = interceptor.register(
        &site,
        Policy::named("explode", |next, args, kwargs| {
            if int_arg(args, 0) < 0 {
                panic!("negative operand");
            }
            next.call(args, kwargs)
        }),
    )?;

    let unwound = catch_unwind(AssertUnwindSafe(|| site.call_positional([-1, 1]))).is_err();
    expect("unwound", &Value::Bool(unwound), &Value::Bool(true))?;
    expect_restored(&interceptor, "panic")?;
    expect("after panic", &site.call_positional([1, 1])?, &Value::Int(2))?;
    Ok(Some(identity))
}

/// Run one scenario and time it.
#[must_use]
pub fn run_scenario(kind: ScenarioKind, isolation: PoolIsolation) -> ScenarioReport {
    let started = Instant::now();
    let result = match kind {
        ScenarioKind::Passthrough => passthrough(isolation),
        ScenarioKind::Override => override_and_restore(isolation),
        ScenarioKind::Failure => failure(isolation),
        ScenarioKind::Reentrancy => reentrancy(isolation),
        ScenarioKind::Concurrency => concurrency(isolation),
        ScenarioKind::PanicUnwind => panic_unwind(isolation),
    };
    let latency_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
    let (identity, error) = match result {
        Ok(identity) => (identity, None),
        Err(err) => (None, Some(err)),
    };
    if let Some(err) = &error {
        tracing::error!(scenario = kind.as_str(), isolation = %isolation, error = %err, "scenario failed");
    } else {
        tracing::info!(scenario = kind.as_str(), isolation = %isolation, latency_ns, "scenario passed");
    }
    ScenarioReport {
        scenario: kind,
        isolation,
        identity,
        latency_ns,
        error,
    }
}

/// Run every scenario, logging each report to `emitter` when given.
pub fn run_all(
    isolation: PoolIsolation,
    mut emitter: Option<&mut LogEmitter>,
) -> std::io::Result<Vec<ScenarioReport>> {
    let mut reports = Vec::with_capacity(ScenarioKind::ALL.len());
    for kind in ScenarioKind::ALL {
        let report = run_scenario(kind, isolation);
        if let Some(emitter) = emitter.as_deref_mut() {
            emitter.emit_entry(report.to_log_entry())?;
        }
        reports.push(report);
    }
    if let Some(emitter) = emitter {
        emitter.flush()?;
    }
    Ok(reports)
}
