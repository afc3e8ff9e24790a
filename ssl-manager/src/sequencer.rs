//! Ordered step execution with fail-fast or continue-on-error semantics.
//!
//! A [`StepRunner`] owns the context the steps act on and knows how to run a
//! single step. The provided `exec*` methods drive an ordered list of steps,
//! record every outcome into the runner's [`DebugTrace`] and report failures
//! to the runner's audit hook.
use serde::Serialize;
use tracing::{info, warn};

use crate::outcome::Outcome;

/// Name and printable arguments of a step, used for logging and audit tags.
pub trait StepInfo {
    fn name(&self) -> &'static str;

    fn args(&self) -> String {
        String::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecMode {
    /// Stop at the first failing step and return its outcome.
    #[default]
    BreakOnError,
    /// Run every step and return the outcome of the last one.
    ContinueOnError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub method: &'static str,
    pub outcome: Outcome,
}

/// Append-only record of every step outcome within one top-level action.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DebugTrace {
    entries: Vec<TraceEntry>,
}

impl DebugTrace {
    pub fn push(&mut self, method: &'static str, outcome: Outcome) {
        self.entries.push(TraceEntry { method, outcome });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.method)
    }

    /// Start over for a new top-level action.
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
    }
}

#[allow(async_fn_in_trait)]
pub trait StepRunner {
    type Step: StepInfo;

    /// Run one step against the runner's context.
    async fn run_step(&mut self, step: Self::Step) -> Outcome;

    fn trace_mut(&mut self) -> &mut DebugTrace;

    /// Called for every failing step before the on-failure callback.
    async fn audit_failure(&mut self, _method: &'static str, _outcome: &Outcome) {}

    async fn exec_with(
        &mut self,
        steps: Vec<Self::Step>,
        mode: ExecMode,
        mut on_fail: Option<&mut dyn FnMut(&Outcome)>,
    ) -> Outcome {
        let mut outcome = Outcome::ok();
        for step in steps {
            let method = step.name();
            let args = step.args();
            if args.is_empty() {
                info!("{method}");
            } else {
                info!("{method}: {args}");
            }

            outcome = self.run_step(step).await;
            if !outcome.is_ok() {
                outcome.method = Some(method.to_string());
            }
            self.trace_mut().push(method, outcome.clone());
            info!("{method}.response: {outcome}");

            if !outcome.is_ok() {
                warn!(method, result = outcome.result, "step failed");
                self.audit_failure(method, &outcome).await;
                if let Some(on_fail) = on_fail.as_mut() {
                    on_fail(&outcome);
                }
                if mode == ExecMode::BreakOnError {
                    break;
                }
            }
        }
        outcome
    }

    /// Run `steps` in order, stopping at the first failure.
    async fn exec(&mut self, steps: Vec<Self::Step>) -> Outcome {
        self.exec_with(steps, ExecMode::BreakOnError, None).await
    }

    /// Run all `steps` in order regardless of failures.
    async fn exec_all(&mut self, steps: Vec<Self::Step>) -> Outcome {
        self.exec_with(steps, ExecMode::ContinueOnError, None).await
    }

    async fn exec_one(&mut self, step: Self::Step) -> Outcome {
        self.exec(vec![step]).await
    }
}
