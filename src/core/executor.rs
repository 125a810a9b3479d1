//! FC-013: Executor, the run state machine.
//!
//! Setup -> Steps -> Assertions -> Cleanup, strictly sequential.
//! For each action: resolve -> oracle pre-checks -> dispatch -> record -> store.
//! Backend calls run on their own task so a step timeout can abandon them.

use super::condition;
use super::resolver;
use super::state::RunContext;
use super::types::*;
use crate::backend::{self, Backend};
use crate::oracle::{self, accounting, smart_code};
use crate::trace::{eventlog, hasher};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Output recorded for every action of a dry run.
pub const DRY_RUN_ID: &str = "dry-run";

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Log progress at info level
    pub verbose: bool,
    /// Resolve and record without contacting the backend
    pub dry_run: bool,
    /// Keep going after a failed step
    pub continue_on_error: bool,
    /// Ceiling for the whole run, in milliseconds
    pub timeout_ms: Option<u64>,
    /// Append run events to this JSONL file
    pub event_log: Option<PathBuf>,
}

/// Run a definition to completion. Always returns a result.
pub async fn run(
    definition: &TestDefinition,
    backend: Arc<dyn Backend>,
    options: &RunOptions,
) -> RunResult {
    Runner::new(definition, backend, options.clone())
        .run()
        .await
}

/// Outcome of one step attempt.
enum AttemptOutcome {
    /// All actions and postconditions passed; `scratch` holds the new entries.
    Passed {
        actions: Vec<ActionResult>,
        scratch: RunContext,
    },
    /// The attempt failed; `retryable` is false for unmet preconditions.
    Failed {
        actions: Vec<ActionResult>,
        error: String,
        retryable: bool,
    },
}

/// Action lists outside the steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Cleanup,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Cleanup => "cleanup",
        }
    }
}

/// State of one run.
pub struct Runner<'a> {
    definition: &'a TestDefinition,
    backend: Arc<dyn Backend>,
    options: RunOptions,
    context: RunContext,
    run_id: String,
    deadline: Option<Instant>,
    errors: Vec<RunError>,
}

impl<'a> Runner<'a> {
    pub fn new(definition: &'a TestDefinition, backend: Arc<dyn Backend>, options: RunOptions) -> Self {
        let context = RunContext::seeded(&definition.context, &eventlog::now_iso8601());
        Self {
            definition,
            backend,
            options,
            context,
            run_id: eventlog::generate_run_id(),
            deadline: None,
            errors: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run context: seeded names plus every committed output.
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Drive the run through every phase.
    pub async fn run(&mut self) -> RunResult {
        let start = Instant::now();
        let definition = self.definition;
        let dry_run = self.options.dry_run;
        self.deadline = self
            .options
            .timeout_ms
            .map(|ms| start + Duration::from_millis(ms));

        self.emit(RunEvent::RunStarted {
            run_id: self.run_id.clone(),
            test_id: definition.id.clone(),
            dry_run,
            flowcheck_version: env!("CARGO_PKG_VERSION").to_string(),
        });
        self.progress(&definition.id, "run started");

        if !dry_run {
            self.backend
                .set_organization_id(&definition.context.organization_id);
        }

        let setup = self.run_phase(Phase::Setup, &definition.setup).await;
        let mut halted = setup.iter().any(|r| !r.success);
        if halted {
            tracing::error!(run_id = %self.run_id, "setup failed; steps skipped");
        }

        let mut steps = Vec::new();
        if !halted {
            for step in &definition.steps {
                let result = self.run_step(step).await;
                let failed = !result.success;
                steps.push(result);
                if failed && !self.continues_after_failure() {
                    tracing::error!(
                        run_id = %self.run_id,
                        step = %step.id,
                        "JIDOKA: stopping after failed step"
                    );
                    halted = true;
                    break;
                }
            }
        }

        if dry_run {
            tracing::debug!(run_id = %self.run_id, "dry run: assertions skipped");
        } else if halted {
            tracing::warn!(run_id = %self.run_id, "run halted: assertions skipped");
        } else {
            self.evaluate_assertions().await;
        }

        let cleanup = if halted && !definition.policy.always_cleanup {
            tracing::warn!(run_id = %self.run_id, "run halted and policy forbids cleanup");
            Vec::new()
        } else {
            self.run_phase(Phase::Cleanup, &definition.cleanup).await
        };

        let errors = std::mem::take(&mut self.errors);
        let result = RunResult {
            run_id: self.run_id.clone(),
            test_id: definition.id.clone(),
            fingerprint: hasher::fingerprint(definition).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cannot fingerprint definition");
                String::new()
            }),
            success: errors.is_empty(),
            dry_run,
            duration: start.elapsed(),
            setup,
            steps,
            cleanup,
            errors,
        };

        self.emit(RunEvent::RunCompleted {
            run_id: self.run_id.clone(),
            steps_passed: result.steps_passed() as u32,
            steps_failed: result.steps_failed() as u32,
            errors: result.errors.len() as u32,
            total_seconds: result.duration.as_secs_f64(),
        });
        self.progress(
            &definition.id,
            if result.success { "run passed" } else { "run failed" },
        );
        result
    }

    fn continues_after_failure(&self) -> bool {
        self.options.continue_on_error || self.definition.policy.failure == FailurePolicy::Continue
    }

    fn progress(&self, subject: &str, message: &str) {
        if self.options.verbose {
            tracing::info!(run_id = %self.run_id, subject, "{}", message);
        } else {
            tracing::debug!(run_id = %self.run_id, subject, "{}", message);
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(path) = &self.options.event_log {
            if let Err(e) = eventlog::append_event(path, event) {
                tracing::warn!(error = %e, "cannot append run event");
            }
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Per-attempt budget: the step timeout, capped by what is left of the
    /// run ceiling. `None` once the ceiling has passed.
    fn budget_for(&self, step: &Step) -> Option<Duration> {
        let step_budget = step.timeout_duration();
        match self.deadline {
            None => Some(step_budget),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    None
                } else {
                    Some(step_budget.min(remaining))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Setup / cleanup
    // ------------------------------------------------------------------

    /// Setup stops at its first failure; cleanup always runs every action.
    async fn run_phase(&mut self, phase: Phase, actions: &[Action]) -> Vec<ActionResult> {
        if actions.is_empty() {
            return Vec::new();
        }
        self.progress(phase.name(), "phase started");

        let mut scope = self.context.fork();
        let mut results = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            if phase == Phase::Setup && self.deadline_passed() {
                self.errors.push(RunError::new(
                    phase.name(),
                    "run timeout exceeded during setup",
                ));
                break;
            }
            let result = self
                .execute_action(&mut scope, phase.name(), index, action)
                .await;
            let failed = !result.success;
            if let Some(error) = &result.error {
                self.errors.push(RunError::new(
                    phase.name(),
                    format!("action {} ({}) failed: {}", index, result.kind, error),
                ));
            }
            results.push(result);
            if failed && phase == Phase::Setup {
                break;
            }
        }
        self.context.absorb(scope);

        self.emit(RunEvent::PhaseCompleted {
            run_id: self.run_id.clone(),
            phase: phase.name().to_string(),
            actions: results.len() as u32,
            success: results.iter().all(|r| r.success),
        });
        results
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn run_step(&mut self, step: &Step) -> StepResult {
        let started = Instant::now();
        let max_attempts = step.retry.min(MAX_STEP_RETRY) + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.emit(RunEvent::StepStarted {
                run_id: self.run_id.clone(),
                step: step.id.clone(),
                attempt,
            });
            self.progress(&step.id, "step started");

            match self.attempt_step(step).await {
                AttemptOutcome::Passed { actions, scratch } => {
                    let added = self.context.absorb(scratch);
                    let duration = if self.options.dry_run {
                        Duration::ZERO
                    } else {
                        started.elapsed()
                    };
                    tracing::debug!(step = %step.id, added, "step outputs committed");
                    self.emit(RunEvent::StepPassed {
                        run_id: self.run_id.clone(),
                        step: step.id.clone(),
                        attempt,
                        duration_seconds: duration.as_secs_f64(),
                    });
                    self.progress(&step.id, "step passed");
                    return StepResult {
                        step_id: step.id.clone(),
                        success: true,
                        duration,
                        attempts: attempt,
                        actions,
                        error: None,
                    };
                }
                AttemptOutcome::Failed {
                    actions,
                    error,
                    retryable,
                } => {
                    self.emit(RunEvent::StepFailed {
                        run_id: self.run_id.clone(),
                        step: step.id.clone(),
                        attempt,
                        error: error.clone(),
                    });
                    if retryable && attempt < max_attempts {
                        tracing::warn!(step = %step.id, attempt, error = %error, "step failed; retrying");
                        continue;
                    }
                    tracing::error!(step = %step.id, attempt, error = %error, "step failed");
                    self.errors
                        .push(RunError::new(format!("step:{}", step.id), error.clone()));
                    return StepResult {
                        step_id: step.id.clone(),
                        success: false,
                        duration: started.elapsed(),
                        attempts: attempt,
                        actions,
                        error: Some(error),
                    };
                }
            }
        }
    }

    async fn attempt_step(&self, step: &Step) -> AttemptOutcome {
        let dry_run = self.options.dry_run;
        let mut scratch = self.context.fork();

        if !dry_run {
            if let Some(unmet) = condition::first_unmet(&step.preconditions, &scratch) {
                return AttemptOutcome::Failed {
                    actions: Vec::new(),
                    error: format!("precondition not met: {}", unmet),
                    retryable: false,
                };
            }
        }

        let Some(budget) = self.budget_for(step) else {
            return AttemptOutcome::Failed {
                actions: Vec::new(),
                error: "run timeout exceeded before the step started".to_string(),
                retryable: false,
            };
        };

        let mut actions = Vec::with_capacity(step.actions.len());
        let sequence = self.run_actions(step, &mut scratch, &mut actions);
        match tokio::time::timeout(budget, sequence).await {
            Err(_) => {
                return AttemptOutcome::Failed {
                    actions,
                    error: format!("timed out after {} ms", budget.as_millis()),
                    retryable: true,
                }
            }
            Ok(Err(error)) => {
                return AttemptOutcome::Failed {
                    actions,
                    error,
                    retryable: true,
                }
            }
            Ok(Ok(())) => {}
        }

        if !scratch.insert(step.id.clone(), consolidate(&actions)) {
            tracing::warn!(step = %step.id, "step id already bound; output not stored");
        }

        if !dry_run {
            if let Some(unmet) = condition::first_unmet(&step.postconditions, &scratch) {
                return AttemptOutcome::Failed {
                    actions,
                    error: format!("postcondition not met: {}", unmet),
                    retryable: true,
                };
            }
        }

        AttemptOutcome::Passed { actions, scratch }
    }

    async fn run_actions(
        &self,
        step: &Step,
        scope: &mut RunContext,
        results: &mut Vec<ActionResult>,
    ) -> Result<(), String> {
        for (index, action) in step.actions.iter().enumerate() {
            let persona = self.definition.action_persona(step, action);
            tracing::debug!(step = %step.id, action = index, persona, kind = %action.kind, "executing action");
            let result = self.execute_action(scope, &step.id, index, action).await;
            let failure = result.error.clone();
            results.push(result);
            if let Some(error) = failure {
                return Err(format!(
                    "action {} ({}) failed: {}",
                    index,
                    action.kind.name(),
                    error
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    async fn execute_action(
        &self,
        scope: &mut RunContext,
        owner: &str,
        index: usize,
        action: &Action,
    ) -> ActionResult {
        let started = Instant::now();
        let kind = action.kind.name().to_string();

        let resolved = match resolve_typed(action, scope) {
            Ok(resolved) => resolved,
            Err(error) => {
                return ActionResult {
                    index,
                    kind,
                    success: false,
                    duration: started.elapsed(),
                    resolved: Value::Null,
                    output: Value::Null,
                    error: Some(error),
                }
            }
        };
        let payload = serde_json::to_value(&resolved.kind).unwrap_or(Value::Null);

        if self.options.dry_run {
            let output = json!({ "id": DRY_RUN_ID });
            store_output(scope, action, &output);
            return ActionResult {
                index,
                kind,
                success: true,
                duration: Duration::ZERO,
                resolved: payload,
                output,
                error: None,
            };
        }

        let outcome = match precheck(&resolved.kind) {
            Ok(()) => self.perform(owner, index, resolved.kind).await,
            Err(e) => Err(e),
        };
        let duration = started.elapsed();

        match outcome {
            Ok(output) => {
                store_output(scope, action, &output);
                ActionResult {
                    index,
                    kind,
                    success: true,
                    duration,
                    resolved: payload,
                    output,
                    error: None,
                }
            }
            Err(error) => {
                tracing::warn!(owner, action = index, kind = %kind, error = %error, "action failed");
                ActionResult {
                    index,
                    kind,
                    success: false,
                    duration,
                    resolved: payload,
                    output: Value::Null,
                    error: Some(error),
                }
            }
        }
    }

    async fn perform(&self, owner: &str, index: usize, kind: ActionKind) -> Result<Value, String> {
        match kind {
            ActionKind::Wait(wait) => {
                tokio::time::sleep(Duration::from_millis(wait.duration_ms)).await;
                Ok(json!({ "waited_ms": wait.duration_ms }))
            }
            ActionKind::UiInteraction(ui) => {
                tracing::warn!(
                    owner,
                    action = index,
                    interaction = %ui.interaction,
                    "ui interactions run only in generated browser scripts; recorded as not executed"
                );
                Ok(json!({ "interaction": ui.interaction.to_string(), "executed": false }))
            }
            ActionKind::ApiCall(request) => {
                let expected = request.expect_status;
                let response = call_backend(
                    Arc::clone(&self.backend),
                    ActionKind::ApiCall(request),
                    owner.to_string(),
                    index,
                )
                .await?;
                if let Some(expected) = expected {
                    let status = response.get("status").and_then(Value::as_u64);
                    if status != Some(u64::from(expected)) {
                        return Err(format!(
                            "expected status {}, got {}",
                            expected,
                            status.map_or_else(|| "none".to_string(), |s| s.to_string())
                        ));
                    }
                }
                Ok(response)
            }
            kind => call_backend(Arc::clone(&self.backend), kind, owner.to_string(), index).await,
        }
    }

    // ------------------------------------------------------------------
    // Assertions
    // ------------------------------------------------------------------

    async fn evaluate_assertions(&mut self) {
        let definition = self.definition;
        for (index, group) in definition.assertions.iter().enumerate() {
            let label = group
                .description()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} assertion", group.kind_name()));
            match self.check_assertion(group).await {
                Ok(true) => tracing::debug!(index, "assertion passed: {}", label),
                Ok(false) => tracing::debug!(index, "assertion skipped (browser only): {}", label),
                Err(message) => {
                    let message = format!("{}: {}", label, message);
                    tracing::warn!(index, "assertion failed: {}", message);
                    self.emit(RunEvent::AssertionFailed {
                        run_id: self.run_id.clone(),
                        index,
                        kind: group.kind_name().to_string(),
                        message: message.clone(),
                    });
                    self.errors
                        .push(RunError::new(format!("assertion[{}]", index), message));
                }
            }
        }
    }

    /// `Ok(true)` when evaluated and passed, `Ok(false)` when the group can
    /// only be evaluated by a generated browser script.
    async fn check_assertion(&self, group: &AssertionGroup) -> Result<bool, String> {
        match group {
            AssertionGroup::Database(db) => {
                let conditions: IndexMap<String, Value> = db
                    .conditions
                    .iter()
                    .map(|(column, v)| (column.clone(), resolver::resolve_value(v, &self.context)))
                    .collect();
                let rows = self.backend.query(&db.table, &conditions).await?;
                let found = rows.len() as u64;
                if found == db.expected_count {
                    Ok(true)
                } else {
                    Err(format!(
                        "expected {} row(s) in {}, found {}",
                        db.expected_count, db.table, found
                    ))
                }
            }
            AssertionGroup::Ui(_) => Ok(false),
            AssertionGroup::BusinessRule(br) => {
                let rule = resolve_typed(&br.rule, &self.context)?;
                let verdict = oracle::evaluate_rule(&rule)?;
                if verdict.passed {
                    Ok(true)
                } else {
                    Err(verdict.explanation)
                }
            }
            AssertionGroup::Variable(var) => {
                let actual = self
                    .context
                    .lookup(&var.path)
                    .ok_or_else(|| format!("variable '{}' is not set", var.path))?;
                match &var.equals {
                    None => Ok(true),
                    Some(expected) => {
                        let expected = resolver::resolve_value(expected, &self.context);
                        if values_match(actual, &expected) {
                            Ok(true)
                        } else {
                            Err(format!("'{}' is {}, expected {}", var.path, actual, expected))
                        }
                    }
                }
            }
        }
    }
}

/// Run one backend call on its own task. If the caller is dropped (step
/// timeout) the call still completes and its late result is logged.
async fn call_backend(
    port: Arc<dyn Backend>,
    kind: ActionKind,
    owner: String,
    index: usize,
) -> Result<Value, String> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = backend::dispatch(&port, kind).await;
        if tx.send(result).is_err() {
            tracing::warn!(
                owner = %owner,
                action = index,
                "backend call finished after its step gave up; result discarded"
            );
        }
    });
    rx.await
        .map_err(|_| "backend call aborted before completing".to_string())?
}

/// Resolve every template inside a typed value. Sole placeholders keep their
/// type when the target field accepts it, otherwise they are read as text.
fn resolve_typed<T: Serialize + DeserializeOwned>(value: &T, ctx: &RunContext) -> Result<T, String> {
    let raw = serde_json::to_value(value).map_err(|e| format!("cannot serialize payload: {}", e))?;
    let typed = resolver::resolve_value(&raw, ctx);
    match serde_json::from_value(typed) {
        Ok(resolved) => Ok(resolved),
        Err(_) => serde_json::from_value(resolver::resolve_text_value(&raw, ctx))
            .map_err(|e| format!("resolved payload is malformed: {}", e)),
    }
}

/// Oracle checks that gate a backend call.
fn precheck(kind: &ActionKind) -> Result<(), String> {
    if let Some(code) = kind.smart_code() {
        let verdict = smart_code::validate_smart_code(code);
        if !verdict.valid {
            return Err(verdict.describe());
        }
    }
    if let ActionKind::CreateTransaction(txn) = kind {
        for (i, item) in txn.line_items.iter().enumerate() {
            if let Some(code) = &item.smart_code {
                let verdict = smart_code::validate_smart_code(code);
                if !verdict.valid {
                    return Err(format!("line {}: {}", i, verdict.describe()));
                }
            }
        }
        if let Some(journal) = oracle::journal_from_line_items(&txn.line_items)? {
            let verdict = accounting::check_journal_balance(&journal, accounting::DEFAULT_TOLERANCE)?;
            if !verdict.valid {
                return Err(format!(
                    "journal does not balance: debits {} vs credits {} (difference {})",
                    verdict.total_debits, verdict.total_credits, verdict.difference
                ));
            }
        }
    }
    Ok(())
}

fn store_output(scope: &mut RunContext, action: &Action, output: &Value) {
    if let Some(name) = &action.store_as {
        if !scope.insert(name.clone(), output.clone()) {
            tracing::warn!(name = %name, "store_as name already bound; keeping the first value");
        }
    }
}

/// A step's output: its action outputs merged left to right.
fn consolidate(actions: &[ActionResult]) -> Value {
    let mut merged = Map::new();
    for result in actions {
        if let Value::Object(fields) = &result.output {
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

fn values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    let scalar = |v: &Value| v.is_string() || v.is_number() || v.is_boolean();
    scalar(actual) && scalar(expected) && value_to_string(actual) == value_to_string(expected)
}
