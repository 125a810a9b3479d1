//! FC-001: Test definition IR and run result types.
//!
//! Defines the document schema for personas, context, steps, actions and
//! assertion groups, plus the run result and run-event types. Document types
//! derive Serialize/Deserialize/JsonSchema so the IR can round-trip through
//! the value tree the resolver works on.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Step timeout applied when a step omits `timeout`.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for a step's `retry` count.
pub const MAX_STEP_RETRY: u32 = 10;

// ============================================================================
// Top-level test definition
// ============================================================================

/// Root of the IR: one business-process test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestDefinition {
    /// Schema version (must be "1.0")
    #[serde(default = "default_version")]
    pub version: String,

    /// Unique test identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// Industry tag (salon, restaurant, retail, ...)
    #[serde(default = "default_industry")]
    pub industry: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tenant, organization and clock for the run
    pub context: TestContext,

    /// Persona name -> role and permissions (order-preserving)
    pub personas: IndexMap<String, Persona>,

    /// Actions executed before the first step
    #[serde(default)]
    pub setup: Vec<Action>,

    /// Ordered steps
    pub steps: Vec<Step>,

    /// Actions executed after the steps
    #[serde(default)]
    pub cleanup: Vec<Action>,

    /// Assertion groups evaluated after the steps
    #[serde(default)]
    pub assertions: Vec<AssertionGroup>,

    /// Tags, priority and supported environments
    #[serde(default)]
    pub metadata: Metadata,

    /// Failure and cleanup policy
    #[serde(default)]
    pub policy: Policy,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_industry() -> String {
    "general".to_string()
}

impl TestDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The persona an action is attributed to: its own, else the step's.
    pub fn action_persona<'a>(&'a self, step: &'a Step, action: &'a Action) -> &'a str {
        action.persona.as_deref().unwrap_or(&step.persona)
    }

    /// Total number of actions across setup, steps and cleanup.
    pub fn action_count(&self) -> usize {
        self.setup.len()
            + self.steps.iter().map(|s| s.actions.len()).sum::<usize>()
            + self.cleanup.len()
    }
}

/// Run context declared by the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestContext {
    /// Tenant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Organization every record is scoped to
    pub organization_id: String,

    /// ISO currency code
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Locale tag
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Fiscal year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<i32>,

    /// Simulated clock (RFC 3339) used by `{{timestamp}}` and `{{clock+N}}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_locale() -> String {
    "en-US".to_string()
}

/// A named role actions are attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Persona {
    pub role: String,

    #[serde(default)]
    pub permissions: Vec<String>,
}

// ============================================================================
// Steps
// ============================================================================

/// Ordered unit of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Unique step id; outputs are stored under it
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Owning persona
    pub persona: String,

    /// Actions executed in order
    pub actions: Vec<Action>,

    /// Conditions that must hold before the step runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<String>,

    /// Conditions that must hold after the step's actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postconditions: Vec<String>,

    /// Wall-clock budget for one attempt, in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Extra attempts after a failure
    #[serde(default)]
    pub retry: u32,
}

fn default_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

impl Step {
    /// Timeout as a `Duration`.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// One action: a kind-specific payload plus common attribution fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,

    /// Persona override (defaults to the step's persona)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Store the action output in the run context under this name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The seven action kinds. Each variant owns its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    CreateEntity(EntityPayload),
    CreateTransaction(TransactionPayload),
    CreateRelationship(RelationshipPayload),
    SetDynamicField(DynamicFieldPayload),
    UiInteraction(UiPayload),
    ApiCall(ApiPayload),
    Wait(WaitPayload),
}

impl ActionKind {
    /// Document name of the kind (the `type:` tag).
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateEntity(_) => "create_entity",
            Self::CreateTransaction(_) => "create_transaction",
            Self::CreateRelationship(_) => "create_relationship",
            Self::SetDynamicField(_) => "set_dynamic_field",
            Self::UiInteraction(_) => "ui_interaction",
            Self::ApiCall(_) => "api_call",
            Self::Wait(_) => "wait",
        }
    }

    /// Smart code carried by the payload, if the kind has one.
    pub fn smart_code(&self) -> Option<&str> {
        match self {
            Self::CreateEntity(p) => Some(&p.smart_code),
            Self::CreateTransaction(p) => Some(&p.smart_code),
            Self::CreateRelationship(p) => Some(&p.smart_code),
            Self::SetDynamicField(p) => p.smart_code.as_deref(),
            Self::UiInteraction(_) | Self::ApiCall(_) | Self::Wait(_) => None,
        }
    }

    /// Whether executing this kind contacts the backend.
    pub fn is_backend_call(&self) -> bool {
        !matches!(self, Self::UiInteraction(_) | Self::Wait(_))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `create_entity` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityPayload {
    pub entity_type: String,
    pub entity_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_code: Option<String>,
    pub smart_code: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dynamic_fields: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `create_transaction` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransactionPayload {
    pub transaction_type: String,
    pub smart_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    /// Number or template string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// One transaction line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_type: Option<LineType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Journal side of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Debit,
    Credit,
}

/// `create_relationship` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RelationshipPayload {
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub relationship_type: String,
    pub smart_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `set_dynamic_field` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DynamicFieldPayload {
    pub entity_id: String,
    pub field_name: String,
    pub field_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_code: Option<String>,
}

/// `ui_interaction` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UiPayload {
    pub interaction: UiInteraction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Browser interaction verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UiInteraction {
    Navigate,
    Click,
    Fill,
    Select,
    Check,
    Press,
}

impl UiInteraction {
    pub const NAMES: &'static [&'static str] =
        &["navigate", "click", "fill", "select", "check", "press"];
}

impl fmt::Display for UiInteraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigate => write!(f, "navigate"),
            Self::Click => write!(f, "click"),
            Self::Fill => write!(f, "fill"),
            Self::Select => write!(f, "select"),
            Self::Check => write!(f, "check"),
            Self::Press => write!(f, "press"),
        }
    }
}

/// `api_call` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApiPayload {
    pub method: HttpMethod,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,
}

/// HTTP method of an `api_call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const NAMES: &'static [&'static str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// `wait` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WaitPayload {
    pub duration_ms: u64,
}

// ============================================================================
// Assertion groups
// ============================================================================

/// Checks evaluated after the steps have run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionGroup {
    Database(DatabaseAssertion),
    Ui(UiAssertion),
    BusinessRule(BusinessRuleAssertion),
    Variable(VariableAssertion),
}

impl AssertionGroup {
    /// Document name of the group kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Ui(_) => "ui",
            Self::BusinessRule(_) => "business_rule",
            Self::Variable(_) => "variable",
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Database(a) => a.description.as_deref(),
            Self::Ui(a) => a.description.as_deref(),
            Self::BusinessRule(a) => a.description.as_deref(),
            Self::Variable(a) => a.description.as_deref(),
        }
    }
}

/// Row-count check against one backend table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseAssertion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub table: String,
    /// Column -> expected value (templates allowed)
    #[serde(default)]
    pub conditions: IndexMap<String, Value>,
    pub expected_count: u64,
}

/// Browser-side checks, only executable by generated scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UiAssertion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub checks: Vec<UiCheck>,
}

/// One element check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UiCheck {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Business rule evaluated by an oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BusinessRuleAssertion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub rule: BusinessRule,
}

/// Oracle-backed rules. Numeric operands are numbers or template strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BusinessRule {
    AccountingEquation {
        assets: Value,
        liabilities: Value,
        equity: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<Value>,
    },
    JournalBalance {
        lines: Vec<JournalLineSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<Value>,
    },
    TaxCalculation {
        amount: Value,
        rate: Value,
        #[serde(default)]
        inclusive: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_tax: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_gross: Option<Value>,
    },
    StatusTransition {
        from: String,
        to: String,
        transitions: IndexMap<String, Vec<String>>,
    },
    SmartCode {
        code: String,
    },
}

impl BusinessRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountingEquation { .. } => "accounting_equation",
            Self::JournalBalance { .. } => "journal_balance",
            Self::TaxCalculation { .. } => "tax_calculation",
            Self::StatusTransition { .. } => "status_transition",
            Self::SmartCode { .. } => "smart_code",
        }
    }
}

/// Debit/credit pair inside a `journal_balance` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JournalLineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit: Option<Value>,
}

/// Check against the final run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VariableAssertion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `name` or `name.path`
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
}

// ============================================================================
// Metadata and policy
// ============================================================================

/// Descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Metadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Test priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const NAMES: &'static [&'static str] = &["low", "medium", "high", "critical"];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Execution policy declared by the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Run cleanup even after a halting failure
    #[serde(default = "default_true")]
    pub always_cleanup: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            always_cleanup: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    Continue,
}

impl FailurePolicy {
    pub const NAMES: &'static [&'static str] = &["stop_on_first", "continue"];
}

// ============================================================================
// Run results
// ============================================================================

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub index: usize,
    pub kind: String,
    pub success: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Payload after template resolution
    pub resolved: Value,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one step (last attempt).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub attempts: u32,
    pub actions: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An error recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    /// Where it happened: `setup`, `step:<id>`, `assertion[<n>]`, `cleanup`
    pub source: String,
    pub message: String,
}

impl RunError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Complete record of one run. Always produced, even on total failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub test_id: String,
    /// BLAKE3 fingerprint of the definition that ran
    pub fingerprint: String,
    pub success: bool,
    pub dry_run: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub setup: Vec<ActionResult>,
    pub steps: Vec<StepResult>,
    pub cleanup: Vec<ActionResult>,
    pub errors: Vec<RunError>,
}

impl RunResult {
    pub fn steps_passed(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }

    pub fn steps_failed(&self) -> usize {
        self.steps.iter().filter(|s| !s.success).count()
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Event appended to the JSONL run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        test_id: String,
        dry_run: bool,
        flowcheck_version: String,
    },
    PhaseCompleted {
        run_id: String,
        phase: String,
        actions: u32,
        success: bool,
    },
    StepStarted {
        run_id: String,
        step: String,
        attempt: u32,
    },
    StepPassed {
        run_id: String,
        step: String,
        attempt: u32,
        duration_seconds: f64,
    },
    StepFailed {
        run_id: String,
        step: String,
        attempt: u32,
        error: String,
    },
    AssertionFailed {
        run_id: String,
        index: usize,
        kind: String,
        message: String,
    },
    RunCompleted {
        run_id: String,
        steps_passed: u32,
        steps_failed: u32,
        errors: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Render a value as template text: strings verbatim, scalars via Display,
/// containers as compact JSON.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fc001_definition_parse() {
        let def: TestDefinition = serde_yaml_ng::from_str(crate::core::fixtures::SALON_YAML).unwrap();
        assert_eq!(def.id, "salon-appointment-flow");
        assert_eq!(def.industry, "salon");
        assert_eq!(def.personas.len(), 3);
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.setup.len(), 1);
        assert_eq!(def.assertions.len(), 4);
        assert_eq!(def.metadata.priority, Priority::High);
    }

    #[test]
    fn test_fc001_step_defaults() {
        let yaml = r#"
id: s1
persona: owner
actions:
  - type: wait
    duration_ms: 5
"#;
        let step: Step = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.timeout, DEFAULT_STEP_TIMEOUT_MS);
        assert_eq!(step.retry, 0);
        assert_eq!(step.description, "");
        assert_eq!(step.timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_fc001_context_defaults() {
        let ctx: TestContext = serde_yaml_ng::from_str("organization_id: org-1").unwrap();
        assert_eq!(ctx.currency, "USD");
        assert_eq!(ctx.locale, "en-US");
        assert!(ctx.clock.is_none());
    }

    #[test]
    fn test_fc001_action_tagged_variant() {
        let yaml = r#"
type: create_relationship
from_entity_id: a
to_entity_id: b
relationship_type: assigned_to
smart_code: HERA.SALON.REL.STAFF.ASSIGN.v1
store_as: link
"#;
        let action: Action = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(action.kind.name(), "create_relationship");
        assert_eq!(action.store_as.as_deref(), Some("link"));
        assert_eq!(action.kind.smart_code(), Some("HERA.SALON.REL.STAFF.ASSIGN.v1"));
        match action.kind {
            ActionKind::CreateRelationship(p) => assert_eq!(p.to_entity_id, "b"),
            other => panic!("unexpected kind {}", other),
        }
    }

    #[test]
    fn test_fc001_action_serializes_tag_first() {
        let action = Action {
            kind: ActionKind::Wait(WaitPayload { duration_ms: 10 }),
            persona: None,
            store_as: None,
            description: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value, json!({"type": "wait", "duration_ms": 10}));
        let text = serde_json::to_string(&action).unwrap();
        assert!(text.starts_with("{\"type\":\"wait\""));
    }

    #[test]
    fn test_fc001_unknown_kind_rejected_by_serde() {
        let result: Result<Action, _> = serde_json::from_value(json!({"type": "teleport"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_fc001_backend_call_classification() {
        let wait = ActionKind::Wait(WaitPayload { duration_ms: 1 });
        assert!(!wait.is_backend_call());
        let api = ActionKind::ApiCall(ApiPayload {
            method: HttpMethod::Get,
            endpoint: "/health".into(),
            body: None,
            expect_status: Some(200),
        });
        assert!(api.is_backend_call());
        assert_eq!(api.to_string(), "api_call");
    }

    #[test]
    fn test_fc001_business_rule_flattened() {
        let yaml = r#"
type: business_rule
description: books balance
rule: accounting_equation
assets: 100
liabilities: 40
equity: "{{equity}}"
"#;
        let group: AssertionGroup = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(group.kind_name(), "business_rule");
        assert_eq!(group.description(), Some("books balance"));
        match group {
            AssertionGroup::BusinessRule(a) => {
                assert_eq!(a.rule.name(), "accounting_equation");
            }
            _ => panic!("expected business rule"),
        }
    }

    #[test]
    fn test_fc001_policy_defaults() {
        let p = Policy::default();
        assert_eq!(p.failure, FailurePolicy::StopOnFirst);
        assert!(p.always_cleanup);
    }

    #[test]
    fn test_fc001_display_impls() {
        assert_eq!(UiInteraction::Fill.to_string(), "fill");
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
        assert_eq!(Priority::Critical.to_string(), "critical");
        assert_eq!(
            RunError::new("step:pay", "boom").to_string(),
            "step:pay: boom"
        );
    }

    #[test]
    fn test_fc001_run_event_serde() {
        let event = RunEvent::StepStarted {
            run_id: "r-abc".to_string(),
            step: "pay".to_string(),
            attempt: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"step_started\""));
        assert!(json.contains("\"run_id\":\"r-abc\""));
    }

    #[test]
    fn test_fc001_step_result_duration_ms() {
        let result = StepResult {
            step_id: "a".into(),
            success: true,
            duration: Duration::from_millis(1500),
            attempts: 1,
            actions: vec![],
            error: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["duration_ms"], json!(1500.0));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_fc001_value_to_string() {
        assert_eq!(value_to_string(&json!("hello")), "hello");
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!({"a": 1})), "{\"a\":1}");
    }
}
