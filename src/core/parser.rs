//! FC-002: Document parsing and schema validation.
//!
//! Reads YAML, JSON or TOML into a plain value tree, then validates it before
//! converting it into the typed IR:
//! - Required fields and field types per section and per action kind
//! - Fields foreign to an action kind are rejected
//! - Step ids and `store_as` names are unique, dot-free and never shadow
//!   the seeded context variables
//! - Persona references resolve
//! - Literal smart codes follow the grammar
//!
//! Validation reports every problem it finds, each with a path such as
//! `steps[1].actions[0].entity_type`.

use super::resolver;
use super::state;
use super::types::*;
use crate::oracle::smart_code;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Location in the document (`$` for the root)
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Outcome of `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Source document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Pick a format from the file extension (YAML when unknown).
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// Parse source text into a value tree.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Value, String> {
    match format {
        DocumentFormat::Yaml => {
            serde_yaml_ng::from_str(text).map_err(|e| format!("YAML parse error: {}", e))
        }
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| format!("JSON parse error: {}", e))
        }
        DocumentFormat::Toml => toml::from_str(text).map_err(|e| format!("TOML parse error: {}", e)),
    }
}

/// Read and parse a document from disk.
pub fn read_document(path: &Path) -> Result<Value, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_document(&content, DocumentFormat::from_path(path))
}

/// Read, validate and convert a definition file.
pub fn parse_definition_file(path: &Path) -> Result<TestDefinition, String> {
    let raw = read_document(path)?;
    parse_definition(&raw).map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(|e| format!("  {}", e)).collect();
        format!(
            "{} is invalid ({} error(s)):\n{}",
            path.display(),
            errors.len(),
            lines.join("\n")
        )
    })
}

/// Validate a raw document.
pub fn validate(raw: &Value) -> ValidationReport {
    let errors = Checker::default().check(raw);
    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

/// Validate, then convert into the typed IR.
pub fn parse_definition(raw: &Value) -> Result<TestDefinition, Vec<ValidationError>> {
    let errors = Checker::default().check(raw);
    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(raw.clone()).map_err(|e| {
        vec![ValidationError {
            path: "$".to_string(),
            message: format!("cannot convert document: {}", e),
        }]
    })
}

// ============================================================================
// Field tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    /// Non-empty string
    Str,
    /// Non-negative integer
    Int,
    /// Number, or string holding a number or template
    Number,
    /// Any string, possibly empty
    Text,
    Bool,
    Mapping,
    List,
    StrList,
    Any,
}

impl FieldType {
    fn describe(self) -> &'static str {
        match self {
            Self::Str => "a non-empty string",
            Self::Int => "a non-negative integer",
            Self::Number => "a number or template string",
            Self::Text => "a string",
            Self::Bool => "a boolean",
            Self::Mapping => "a mapping",
            Self::List => "a list",
            Self::StrList => "a list of strings",
            Self::Any => "any value",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Str => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Self::Int => value.as_u64().is_some(),
            Self::Number => value.is_number() || value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Self::Text => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Mapping => value.is_object(),
            Self::List => value.is_array(),
            Self::StrList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    ty: FieldType,
    required: bool,
}

const fn req(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: false,
    }
}

use FieldType::*;

const ROOT_FIELDS: &[FieldSpec] = &[
    opt("version", Str),
    req("id", Str),
    req("title", Str),
    opt("industry", Str),
    opt("description", Text),
    req("context", Mapping),
    req("personas", Mapping),
    opt("setup", List),
    req("steps", List),
    opt("cleanup", List),
    opt("assertions", List),
    opt("metadata", Mapping),
    opt("policy", Mapping),
];

const CONTEXT_FIELDS: &[FieldSpec] = &[
    opt("tenant", Str),
    req("organization_id", Str),
    opt("currency", Str),
    opt("locale", Str),
    opt("fiscal_year", Int),
    opt("clock", Str),
];

const PERSONA_FIELDS: &[FieldSpec] = &[req("role", Str), opt("permissions", StrList)];

const STEP_FIELDS: &[FieldSpec] = &[
    req("id", Str),
    opt("description", Text),
    req("persona", Str),
    req("actions", List),
    opt("preconditions", StrList),
    opt("postconditions", StrList),
    opt("timeout", Int),
    opt("retry", Int),
];

const ACTION_COMMON: &[FieldSpec] = &[
    req("type", Str),
    opt("persona", Str),
    opt("store_as", Str),
    opt("description", Text),
];

const ENTITY_FIELDS: &[FieldSpec] = &[
    req("entity_type", Str),
    req("entity_name", Str),
    opt("entity_code", Str),
    req("smart_code", Str),
    opt("dynamic_fields", Mapping),
    opt("metadata", Mapping),
];

const TRANSACTION_FIELDS: &[FieldSpec] = &[
    req("transaction_type", Str),
    req("smart_code", Str),
    opt("transaction_code", Str),
    opt("transaction_date", Str),
    opt("total_amount", Number),
    opt("source_entity_id", Str),
    opt("target_entity_id", Str),
    opt("line_items", List),
    opt("metadata", Mapping),
];

const LINE_ITEM_FIELDS: &[FieldSpec] = &[
    opt("line_type", Str),
    opt("entity_id", Str),
    opt("quantity", Number),
    opt("unit_price", Number),
    opt("line_amount", Number),
    opt("smart_code", Str),
    opt("description", Text),
];

const RELATIONSHIP_FIELDS: &[FieldSpec] = &[
    req("from_entity_id", Str),
    req("to_entity_id", Str),
    req("relationship_type", Str),
    req("smart_code", Str),
    opt("metadata", Mapping),
];

const DYNAMIC_FIELD_FIELDS: &[FieldSpec] = &[
    req("entity_id", Str),
    req("field_name", Str),
    req("field_value", Any),
    opt("smart_code", Str),
];

const UI_FIELDS: &[FieldSpec] = &[
    req("interaction", Str),
    opt("selector", Str),
    opt("value", Text),
    opt("url", Str),
];

const API_FIELDS: &[FieldSpec] = &[
    req("method", Str),
    req("endpoint", Str),
    opt("body", Any),
    opt("expect_status", Int),
];

const WAIT_FIELDS: &[FieldSpec] = &[req("duration_ms", Int)];

/// Action kinds and their payload fields.
const ACTION_KINDS: &[(&str, &[FieldSpec])] = &[
    ("create_entity", ENTITY_FIELDS),
    ("create_transaction", TRANSACTION_FIELDS),
    ("create_relationship", RELATIONSHIP_FIELDS),
    ("set_dynamic_field", DYNAMIC_FIELD_FIELDS),
    ("ui_interaction", UI_FIELDS),
    ("api_call", API_FIELDS),
    ("wait", WAIT_FIELDS),
];

const ASSERTION_COMMON: &[FieldSpec] = &[req("type", Str), opt("description", Text)];

const DATABASE_FIELDS: &[FieldSpec] = &[
    req("table", Str),
    opt("conditions", Mapping),
    req("expected_count", Int),
];

const UI_ASSERTION_FIELDS: &[FieldSpec] = &[req("checks", List)];

const UI_CHECK_FIELDS: &[FieldSpec] = &[
    req("selector", Str),
    opt("visible", Bool),
    opt("text", Text),
];

const VARIABLE_FIELDS: &[FieldSpec] = &[req("path", Str), opt("equals", Any)];

const ASSERTION_KINDS: &[(&str, &[FieldSpec])] = &[
    ("database", DATABASE_FIELDS),
    ("ui", UI_ASSERTION_FIELDS),
    ("business_rule", &[req("rule", Str)]),
    ("variable", VARIABLE_FIELDS),
];

/// Business rules and their operand fields.
const RULES: &[(&str, &[FieldSpec])] = &[
    (
        "accounting_equation",
        &[
            req("assets", Number),
            req("liabilities", Number),
            req("equity", Number),
            opt("tolerance", Number),
        ],
    ),
    ("journal_balance", &[req("lines", List), opt("tolerance", Number)]),
    (
        "tax_calculation",
        &[
            req("amount", Number),
            req("rate", Number),
            opt("inclusive", Bool),
            opt("expected_tax", Number),
            opt("expected_gross", Number),
        ],
    ),
    (
        "status_transition",
        &[req("from", Str), req("to", Str), req("transitions", Mapping)],
    ),
    ("smart_code", &[req("code", Str)]),
];

const JOURNAL_LINE_FIELDS: &[FieldSpec] = &[opt("debit", Number), opt("credit", Number)];

const METADATA_FIELDS: &[FieldSpec] = &[
    opt("tags", StrList),
    opt("priority", Str),
    opt("environments", StrList),
];

const POLICY_FIELDS: &[FieldSpec] = &[opt("failure", Str), opt("always_cleanup", Bool)];

fn lookup_kind<'t>(table: &'t [(&str, &'t [FieldSpec])], name: &str) -> Option<&'t [FieldSpec]> {
    table.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

fn kind_names(table: &[(&str, &[FieldSpec])]) -> String {
    table.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn index(path: &str, i: usize) -> String {
    format!("{}[{}]", path, i)
}

// ============================================================================
// Checker
// ============================================================================

#[derive(Default)]
struct Checker {
    errors: Vec<ValidationError>,
    personas: HashSet<String>,
    /// Step ids and store_as names seen so far
    names: HashSet<String>,
}

impl Checker {
    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn check(mut self, raw: &Value) -> Vec<ValidationError> {
        let Some(root) = raw.as_object() else {
            self.error("$", "document must be a mapping");
            return self.errors;
        };
        self.check_fields("", root, &[ROOT_FIELDS], "the document");

        if let Some(version) = root.get("version").and_then(Value::as_str) {
            if version != "1.0" {
                self.error("version", format!("version must be \"1.0\", got \"{}\"", version));
            }
        }

        if let Some(context) = root.get("context").and_then(Value::as_object) {
            self.check_context(context);
        }

        if let Some(personas) = root.get("personas").and_then(Value::as_object) {
            if personas.is_empty() {
                self.error("personas", "at least one persona is required");
            }
            for (name, persona) in personas {
                let path = join("personas", name);
                match persona.as_object() {
                    Some(obj) => self.check_fields(&path, obj, &[PERSONA_FIELDS], "a persona"),
                    None => self.error(path, "persona must be a mapping"),
                }
                self.personas.insert(name.clone());
            }
        }

        if let Some(setup) = root.get("setup").and_then(Value::as_array) {
            self.check_actions("setup", setup);
        }

        match root.get("steps").and_then(Value::as_array) {
            Some(steps) if steps.is_empty() => self.error("steps", "at least one step is required"),
            Some(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    self.check_step(&index("steps", i), step);
                }
            }
            None => {}
        }

        if let Some(cleanup) = root.get("cleanup").and_then(Value::as_array) {
            self.check_actions("cleanup", cleanup);
        }

        if let Some(assertions) = root.get("assertions").and_then(Value::as_array) {
            for (i, group) in assertions.iter().enumerate() {
                self.check_assertion(&index("assertions", i), group);
            }
        }

        if let Some(metadata) = root.get("metadata").and_then(Value::as_object) {
            self.check_fields("metadata", metadata, &[METADATA_FIELDS], "metadata");
            self.check_enum("metadata.priority", metadata.get("priority"), Priority::NAMES);
        }

        if let Some(policy) = root.get("policy").and_then(Value::as_object) {
            self.check_fields("policy", policy, &[POLICY_FIELDS], "policy");
            self.check_enum("policy.failure", policy.get("failure"), FailurePolicy::NAMES);
        }

        self.errors
    }

    /// Required fields, field types and unknown fields of one mapping.
    fn check_fields(&mut self, path: &str, obj: &Map<String, Value>, specs: &[&[FieldSpec]], owner: &str) {
        for spec in specs.iter().flat_map(|s| s.iter()) {
            let field_path = join(path, spec.name);
            match obj.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    self.error(field_path, format!("missing required field '{}'", spec.name));
                }
                None => {}
                Some(Value::Null) if spec.ty == FieldType::Any => {}
                Some(Value::Null) => {
                    self.error(field_path, format!("'{}' must be {}, not null", spec.name, spec.ty.describe()));
                }
                Some(value) if !spec.ty.accepts(value) => {
                    self.error(field_path, format!("'{}' must be {}", spec.name, spec.ty.describe()));
                }
                Some(_) => {}
            }
        }
        for key in obj.keys() {
            let known = specs.iter().flat_map(|s| s.iter()).any(|s| s.name == key);
            if !known {
                self.error(join(path, key), format!("field '{}' is not allowed for {}", key, owner));
            }
        }
    }

    fn check_enum(&mut self, path: &str, value: Option<&Value>, allowed: &[&str]) {
        if let Some(s) = value.and_then(Value::as_str) {
            if !allowed.contains(&s) {
                self.error(path, format!("'{}' is not one of: {}", s, allowed.join(", ")));
            }
        }
    }

    fn check_context(&mut self, context: &Map<String, Value>) {
        self.check_fields("context", context, &[CONTEXT_FIELDS], "the context");
        if let Some(clock) = context.get("clock").and_then(Value::as_str) {
            if !resolver::is_valid_clock(clock) {
                self.error("context.clock", format!("'{}' is not an RFC 3339 timestamp", clock));
            }
        }
    }

    fn check_persona_ref(&mut self, path: String, persona: Option<&Value>) {
        if let Some(name) = persona.and_then(Value::as_str) {
            if !self.personas.contains(name) {
                self.error(path, format!("unknown persona '{}'", name));
            }
        }
    }

    fn claim_name(&mut self, path: String, name: &str, what: &str) {
        if name.contains('.') {
            self.error(path, format!("{} '{}' must not contain '.'", what, name));
        } else if state::SEEDED_NAMES.contains(&name) {
            self.error(path, format!("{} '{}' shadows a seeded context variable", what, name));
        } else if !self.names.insert(name.to_string()) {
            self.error(path, format!("{} '{}' collides with an earlier step id or store_as name", what, name));
        }
    }

    fn check_step(&mut self, path: &str, step: &Value) {
        let Some(obj) = step.as_object() else {
            self.error(path, "step must be a mapping");
            return;
        };
        self.check_fields(path, obj, &[STEP_FIELDS], "a step");

        if let Some(id) = obj.get("id").and_then(Value::as_str) {
            self.claim_name(join(path, "id"), id, "step id");
        }
        self.check_persona_ref(join(path, "persona"), obj.get("persona"));

        if let Some(timeout) = obj.get("timeout").and_then(Value::as_u64) {
            if timeout == 0 {
                self.error(join(path, "timeout"), "timeout must be greater than zero");
            }
        }
        if let Some(retry) = obj.get("retry").and_then(Value::as_u64) {
            if retry > u64::from(MAX_STEP_RETRY) {
                self.error(join(path, "retry"), format!("retry must be at most {}", MAX_STEP_RETRY));
            }
        }

        if let Some(actions) = obj.get("actions").and_then(Value::as_array) {
            if actions.is_empty() {
                self.error(join(path, "actions"), "a step needs at least one action");
            }
            self.check_actions(&join(path, "actions"), actions);
        }
    }

    fn check_actions(&mut self, path: &str, actions: &[Value]) {
        for (i, action) in actions.iter().enumerate() {
            self.check_action(&index(path, i), action);
        }
    }

    fn check_action(&mut self, path: &str, action: &Value) {
        let Some(obj) = action.as_object() else {
            self.error(path, "action must be a mapping");
            return;
        };
        let Some(kind) = obj.get("type").and_then(Value::as_str) else {
            self.error(join(path, "type"), "missing required field 'type'");
            return;
        };
        let Some(fields) = lookup_kind(ACTION_KINDS, kind) else {
            self.error(
                join(path, "type"),
                format!("unknown action type '{}' (expected one of: {})", kind, kind_names(ACTION_KINDS)),
            );
            return;
        };

        self.check_fields(path, obj, &[ACTION_COMMON, fields], &format!("action type '{}'", kind));
        self.check_persona_ref(join(path, "persona"), obj.get("persona"));
        if let Some(name) = obj.get("store_as").and_then(Value::as_str) {
            self.claim_name(join(path, "store_as"), name, "store_as name");
        }
        self.check_literal_smart_code(&join(path, "smart_code"), obj.get("smart_code"));

        match kind {
            "create_transaction" => {
                if let Some(items) = obj.get("line_items").and_then(Value::as_array) {
                    for (i, item) in items.iter().enumerate() {
                        let item_path = index(&join(path, "line_items"), i);
                        match item.as_object() {
                            Some(item_obj) => {
                                self.check_fields(&item_path, item_obj, &[LINE_ITEM_FIELDS], "a line item");
                                self.check_enum(&join(&item_path, "line_type"), item_obj.get("line_type"), &["debit", "credit"]);
                                self.check_literal_smart_code(&join(&item_path, "smart_code"), item_obj.get("smart_code"));
                            }
                            None => self.error(item_path, "line item must be a mapping"),
                        }
                    }
                }
            }
            "ui_interaction" => self.check_ui_action(path, obj),
            "api_call" => {
                self.check_enum(&join(path, "method"), obj.get("method"), HttpMethod::NAMES);
                if let Some(status) = obj.get("expect_status").and_then(Value::as_u64) {
                    if !(100..=599).contains(&status) {
                        self.error(join(path, "expect_status"), format!("{} is not an HTTP status", status));
                    }
                }
            }
            _ => {}
        }
    }

    fn check_ui_action(&mut self, path: &str, obj: &Map<String, Value>) {
        let Some(interaction) = obj.get("interaction").and_then(Value::as_str) else {
            return;
        };
        if !UiInteraction::NAMES.contains(&interaction) {
            self.check_enum(&join(path, "interaction"), obj.get("interaction"), UiInteraction::NAMES);
            return;
        }
        let needs: &[&str] = match interaction {
            "navigate" => &["url"],
            "fill" | "select" | "press" => &["selector", "value"],
            _ => &["selector"],
        };
        for field in needs {
            if obj.get(*field).is_none() {
                self.error(
                    join(path, field),
                    format!("ui_interaction '{}' requires '{}'", interaction, field),
                );
            }
        }
    }

    /// Smart codes written literally must follow the grammar. Template values
    /// are checked at run time after resolution.
    fn check_literal_smart_code(&mut self, path: &str, value: Option<&Value>) {
        let Some(code) = value.and_then(Value::as_str) else {
            return;
        };
        if code.trim().is_empty() || resolver::has_placeholder(code) {
            return;
        }
        let verdict = smart_code::validate_smart_code(code);
        if !verdict.valid {
            self.error(path, verdict.describe());
        }
    }

    fn check_assertion(&mut self, path: &str, group: &Value) {
        let Some(obj) = group.as_object() else {
            self.error(path, "assertion group must be a mapping");
            return;
        };
        let Some(kind) = obj.get("type").and_then(Value::as_str) else {
            self.error(join(path, "type"), "missing required field 'type'");
            return;
        };
        let Some(fields) = lookup_kind(ASSERTION_KINDS, kind) else {
            self.error(
                join(path, "type"),
                format!("unknown assertion type '{}' (expected one of: {})", kind, kind_names(ASSERTION_KINDS)),
            );
            return;
        };

        if kind != "business_rule" {
            self.check_fields(path, obj, &[ASSERTION_COMMON, fields], &format!("assertion type '{}'", kind));
        }

        match kind {
            "ui" => {
                if let Some(checks) = obj.get("checks").and_then(Value::as_array) {
                    if checks.is_empty() {
                        self.error(join(path, "checks"), "a ui assertion needs at least one check");
                    }
                    for (i, check) in checks.iter().enumerate() {
                        let check_path = index(&join(path, "checks"), i);
                        match check.as_object() {
                            Some(c) => self.check_fields(&check_path, c, &[UI_CHECK_FIELDS], "a ui check"),
                            None => self.error(check_path, "ui check must be a mapping"),
                        }
                    }
                }
            }
            "business_rule" => self.check_rule(path, obj, fields),
            _ => {}
        }
    }

    fn check_rule(&mut self, path: &str, obj: &Map<String, Value>, common: &[FieldSpec]) {
        let Some(rule) = obj.get("rule").and_then(Value::as_str) else {
            self.check_fields(path, obj, &[ASSERTION_COMMON, common], "a business rule");
            return;
        };
        let Some(operands) = lookup_kind(RULES, rule) else {
            self.error(
                join(path, "rule"),
                format!("unknown rule '{}' (expected one of: {})", rule, kind_names(RULES)),
            );
            return;
        };
        self.check_fields(path, obj, &[ASSERTION_COMMON, common, operands], &format!("rule '{}'", rule));

        match rule {
            "journal_balance" => {
                if let Some(lines) = obj.get("lines").and_then(Value::as_array) {
                    for (i, line) in lines.iter().enumerate() {
                        let line_path = index(&join(path, "lines"), i);
                        match line.as_object() {
                            Some(l) => self.check_fields(&line_path, l, &[JOURNAL_LINE_FIELDS], "a journal line"),
                            None => self.error(line_path, "journal line must be a mapping"),
                        }
                    }
                }
            }
            "status_transition" => {
                if let Some(table) = obj.get("transitions").and_then(Value::as_object) {
                    for (status, targets) in table {
                        if !FieldType::StrList.accepts(targets) {
                            self.error(
                                join(&join(path, "transitions"), status),
                                "allowed transitions must be a list of strings",
                            );
                        }
                    }
                }
            }
            "smart_code" => {
                // The rule itself reports a malformed code at run time.
            }
            _ => {}
        }
    }
}
