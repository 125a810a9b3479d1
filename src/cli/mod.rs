//! FC-016: CLI subcommands: init, validate, run, generate, schema.

use crate::backend::memory::MemoryBackend;
use crate::backend::Backend;
use crate::core::codegen::{self, TargetKind};
use crate::core::executor::{self, RunOptions};
use crate::core::parser;
use crate::core::types::{RunResult, TestDefinition};
use crate::trace::hasher;
use clap::Subcommand;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Definition file used when none is given.
pub const DEFAULT_FILE: &str = "flowcheck.yaml";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter test definition
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate test definitions without running them
    Validate {
        /// Files or glob patterns (YAML, JSON or TOML)
        #[arg(default_value = DEFAULT_FILE)]
        files: Vec<String>,

        /// Print the validation reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a test definition against the in-memory backend
    Run {
        /// Path to the definition
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Resolve and record every action without executing it
        #[arg(long)]
        dry_run: bool,

        /// Keep running steps after a failure
        #[arg(long)]
        continue_on_error: bool,

        /// Ceiling for the whole run, in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Log progress at info level
        #[arg(short, long)]
        verbose: bool,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,

        /// Append run events to this JSONL file
        #[arg(long)]
        event_log: Option<PathBuf>,
    },

    /// Generate test artifacts for other runners
    Generate {
        /// Path to the definition
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Target format (default: every target)
        #[arg(short, long, value_enum)]
        target: Option<TargetKind>,

        /// Output file for one target, or directory for all targets.
        /// A single target without --output is printed to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the JSON Schema of a test definition
    Schema,
}

impl Commands {
    /// Whether the command asked for info-level logging.
    pub fn verbose(&self) -> bool {
        matches!(self, Commands::Run { verbose: true, .. })
    }
}

/// Install the stderr subscriber. `RUST_LOG` takes precedence.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { files, json } => cmd_validate(&files, json),
        Commands::Run {
            file,
            dry_run,
            continue_on_error,
            timeout,
            verbose,
            json,
            event_log,
        } => {
            let options = RunOptions {
                verbose,
                dry_run,
                continue_on_error,
                timeout_ms: timeout,
                event_log,
            };
            cmd_run(&file, &options, json)
        }
        Commands::Generate {
            file,
            target,
            output,
        } => cmd_generate(&file, target, output.as_deref()),
        Commands::Schema => cmd_schema(),
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
id: first-sale
title: First sale
industry: retail
context:
  organization_id: org-demo
  currency: USD
  clock: "2024-01-01T09:00:00Z"
personas:
  cashier:
    role: cashier
    permissions: ["entities:create", "transactions:create"]
steps:
  - id: register_customer
    description: Cashier registers the customer
    persona: cashier
    actions:
      - type: create_entity
        entity_type: customer
        entity_name: Sample Customer
        smart_code: HERA.RETAIL.CRM.ENT.CUST.v1
        store_as: customer
  - id: record_sale
    description: Cashier records a cash sale
    persona: cashier
    preconditions:
      - "{{customer.id}}"
    actions:
      - type: create_transaction
        transaction_type: sale
        smart_code: HERA.RETAIL.POS.TXN.SALE.v1
        transaction_date: "{{clock+60}}"
        source_entity_id: "{{customer.id}}"
        total_amount: 110
        line_items:
          - line_type: debit
            line_amount: 110
          - line_type: credit
            line_amount: 100
          - line_type: credit
            line_amount: 10
        store_as: sale
assertions:
  - type: database
    description: one customer registered
    table: core_entities
    conditions:
      entity_type: customer
    expected_count: 1
  - type: business_rule
    description: ten percent sales tax
    rule: tax_calculation
    amount: 100
    rate: 0.10
    expected_tax: 10
metadata:
  tags: [sample]
  priority: medium
policy:
  failure: stop_on_first
  always_cleanup: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let file = path.join(DEFAULT_FILE);
    if file.exists() {
        return Err(format!("{} already exists", file.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&file, INIT_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", file.display(), e))?;

    println!("Initialized flowcheck test at {}", path.display());
    println!("  Created: {}", file.display());
    Ok(())
}

/// Expand glob patterns; plain paths pass through even when missing so the
/// read error names them.
fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();
    for pattern in patterns {
        if !pattern.contains(['*', '?', '[']) {
            files.push(PathBuf::from(pattern));
            continue;
        }
        let matches = glob::glob(pattern).map_err(|e| format!("bad pattern '{}': {}", pattern, e))?;
        let before = files.len();
        for entry in matches {
            files.push(entry.map_err(|e| format!("cannot read match of '{}': {}", pattern, e))?);
        }
        if files.len() == before {
            return Err(format!("no files match '{}'", pattern));
        }
    }
    Ok(files)
}

fn cmd_validate(patterns: &[String], as_json: bool) -> Result<(), String> {
    let files = expand_patterns(patterns)?;
    let mut reports = Vec::with_capacity(files.len());
    let mut invalid = 0;

    for file in &files {
        let report = match parser::read_document(file) {
            Ok(raw) => match parser::parse_definition(&raw) {
                Ok(def) => {
                    if !as_json {
                        println!(
                            "OK: {} ({}, {} steps, {} actions)",
                            file.display(),
                            def.id,
                            def.steps.len(),
                            def.action_count()
                        );
                    }
                    json!({"file": file.display().to_string(), "valid": true, "errors": []})
                }
                Err(errors) => {
                    invalid += 1;
                    if !as_json {
                        eprintln!("INVALID: {} ({} error(s))", file.display(), errors.len());
                        for e in &errors {
                            eprintln!("  ERROR: {}", e);
                        }
                    }
                    json!({"file": file.display().to_string(), "valid": false, "errors": errors})
                }
            },
            Err(e) => {
                invalid += 1;
                if !as_json {
                    eprintln!("INVALID: {}", e);
                }
                json!({
                    "file": file.display().to_string(),
                    "valid": false,
                    "errors": [{"path": "", "message": e}],
                })
            }
        };
        reports.push(report);
    }

    if as_json {
        let text = serde_json::to_string_pretty(&reports)
            .map_err(|e| format!("cannot encode reports: {}", e))?;
        println!("{}", text);
    }
    if invalid > 0 {
        return Err(format!("{} of {} file(s) invalid", invalid, files.len()));
    }
    Ok(())
}

/// Execute a definition on a fresh runtime and memory backend.
pub fn execute_file(file: &Path, options: &RunOptions) -> Result<RunResult, String> {
    let definition = parser::parse_definition_file(file)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;
    let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
    Ok(runtime.block_on(executor::run(&definition, backend, options)))
}

fn cmd_run(file: &Path, options: &RunOptions, as_json: bool) -> Result<(), String> {
    let result = execute_file(file, options)?;

    if as_json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| format!("cannot encode result: {}", e))?;
        println!("{}", text);
    } else {
        print_result(&result);
    }

    if result.success {
        Ok(())
    } else {
        Err(format!("run failed with {} error(s)", result.errors.len()))
    }
}

fn print_result(result: &RunResult) {
    let mode = if result.dry_run { " (dry run)" } else { "" };
    println!("Run {}: {}{}", result.run_id, result.test_id, mode);
    if !result.setup.is_empty() {
        let ok = result.setup.iter().filter(|a| a.success).count();
        println!("  setup: {}/{} actions", ok, result.setup.len());
    }
    for step in &result.steps {
        let status = if step.success { "PASS" } else { "FAIL" };
        let attempts = if step.attempts > 1 {
            format!(", {} attempts", step.attempts)
        } else {
            String::new()
        };
        println!(
            "  {} {} ({:.3}s{})",
            status,
            step.step_id,
            step.duration.as_secs_f64(),
            attempts
        );
        if let Some(error) = &step.error {
            println!("       {}", error);
        }
    }
    if !result.cleanup.is_empty() {
        let ok = result.cleanup.iter().filter(|a| a.success).count();
        println!("  cleanup: {}/{} actions", ok, result.cleanup.len());
    }
    println!();
    for error in &result.errors {
        println!("  ERROR {}", error);
    }
    println!(
        "{}: {} passed, {} failed, {} error(s) in {:.3}s",
        if result.success { "PASSED" } else { "FAILED" },
        result.steps_passed(),
        result.steps_failed(),
        result.errors.len(),
        result.duration.as_secs_f64()
    );
}

fn write_artifact(path: &Path, text: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
    }
    std::fs::write(path, text).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
    println!("  wrote {} ({})", path.display(), hasher::hash_string(text));
    Ok(())
}

fn cmd_generate(file: &Path, target: Option<TargetKind>, output: Option<&Path>) -> Result<(), String> {
    let definition: TestDefinition = parser::parse_definition_file(file)?;
    match target {
        Some(kind) => {
            let artifact = codegen::generate(&definition, kind)?;
            match output {
                Some(path) => write_artifact(path, &artifact),
                None => {
                    print!("{}", artifact);
                    Ok(())
                }
            }
        }
        None => {
            let dir = output.unwrap_or_else(|| Path::new("generated"));
            println!("Generating {} for {} target(s)", definition.id, TargetKind::ALL.len());
            for (kind, artifact) in codegen::generate_all(&definition)? {
                write_artifact(&dir.join(kind.file_name(&definition)), &artifact)?;
            }
            Ok(())
        }
    }
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(TestDefinition);
    let text =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("cannot encode schema: {}", e))?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures;
    use crate::trace::eventlog;

    fn write_salon(dir: &Path) -> PathBuf {
        let file = dir.join("salon.yaml");
        std::fs::write(&file, fixtures::SALON_YAML).unwrap();
        file
    }

    #[test]
    fn test_fc016_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        cmd_init(&sub).unwrap();
        let file = sub.join(DEFAULT_FILE);
        assert!(file.exists());
        cmd_validate(&[file.display().to_string()], false).unwrap();
    }

    #[test]
    fn test_fc016_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_FILE), "exists").unwrap();
        let err = cmd_init(dir.path()).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_fc016_init_template_runs() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let result = execute_file(&dir.path().join(DEFAULT_FILE), &RunOptions::default()).unwrap();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.steps_passed(), 2);
    }

    #[test]
    fn test_fc016_validate_glob() {
        let dir = tempfile::tempdir().unwrap();
        write_salon(dir.path());
        std::fs::write(
            dir.path().join("second.json"),
            serde_json::to_string(&parser::parse_document(fixtures::SALON_YAML, parser::DocumentFormat::Yaml).unwrap())
                .unwrap(),
        )
        .unwrap();
        let pattern = format!("{}/*.*", dir.path().display());
        cmd_validate(&[pattern], false).unwrap();
        cmd_validate(&[format!("{}/*.yaml", dir.path().display())], true).unwrap();
    }

    #[test]
    fn test_fc016_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "version: \"2.0\"\nid: x\n").unwrap();
        let good = write_salon(dir.path());
        let err = cmd_validate(
            &[bad.display().to_string(), good.display().to_string()],
            false,
        )
        .unwrap_err();
        assert_eq!(err, "1 of 2 file(s) invalid");
    }

    #[test]
    fn test_fc016_validate_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_validate(&[format!("{}/*.yaml", dir.path().display())], false).unwrap_err();
        assert!(err.starts_with("no files match"));
    }

    #[test]
    fn test_fc016_validate_missing_file() {
        let err = cmd_validate(&["/nonexistent/flowcheck.yaml".to_string()], true).unwrap_err();
        assert_eq!(err, "1 of 1 file(s) invalid");
    }

    #[test]
    fn test_fc016_run_salon() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_salon(dir.path());
        cmd_run(&file, &RunOptions::default(), false).unwrap();
        cmd_run(&file, &RunOptions::default(), true).unwrap();
    }

    #[test]
    fn test_fc016_run_dry_with_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_salon(dir.path());
        let log = dir.path().join("logs").join("events.jsonl");
        let options = RunOptions {
            dry_run: true,
            event_log: Some(log.clone()),
            ..RunOptions::default()
        };
        cmd_run(&file, &options, false).unwrap();
        let events = eventlog::read_events(&log).unwrap();
        assert!(events.len() >= 8);
    }

    #[test]
    fn test_fc016_run_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("fail.yaml");
        let text = fixtures::with_steps(
            "  - id: link\n    persona: owner\n    actions:\n      - type: set_dynamic_field\n        entity_id: ent-missing\n        field_name: x\n        field_value: 1\n",
        );
        std::fs::write(&file, text).unwrap();
        let err = cmd_run(&file, &RunOptions::default(), false).unwrap_err();
        assert_eq!(err, "run failed with 1 error(s)");
    }

    #[test]
    fn test_fc016_generate_single_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_salon(dir.path());

        let single = dir.path().join("out").join("salon.sql");
        cmd_generate(&file, Some(TargetKind::Pgtap), Some(&single)).unwrap();
        assert!(std::fs::read_to_string(&single).unwrap().contains("SELECT plan(1);"));

        let all = dir.path().join("all");
        cmd_generate(&file, None, Some(&all)).unwrap();
        for kind in TargetKind::ALL {
            assert!(all.join(format!("salon-appointment-flow.{}", kind.file_extension())).exists());
        }
    }

    #[test]
    fn test_fc016_generate_invalid_definition() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(&file, "id: x\n").unwrap();
        let err = cmd_generate(&file, Some(TargetKind::Agent), None).unwrap_err();
        assert!(err.contains("is invalid"));
    }

    #[test]
    fn test_fc016_schema() {
        cmd_schema().unwrap();
        let schema = serde_json::to_value(schemars::schema_for!(TestDefinition)).unwrap();
        assert!(schema["properties"]["steps"].is_object());
    }

    #[test]
    fn test_fc016_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        dispatch(Commands::Init {
            path: dir.path().to_path_buf(),
        })
        .unwrap();
        let file = dir.path().join(DEFAULT_FILE);
        dispatch(Commands::Validate {
            files: vec![file.display().to_string()],
            json: false,
        })
        .unwrap();
        let cmd = Commands::Run {
            file: file.clone(),
            dry_run: true,
            continue_on_error: false,
            timeout: Some(10_000),
            verbose: true,
            json: false,
            event_log: None,
        };
        assert!(cmd.verbose());
        dispatch(cmd).unwrap();
        dispatch(Commands::Generate {
            file,
            target: Some(TargetKind::Agent),
            output: Some(dir.path().join("agent.md")),
        })
        .unwrap();
        assert!(!Commands::Schema.verbose());
    }
}
