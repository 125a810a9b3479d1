//! Benchmarks for flowcheck core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flowcheck::core::codegen::{self, TargetKind};
use flowcheck::core::parser::{self, DocumentFormat};
use flowcheck::core::resolver;
use flowcheck::core::state::RunContext;
use flowcheck::trace::hasher;
use serde_json::json;

fn definition_yaml(steps: usize) -> String {
    let mut yaml = String::from(
        r#"
version: "1.0"
id: bench-flow
title: Bench flow
context:
  organization_id: org-bench
  clock: "2024-01-01T00:00:00Z"
personas:
  clerk:
    role: clerk
steps:
"#,
    );
    for i in 0..steps {
        yaml.push_str(&format!(
            r#"  - id: step_{i}
    persona: clerk
    actions:
      - type: create_entity
        entity_type: customer
        entity_name: "Customer {i}"
        smart_code: HERA.BENCH.CRM.ENT.CUST.v1
        store_as: customer_{i}
      - type: create_transaction
        transaction_type: sale
        smart_code: HERA.BENCH.POS.TXN.SALE.v1
        transaction_date: "{{{{clock+{i}}}}}"
        source_entity_id: "{{{{customer_{i}.id}}}}"
        line_items:
          - line_type: debit
            line_amount: 100
          - line_type: credit
            line_amount: 100
"#
        ));
    }
    yaml
}

fn bench_parse_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_validate");
    for steps in [1, 10, 50] {
        let yaml = definition_yaml(steps);
        group.bench_with_input(BenchmarkId::from_parameter(steps), &yaml, |b, yaml| {
            b.iter(|| {
                let raw = parser::parse_document(black_box(yaml), DocumentFormat::Yaml).unwrap();
                black_box(parser::parse_definition(&raw).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let raw = parser::parse_document(&definition_yaml(20), DocumentFormat::Yaml).unwrap();
    let definition = parser::parse_definition(&raw).unwrap();
    c.bench_function("fingerprint_20_steps", |b| {
        b.iter(|| black_box(hasher::fingerprint(black_box(&definition)).unwrap()));
    });
}

fn bench_resolve(c: &mut Criterion) {
    let mut ctx = RunContext::new();
    ctx.insert("clock", json!("2024-01-01T00:00:00Z"));
    for i in 0..50 {
        ctx.insert(format!("customer_{i}"), json!({"id": format!("ent-{i:06}"), "name": "x"}));
    }
    let payload = json!({
        "source_entity_id": "{{customer_42.id}}",
        "transaction_date": "{{clock+3600}}",
        "memo": "for {{customer_7.name}} ({{customer_7.id}})",
        "lines": [{"entity_id": "{{customer_1.id}}"}, {"entity_id": "{{missing.id}}"}],
    });
    c.bench_function("resolve_payload", |b| {
        b.iter(|| black_box(resolver::resolve_value(black_box(&payload), &ctx)));
    });
}

fn bench_generate(c: &mut Criterion) {
    let raw = parser::parse_document(&definition_yaml(10), DocumentFormat::Yaml).unwrap();
    let definition = parser::parse_definition(&raw).unwrap();
    let mut group = c.benchmark_group("generate");
    for target in TargetKind::ALL {
        group.bench_with_input(
            BenchmarkId::from_parameter(target),
            &definition,
            |b, definition| {
                b.iter(|| black_box(codegen::generate(black_box(definition), target).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_validate,
    bench_fingerprint,
    bench_resolve,
    bench_generate
);
criterion_main!(benches);
