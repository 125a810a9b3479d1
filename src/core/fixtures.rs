//! Shared test definitions.

use super::types::TestDefinition;

/// A salon walk-in: register, book, take payment, verify.
pub const SALON_YAML: &str = r##"
version: "1.0"
id: salon-appointment-flow
title: Salon appointment to payment
industry: salon
context:
  tenant: hair-talkz
  organization_id: org-salon-001
  currency: AED
  locale: en-AE
  fiscal_year: 2024
  clock: "2024-01-01T09:00:00Z"
personas:
  receptionist:
    role: front_desk
    permissions: ["entities:create", "relationships:create"]
  stylist:
    role: service_provider
    permissions: ["dynamic_data:write"]
  cashier:
    role: finance
    permissions: ["transactions:create"]
setup:
  - type: create_entity
    entity_type: service
    entity_name: Haircut
    smart_code: HERA.SALON.SVC.ENT.HAIR.v1
    store_as: haircut
steps:
  - id: register_customer
    description: Receptionist registers a walk-in customer
    persona: receptionist
    actions:
      - type: ui_interaction
        interaction: click
        selector: "#new-customer"
      - type: create_entity
        entity_type: customer
        entity_name: Jane Doe
        smart_code: HERA.SALON.CRM.ENT.CUST.v1
        dynamic_fields:
          phone: "+971500000000"
        store_as: customer
  - id: book_appointment
    description: Customer is booked with the stylist
    persona: receptionist
    preconditions:
      - "{{customer.id}}"
    actions:
      - type: create_transaction
        transaction_type: appointment
        smart_code: HERA.SALON.APPT.TXN.BOOK.v1
        transaction_date: "{{clock+3600}}"
        source_entity_id: "{{register_customer.id}}"
        store_as: appointment
      - type: set_dynamic_field
        entity_id: "{{customer.id}}"
        field_name: last_booking
        field_value: "{{appointment.id}}"
        persona: stylist
  - id: take_payment
    description: Cashier takes payment for the service
    persona: cashier
    timeout: 5000
    actions:
      - type: create_transaction
        transaction_type: sale
        smart_code: HERA.SALON.POS.TXN.SALE.v1
        total_amount: 105
        source_entity_id: "{{customer.id}}"
        line_items:
          - line_type: debit
            line_amount: 105
            description: Cash
          - line_type: credit
            line_amount: 100
            entity_id: "{{haircut.id}}"
            description: Haircut revenue
          - line_type: credit
            line_amount: 5
            description: VAT
    postconditions:
      - "{{take_payment.id}}"
cleanup:
  - type: wait
    duration_ms: 1
assertions:
  - type: database
    description: one customer registered
    table: core_entities
    conditions:
      entity_type: customer
    expected_count: 1
  - type: business_rule
    description: VAT on the haircut
    rule: tax_calculation
    amount: 100
    rate: 0.05
    expected_tax: 5
  - type: ui
    description: receipt visible
    checks:
      - selector: "#receipt"
        visible: true
        text: "105.00"
  - type: variable
    path: customer.entity_name
    equals: Jane Doe
metadata:
  tags: [salon, pos]
  priority: high
  environments: [staging]
"##;

/// The salon definition, parsed and validated.
pub fn salon() -> TestDefinition {
    let raw = super::parser::parse_document(SALON_YAML, super::parser::DocumentFormat::Yaml)
        .expect("fixture parses");
    super::parser::parse_definition(&raw).expect("fixture validates")
}

/// A minimal definition built around the given steps YAML block.
pub fn with_steps(steps_yaml: &str) -> String {
    format!(
        r#"
version: "1.0"
id: minimal
title: Minimal
context:
  organization_id: org-1
  clock: "2024-01-01T00:00:00Z"
personas:
  owner:
    role: owner
steps:
{steps_yaml}
"#
    )
}
