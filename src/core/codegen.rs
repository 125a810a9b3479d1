//! FC-006: Artifact generation, dispatch to the format generators.
//!
//! Every target is a pure function of the definition: no backend, no wall
//! clock. Generating twice yields identical bytes.

use super::types::TestDefinition;
use crate::generators;
use std::fmt;
use std::str::FromStr;

/// Output format of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum TargetKind {
    /// Playwright browser script (TypeScript)
    Playwright,
    /// Jest data-level suite (TypeScript)
    Jest,
    /// pgTAP database checks (SQL)
    Pgtap,
    /// Natural-language instructions (Markdown)
    Agent,
}

impl TargetKind {
    pub const ALL: [TargetKind; 4] = [Self::Playwright, Self::Jest, Self::Pgtap, Self::Agent];

    /// File suffix for an artifact of this kind.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Playwright => "spec.ts",
            Self::Jest => "test.ts",
            Self::Pgtap => "sql",
            Self::Agent => "md",
        }
    }

    /// Default artifact file name for a definition.
    pub fn file_name(self, definition: &TestDefinition) -> String {
        format!("{}.{}", definition.id, self.file_extension())
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playwright => write!(f, "playwright"),
            Self::Jest => write!(f, "jest"),
            Self::Pgtap => write!(f, "pgtap"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown target '{}' (expected one of: playwright, jest, pgtap, agent)",
                    s
                )
            })
    }
}

/// Generate one artifact.
pub fn generate(definition: &TestDefinition, target: TargetKind) -> Result<String, String> {
    let artifact = match target {
        TargetKind::Playwright => generators::playwright::generate(definition),
        TargetKind::Jest => generators::jest::generate(definition),
        TargetKind::Pgtap => generators::pgtap::generate(definition),
        TargetKind::Agent => generators::agent::generate(definition),
    };
    artifact.map_err(|e| format!("{} generation failed for '{}': {}", target, definition.id, e))
}

/// Generate every target, in [`TargetKind::ALL`] order.
pub fn generate_all(definition: &TestDefinition) -> Result<Vec<(TargetKind, String)>, String> {
    TargetKind::ALL
        .into_iter()
        .map(|target| generate(definition, target).map(|artifact| (target, artifact)))
        .collect()
}
