//! FC-023: Status transitions.

use indexmap::IndexMap;
use serde::Serialize;

/// Status -> statuses it may move to.
pub type TransitionTable = IndexMap<String, Vec<String>>;

/// Verdict for one proposed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionVerdict {
    pub valid: bool,
    pub from: String,
    pub to: String,
    pub allowed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violated_rule: Option<String>,
}

/// Check `current -> proposed` against the table.
pub fn check_transition(current: &str, proposed: &str, table: &TransitionTable) -> TransitionVerdict {
    let allowed = table.get(current).cloned().unwrap_or_default();
    let violated_rule = if !table.contains_key(current) {
        Some(format!("no transitions are defined from '{current}'"))
    } else if !allowed.iter().any(|s| s == proposed) {
        Some(format!(
            "transition '{current}' -> '{proposed}' is not allowed (allowed: {})",
            if allowed.is_empty() {
                "none".to_string()
            } else {
                allowed.join(", ")
            }
        ))
    } else {
        None
    };
    TransitionVerdict {
        valid: violated_rule.is_none(),
        from: current.to_string(),
        to: proposed.to_string(),
        allowed,
        violated_rule,
    }
}
