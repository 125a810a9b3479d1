//! FC-024: Smart code grammar.
//!
//! A smart code is five uppercase dot-separated segments followed by a
//! version segment: `HERA.SALON.CRM.ENT.CUST.v1`.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Number of segments before the version.
pub const SEGMENT_COUNT: usize = 5;

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9_]*$").expect("static segment pattern"))
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v([0-9]+)$").expect("static version pattern"))
}

/// A single grammar violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum SmartCodeIssue {
    InsufficientSegments { found: usize, expected: usize },
    TooManySegments { found: usize, expected: usize },
    EmptySegment { index: usize },
    InvalidSegment { index: usize, segment: String },
    InvalidVersion { segment: String },
}

impl fmt::Display for SmartCodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSegments { found, expected } => write!(
                f,
                "insufficient segments: found {found}, expected {expected}"
            ),
            Self::TooManySegments { found, expected } => {
                write!(f, "too many segments: found {found}, expected {expected}")
            }
            Self::EmptySegment { index } => write!(f, "segment {index} is empty"),
            Self::InvalidSegment { index, segment } => write!(
                f,
                "segment {index} '{segment}' must be uppercase letters, digits or '_'"
            ),
            Self::InvalidVersion { segment } => {
                write!(f, "invalid version '{segment}', expected v<number>")
            }
        }
    }
}

/// Result of checking one smart code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartCodeVerdict {
    pub valid: bool,
    pub code: String,
    pub segments: Vec<String>,
    pub version: Option<u32>,
    pub issues: Vec<SmartCodeIssue>,
}

impl SmartCodeVerdict {
    /// Issues joined for an error message.
    pub fn describe(&self) -> String {
        if self.valid {
            return format!("smart code '{}' conforms", self.code);
        }
        let issues: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        format!("smart code '{}': {}", self.code, issues.join("; "))
    }
}

/// Check a smart code against the grammar.
pub fn validate_smart_code(code: &str) -> SmartCodeVerdict {
    let parts: Vec<&str> = code.split('.').collect();
    let mut issues = Vec::new();

    // The last part is the version; everything before it is a segment.
    let (version_part, segment_parts) = match parts.split_last() {
        Some((last, rest)) => (*last, rest),
        None => ("", &[][..]),
    };

    if segment_parts.len() < SEGMENT_COUNT {
        issues.push(SmartCodeIssue::InsufficientSegments {
            found: segment_parts.len(),
            expected: SEGMENT_COUNT,
        });
    } else if segment_parts.len() > SEGMENT_COUNT {
        issues.push(SmartCodeIssue::TooManySegments {
            found: segment_parts.len(),
            expected: SEGMENT_COUNT,
        });
    }

    for (index, segment) in segment_parts.iter().enumerate() {
        if segment.is_empty() {
            issues.push(SmartCodeIssue::EmptySegment { index });
        } else if !segment_pattern().is_match(segment) {
            issues.push(SmartCodeIssue::InvalidSegment {
                index,
                segment: segment.to_string(),
            });
        }
    }

    let version = version_pattern()
        .captures(version_part)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    if version.is_none() {
        issues.push(SmartCodeIssue::InvalidVersion {
            segment: version_part.to_string(),
        });
    }

    SmartCodeVerdict {
        valid: issues.is_empty(),
        code: code.to_string(),
        segments: segment_parts.iter().map(|s| s.to_string()).collect(),
        version,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fc024_valid_code() {
        let v = validate_smart_code("HERA.SALON.CRM.ENT.CUST.v1");
        assert!(v.valid, "{:?}", v.issues);
        assert_eq!(v.segments, vec!["HERA", "SALON", "CRM", "ENT", "CUST"]);
        assert_eq!(v.version, Some(1));
        assert_eq!(v.describe(), "smart code 'HERA.SALON.CRM.ENT.CUST.v1' conforms");
    }

    #[test]
    fn test_fc024_digits_and_underscores() {
        assert!(validate_smart_code("HERA.REST2.POS_1.TXN.SALE.v12").valid);
    }

    #[test]
    fn test_fc024_insufficient_segments() {
        let v = validate_smart_code("BAD.CODE");
        assert!(!v.valid);
        assert!(v.issues.contains(&SmartCodeIssue::InsufficientSegments {
            found: 1,
            expected: 5
        }));
        assert!(v.describe().contains("insufficient segments"));
    }

    #[test]
    fn test_fc024_too_many_segments() {
        let v = validate_smart_code("A.B.C.D.E.F.v1");
        assert_eq!(
            v.issues,
            vec![SmartCodeIssue::TooManySegments { found: 6, expected: 5 }]
        );
    }

    #[test]
    fn test_fc024_lowercase_segment() {
        let v = validate_smart_code("HERA.salon.CRM.ENT.CUST.v1");
        assert_eq!(
            v.issues,
            vec![SmartCodeIssue::InvalidSegment {
                index: 1,
                segment: "salon".into()
            }]
        );
    }

    #[test]
    fn test_fc024_empty_segment() {
        let v = validate_smart_code("HERA..CRM.ENT.CUST.v1");
        assert_eq!(v.issues, vec![SmartCodeIssue::EmptySegment { index: 1 }]);
    }

    #[test]
    fn test_fc024_bad_version() {
        let v = validate_smart_code("HERA.SALON.CRM.ENT.CUST.V1");
        assert_eq!(
            v.issues,
            vec![SmartCodeIssue::InvalidVersion {
                segment: "V1".into()
            }]
        );
        assert_eq!(v.version, None);
    }

    #[test]
    fn test_fc024_empty_and_placeholder() {
        let v = validate_smart_code("");
        assert!(!v.valid);
        assert!(v.issues.len() >= 2);
        assert!(!validate_smart_code("{{code}}").valid);
    }
}
