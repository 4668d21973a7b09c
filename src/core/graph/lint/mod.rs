use crate::core::graph::config::Dataset;
use serde::Serialize;
use std::fmt;

pub mod rules;
pub use rules::*;

/// Diagnostic severity levels emitted by dataset lint rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Error,
    Warning,
    Info,
}

impl LintSeverity {
    fn rank(&self) -> u8 {
        match self {
            LintSeverity::Error => 3,
            LintSeverity::Warning => 2,
            LintSeverity::Info => 1,
        }
    }
}

impl fmt::Display for LintSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintSeverity::Error => write!(f, "Error"),
            LintSeverity::Warning => write!(f, "Warning"),
            LintSeverity::Info => write!(f, "Info"),
        }
    }
}

/// Individual lint result emitted by a rule.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub code: String,
    pub severity: LintSeverity,
    pub message: String,
    pub location: Option<String>,
    pub suggestion: Option<String>,
}

impl LintResult {
    pub fn new(
        code: impl Into<String>,
        severity: LintSeverity,
        message: impl Into<String>,
        location: Option<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            location,
            suggestion,
        }
    }
}

/// Trait implemented by dataset lint rules.
pub trait DatasetLintRule {
    fn validate(&self, datasets: &[Dataset]) -> Vec<LintResult>;
}

/// Registry that runs all built-in lint rules.
pub struct LintRegistry {
    rules: Vec<Box<dyn DatasetLintRule>>,
}

impl LintRegistry {
    pub fn new() -> Self {
        Self {
            rules: built_in_rules(),
        }
    }

    /// Run every rule. Results are sorted by `(severity desc, code asc, location asc)`.
    pub fn run(&self, datasets: &[Dataset]) -> Vec<LintResult> {
        let mut results = Vec::new();
        for rule in &self.rules {
            results.extend(rule.validate(datasets));
        }
        results.sort_by(|a, b| {
            let severity_cmp = b.severity.rank().cmp(&a.severity.rank());
            severity_cmp
                .then(a.code.cmp(&b.code))
                .then(a.location.cmp(&b.location))
        });
        results
    }

    pub fn has_errors(results: &[LintResult]) -> bool {
        results.iter().any(|r| r.severity == LintSeverity::Error)
    }
}

impl Default for LintRegistry {
    fn default() -> Self {
        Self::new()
    }
}
