use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuditError, AuditResult};

/// Severity of a single finding, as reported by the analysis model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Critical", alias = "CRITICAL")]
    Critical,
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub line: u32,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GasSuggestion {
    pub line: u32,
    pub description: String,
    pub estimated_savings: f64,
}

/// Gas figures are model estimates and may be fractional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GasOptimization {
    pub estimated_gas: f64,
    pub suggestions: Vec<GasSuggestion>,
}

/// The strict two-key object the analysis capability must return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalysisReport {
    pub vulnerabilities: Vec<Finding>,
    pub gas_optimizations: GasOptimization,
}

impl AnalysisReport {
    /// Checks the constraints serde cannot express. Empty lists are valid.
    pub fn validate(&self) -> AuditResult<()> {
        if let Some(finding) = self.vulnerabilities.iter().find(|f| f.line == 0) {
            return Err(AuditError::Validation(format!(
                "finding '{}' has line 0, lines start at 1",
                finding.issue
            )));
        }
        check_gas("estimatedGas", self.gas_optimizations.estimated_gas)?;
        for suggestion in &self.gas_optimizations.suggestions {
            check_gas("estimatedSavings", suggestion.estimated_savings)?;
        }
        if let Some(suggestion) = self.gas_optimizations.suggestions.iter().find(|s| s.line == 0) {
            return Err(AuditError::Validation(format!(
                "gas suggestion '{}' has line 0, lines start at 1",
                suggestion.description
            )));
        }
        Ok(())
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.vulnerabilities.iter().map(|f| f.severity).min()
    }
}

fn check_gas(field: &str, value: f64) -> AuditResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(AuditError::Validation(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}
