//! Optimization recommendation + execution models owned by the
//! Optimization Engine (§3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Code,
    Performance,
    Keyword,
    Api,
    Config,
    Architectural,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A structured, narrowly-scoped edit proposed for a single target file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub target_file: String,
    pub description: String,
    /// Exact-string replacement parameters, interpreted by the per-type
    /// strategy. For non-code recommendation types this carries the
    /// strategy-specific op (e.g. add/remove keyword) as JSON instead.
    pub find: Option<String>,
    pub replace: Option<String>,
    pub structured_op: Option<serde_json::Value>,
}

/// Validation kinds a recommendation may require before/after applying
/// (§4.6 step 4/6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    SyntaxCheck,
    UnitTests,
    IntegrationTests,
    PerfBenchmark,
    SecurityScan,
    ConfigValidator,
}

/// A caller- or agent-submitted proposal for a change to one or more
/// target files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub id: Uuid,
    pub source_agent: Uuid,
    pub recommendation_type: RecommendationType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub target_files: Vec<String>,
    pub proposed_changes: Vec<ProposedChange>,
    pub expected_benefits: Vec<String>,
    pub risk_assessment: String,
    pub required_validations: Vec<ValidationKind>,
    pub confidence: f64,
    pub dependencies: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OptimizationRecommendation {
    /// §4.6 "Auto-apply gate": auto-apply eligible iff enabled, severity
    /// low, confidence >= 0.8, and the engine has spare concurrency.
    pub fn is_auto_apply_eligible(&self, auto_apply_enabled: bool, in_flight: usize, max_concurrent: usize) -> bool {
        auto_apply_enabled
            && self.severity == Severity::Low
            && self.confidence >= 0.8
            && in_flight < max_concurrent
    }
}

/// Lifecycle state of an [`OptimizationExecution`] (§3, §4.6 workflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationState {
    Pending,
    Analyzing,
    Planning,
    Validating,
    Applying,
    Testing,
    Completed,
    Failed,
    RolledBack,
}

impl OptimizationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::Validating => "validating",
            Self::Applying => "applying",
            Self::Testing => "testing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    /// True once the execution has passed `applying` — invariant "every
    /// change file touched past `applying` has a backup entry" applies
    /// from this point on.
    pub fn is_past_applying(self) -> bool {
        matches!(self, Self::Testing | Self::Completed | Self::RolledBack)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub state: OptimizationState,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub kind: ValidationKind,
    pub passed: bool,
    pub message: String,
}

/// Runtime record tracking a recommendation through the optimization
/// workflow state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationExecution {
    pub id: Uuid,
    pub recommendation: OptimizationRecommendation,
    pub state: OptimizationState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub step_log: Vec<StepLogEntry>,
    pub pre_validation: Vec<ValidationResult>,
    pub post_validation: Vec<ValidationResult>,
    /// target path -> backup path.
    pub backups: BTreeMap<String, String>,
    pub success_metrics: BTreeMap<String, f64>,
    pub error_message: Option<String>,
}

impl OptimizationExecution {
    pub fn new(recommendation: OptimizationRecommendation) -> Self {
        Self {
            id: Uuid::new_v4(),
            recommendation,
            state: OptimizationState::Pending,
            started_at: None,
            completed_at: None,
            step_log: Vec::new(),
            pre_validation: Vec::new(),
            post_validation: Vec::new(),
            backups: BTreeMap::new(),
            success_metrics: BTreeMap::new(),
            error_message: None,
        }
    }

    pub fn transition(&mut self, state: OptimizationState, detail: impl Into<String>) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = state;
        self.step_log.push(StepLogEntry {
            state,
            timestamp: Utc::now(),
            detail: detail.into(),
        });
        if state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error_message = Some(error.into());
        self.transition(OptimizationState::Failed, "execution failed");
    }

    pub fn roll_back(&mut self, reason: impl Into<String>) {
        self.error_message = Some(reason.into());
        self.transition(OptimizationState::RolledBack, "rolled back after validation failure");
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|start| now - start)
    }
}

/// An ordered bundle of recommendations sharing approval/execution
/// constraints (§4.6 "Planning").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub id: Uuid,
    pub ordered_recommendation_ids: Vec<Uuid>,
    pub aggregate_risk: Severity,
    pub estimated_duration_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(severity: Severity, confidence: f64) -> OptimizationRecommendation {
        OptimizationRecommendation {
            id: Uuid::new_v4(),
            source_agent: Uuid::new_v4(),
            recommendation_type: RecommendationType::Code,
            severity,
            title: "t".into(),
            description: "d".into(),
            target_files: vec!["f.rs".into()],
            proposed_changes: vec![],
            expected_benefits: vec![],
            risk_assessment: "low".into(),
            required_validations: vec![ValidationKind::SyntaxCheck],
            confidence,
            dependencies: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn auto_apply_gate_requires_all_conditions() {
        let r = rec(Severity::Low, 0.9);
        assert!(r.is_auto_apply_eligible(true, 0, 3));
        assert!(!r.is_auto_apply_eligible(false, 0, 3));
        assert!(!r.is_auto_apply_eligible(true, 3, 3));
        let r2 = rec(Severity::Medium, 0.9);
        assert!(!r2.is_auto_apply_eligible(true, 0, 3));
        let r3 = rec(Severity::Low, 0.5);
        assert!(!r3.is_auto_apply_eligible(true, 0, 3));
    }

    #[test]
    fn rollback_marks_terminal() {
        let mut exec = OptimizationExecution::new(rec(Severity::Low, 0.9));
        exec.transition(OptimizationState::Applying, "applying");
        exec.roll_back("syntax check failed");
        assert_eq!(exec.state, OptimizationState::RolledBack);
        assert!(exec.state.is_terminal());
        assert!(exec.completed_at.is_some());
    }
}
