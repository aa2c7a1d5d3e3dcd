// Exception data model - the unit of review work
// Core fields are immutable after classification; lifecycle fields are
// mutated exclusively through workflow transitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// MATCH RESULT (input - produced by the external matching engine)
// ============================================================================

/// Outcome of comparing a source record against its candidate target.
/// The matching heuristics live upstream; this engine only consumes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    /// Records correspond - never reaches the classifier
    Match,
    /// Records correspond but some fields disagree
    Partial,
    /// Records do not correspond (or one side is missing)
    Exception,
}

/// Snapshot of one side of a record pair, as seen at match time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub record_id: String,
    /// Which feed this record came from (e.g. "ledger", "bank_statement")
    pub source_system: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub currency: String,
    pub reference: String,
    pub status: String,
    pub description: String,
}

impl RecordSnapshot {
    /// Content fingerprint for duplicate detection.
    /// NOTE: identity is record_id; the fingerprint only says "same content".
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{:.2}|{}|{}",
            self.date, self.amount, self.reference, self.source_system
        ));
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub status: MatchStatus,
    /// Matching engine confidence in [0, 1]
    pub confidence: f64,
    pub source_record: Option<RecordSnapshot>,
    pub target_record: Option<RecordSnapshot>,
}

// ============================================================================
// EXCEPTION TAXONOMY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionType {
    AmountMismatch,
    MissingRecord,
    DuplicateRecord,
    DateMismatch,
    ReferenceMismatch,
    StatusMismatch,
}

impl ExceptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionType::AmountMismatch => "AmountMismatch",
            ExceptionType::MissingRecord => "MissingRecord",
            ExceptionType::DuplicateRecord => "DuplicateRecord",
            ExceptionType::DateMismatch => "DateMismatch",
            ExceptionType::ReferenceMismatch => "ReferenceMismatch",
            ExceptionType::StatusMismatch => "StatusMismatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AmountMismatch" => Some(ExceptionType::AmountMismatch),
            "MissingRecord" => Some(ExceptionType::MissingRecord),
            "DuplicateRecord" => Some(ExceptionType::DuplicateRecord),
            "DateMismatch" => Some(ExceptionType::DateMismatch),
            "ReferenceMismatch" => Some(ExceptionType::ReferenceMismatch),
            "StatusMismatch" => Some(ExceptionType::StatusMismatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

// ============================================================================
// LIFECYCLE STATUS
// ============================================================================

/// Review lifecycle. Declaration order is the kanban bucket order - the
/// derived Ord keeps status-grouped views stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Unassigned,
    InReview,
    PendingApproval,
    Resolved,
}

impl ExceptionStatus {
    pub const ALL: [ExceptionStatus; 4] = [
        ExceptionStatus::Unassigned,
        ExceptionStatus::InReview,
        ExceptionStatus::PendingApproval,
        ExceptionStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionStatus::Unassigned => "unassigned",
            ExceptionStatus::InReview => "in_review",
            ExceptionStatus::PendingApproval => "pending_approval",
            ExceptionStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unassigned" => Some(ExceptionStatus::Unassigned),
            "in_review" => Some(ExceptionStatus::InReview),
            "pending_approval" => Some(ExceptionStatus::PendingApproval),
            "resolved" => Some(ExceptionStatus::Resolved),
            _ => None,
        }
    }

    /// Reviewer identity is mandatory while someone is working the item.
    pub fn requires_assignee(&self) -> bool {
        matches!(
            self,
            ExceptionStatus::InReview | ExceptionStatus::PendingApproval
        )
    }
}

// ============================================================================
// DIFFERENCES, SUGGESTIONS, AUDIT TRAIL
// ============================================================================

/// One field that disagrees between the paired records.
/// Entries exist only for fields that actually differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDifference {
    pub field: String,
    pub source_value: String,
    pub target_value: String,
    pub note: String,
}

/// Advisory produced at classification time. Informational only - the
/// workflow never acts on it without a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSuggestion {
    pub action: String,
    pub confidence: f64,
    pub explanation: String,
    pub reasoning: String,
}

/// Append-only audit entry. Timestamps are assigned server-side at append
/// so the trail has a total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl HistoryEntry {
    pub fn new(action: &str, actor: &str, details: &str) -> Self {
        HistoryEntry {
            action: action.to_string(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            details: details.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// EXCEPTION ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    /// Stable identity (UUID) - never changes
    pub id: String,

    #[serde(rename = "type")]
    pub exception_type: ExceptionType,

    /// Derived once at classification time, immutable thereafter
    pub severity: Severity,

    /// The financial value in question (signed)
    pub amount: f64,

    pub source_record: Option<RecordSnapshot>,
    pub target_record: Option<RecordSnapshot>,

    /// Immutable once classified
    pub differences: Vec<FieldDifference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_suggestion: Option<AiSuggestion>,

    /// Mutated only via legal workflow transitions
    pub status: ExceptionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    /// Non-null if and only if status == resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    /// Append-only
    pub history: Vec<HistoryEntry>,

    /// Append-only
    pub comments: Vec<Comment>,

    /// When the discrepancy was observed
    pub timestamp: DateTime<Utc>,

    /// Optimistic-concurrency token, bumped by the store on every write.
    /// Identity = id, version = which write of that identity.
    #[serde(default)]
    pub version: i64,
}

impl Exception {
    pub fn is_resolved(&self) -> bool {
        self.status == ExceptionStatus::Resolved
    }

    /// Check the resolution/status coupling invariant.
    pub fn invariants_hold(&self) -> bool {
        let resolution_ok = self.resolution.is_some() == self.is_resolved();
        let assignee_ok = !self.status.requires_assignee() || self.assigned_to.is_some();
        resolution_ok && assignee_ok && !self.history.is_empty()
    }
}
