// Exception Classifier - turns MatchResults into typed exceptions
// Inspects which fields differ (and whether one side is absent) to pick the
// exception type, derives severity from the magnitude of the difference,
// and attaches an advisory suggestion for the reviewer.

use crate::config::EngineConfig;
use crate::error::{ReconError, ReconResult};
use crate::model::{
    AiSuggestion, Exception, ExceptionStatus, ExceptionType, FieldDifference, HistoryEntry,
    MatchResult, MatchStatus, RecordSnapshot, Severity,
};
use chrono::Utc;

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct ExceptionClassifier {
    /// Amount difference above which severity is High
    pub high_amount_threshold: f64,

    /// Tolerance for treating two amounts as equal (default: 0.01)
    pub amount_tolerance: f64,
}

impl ExceptionClassifier {
    pub fn new() -> Self {
        ExceptionClassifier {
            high_amount_threshold: 1000.0,
            amount_tolerance: 0.01,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        ExceptionClassifier {
            high_amount_threshold: threshold,
            amount_tolerance: 0.01,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        ExceptionClassifier {
            high_amount_threshold: config.high_amount_threshold,
            amount_tolerance: config.amount_tolerance,
        }
    }

    /// Classify a partial/exception MatchResult into a new Exception.
    ///
    /// The ingest path runs as "system"; use [`classify_as`](Self::classify_as)
    /// when a named caller creates exceptions directly.
    pub fn classify(&self, result: &MatchResult) -> ReconResult<Exception> {
        self.classify_as(result, "system")
    }

    pub fn classify_as(&self, result: &MatchResult, actor: &str) -> ReconResult<Exception> {
        // Caller contract: clean matches never reach the classifier
        if result.status == MatchStatus::Match {
            return Err(ReconError::Classification(
                "received a MatchResult with status 'match'".to_string(),
            ));
        }

        let (exception_type, differences, detail) = match (
            result.source_record.as_ref(),
            result.target_record.as_ref(),
        ) {
            (None, None) => {
                return Err(ReconError::Classification(
                    "MatchResult carries no records on either side".to_string(),
                ));
            }
            (Some(source), None) => (
                ExceptionType::MissingRecord,
                Vec::new(),
                format!("no target record found for {}", source.record_id),
            ),
            (None, Some(target)) => (
                ExceptionType::MissingRecord,
                Vec::new(),
                format!("no source record found for {}", target.record_id),
            ),
            (Some(source), Some(target)) => {
                let differences = self.diff_records(source, target);

                if source.source_system == target.source_system {
                    // Two near-identical records seen on the same feed
                    let detail = format!(
                        "duplicate pair on feed '{}' (fingerprints {} / {})",
                        source.source_system,
                        &source.fingerprint()[..12],
                        &target.fingerprint()[..12]
                    );
                    (ExceptionType::DuplicateRecord, differences, detail)
                } else if differences.is_empty() {
                    // Both records present and nothing differs - the matcher
                    // should have emitted a clean match
                    return Err(ReconError::Classification(
                        "MatchResult carries no differences and both records are present"
                            .to_string(),
                    ));
                } else {
                    let exception_type = salient_type(&differences);
                    let detail = format!(
                        "{} differing field(s), most salient: {}",
                        differences.len(),
                        differences[0].field
                    );
                    (exception_type, differences, detail)
                }
            }
        };

        let amount = result
            .source_record
            .as_ref()
            .or(result.target_record.as_ref())
            .map(|r| r.amount)
            .unwrap_or(0.0);

        let severity = self.derive_severity(exception_type, &differences);
        let suggestion = self.suggest(exception_type, severity, &differences, result.confidence);

        let created = HistoryEntry::new(
            "Created",
            actor,
            &format!(
                "Classified as {} ({}): {}",
                exception_type.as_str(),
                severity.as_str(),
                detail
            ),
        );

        Ok(Exception {
            id: uuid::Uuid::new_v4().to_string(),
            exception_type,
            severity,
            amount,
            source_record: result.source_record.clone(),
            target_record: result.target_record.clone(),
            differences,
            ai_suggestion: Some(suggestion),
            status: ExceptionStatus::Unassigned,
            assigned_to: None,
            resolution: None,
            history: vec![created],
            comments: Vec::new(),
            timestamp: Utc::now(),
            version: 0,
        })
    }

    /// Compare the paired records field by field.
    /// Only fields that actually differ produce an entry.
    fn diff_records(&self, source: &RecordSnapshot, target: &RecordSnapshot) -> Vec<FieldDifference> {
        let mut differences = Vec::new();

        let amount_delta = (source.amount - target.amount).abs();
        if amount_delta > self.amount_tolerance {
            differences.push(FieldDifference {
                field: "amount".to_string(),
                source_value: format!("{:.2}", source.amount),
                target_value: format!("{:.2}", target.amount),
                note: format!("difference of {:.2}", amount_delta),
            });
        }

        if source.date != target.date {
            let days = (target.date - source.date).num_days();
            differences.push(FieldDifference {
                field: "date".to_string(),
                source_value: source.date.to_string(),
                target_value: target.date.to_string(),
                note: format!("{} day(s) apart", days.abs()),
            });
        }

        if source.reference != target.reference {
            differences.push(FieldDifference {
                field: "reference".to_string(),
                source_value: source.reference.clone(),
                target_value: target.reference.clone(),
                note: "reference strings do not match".to_string(),
            });
        }

        if source.status != target.status {
            differences.push(FieldDifference {
                field: "status".to_string(),
                source_value: source.status.clone(),
                target_value: target.status.clone(),
                note: "record statuses disagree".to_string(),
            });
        }

        differences
    }

    /// Severity rule:
    /// - high: amount difference over threshold, or duplicate/missing record
    /// - medium: amount difference under threshold, or reference mismatch
    /// - low: date-only or cosmetic (status) differences
    fn derive_severity(
        &self,
        exception_type: ExceptionType,
        differences: &[FieldDifference],
    ) -> Severity {
        match exception_type {
            ExceptionType::MissingRecord | ExceptionType::DuplicateRecord => Severity::High,
            ExceptionType::AmountMismatch => {
                if amount_difference(differences) > self.high_amount_threshold {
                    Severity::High
                } else {
                    Severity::Medium
                }
            }
            ExceptionType::ReferenceMismatch => Severity::Medium,
            ExceptionType::DateMismatch | ExceptionType::StatusMismatch => Severity::Low,
        }
    }

    /// Heuristic advisory for the reviewer. Never authoritative - the
    /// workflow state machine ignores it entirely.
    fn suggest(
        &self,
        exception_type: ExceptionType,
        severity: Severity,
        differences: &[FieldDifference],
        match_confidence: f64,
    ) -> AiSuggestion {
        let (action, base, explanation, reasoning) = match exception_type {
            ExceptionType::DuplicateRecord => (
                "merge",
                0.85,
                "Records look like the same entry seen twice on one feed".to_string(),
                "Same feed, matching content fingerprints".to_string(),
            ),
            ExceptionType::MissingRecord => (
                "adjust",
                0.60,
                "Counterparty record is absent; a manual entry is likely needed".to_string(),
                "One side of the pair is null".to_string(),
            ),
            ExceptionType::AmountMismatch => {
                let delta = amount_difference(differences);
                if severity == Severity::High {
                    (
                        "escalate",
                        0.55,
                        format!("Amount difference of {:.2} exceeds the review threshold", delta),
                        "Large discrepancies need approval before adjustment".to_string(),
                    )
                } else {
                    (
                        "adjust",
                        0.70,
                        format!("Small amount difference of {:.2}, likely fees or rounding", delta),
                        "Sub-threshold amount deltas are usually adjustable".to_string(),
                    )
                }
            }
            ExceptionType::DateMismatch => (
                "accept",
                0.75,
                "Only the booking dates differ; values agree".to_string(),
                "Date drift between feeds is a common settlement artifact".to_string(),
            ),
            ExceptionType::ReferenceMismatch | ExceptionType::StatusMismatch => (
                "adjust",
                0.50,
                "Descriptive fields disagree; manual review recommended".to_string(),
                "Reference/status drift needs a human decision".to_string(),
            ),
        };

        // Blend the heuristic prior with the matcher's own confidence
        let confidence = ((base + match_confidence.clamp(0.0, 1.0)) / 2.0 * 100.0).round() / 100.0;

        AiSuggestion {
            action: action.to_string(),
            confidence,
            explanation,
            reasoning,
        }
    }
}

impl Default for ExceptionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The single most salient differing field drives the exception type.
/// Salience order: amount > date > reference > status.
fn salient_type(differences: &[FieldDifference]) -> ExceptionType {
    for field in ["amount", "date", "reference", "status"] {
        if differences.iter().any(|d| d.field == field) {
            return match field {
                "amount" => ExceptionType::AmountMismatch,
                "date" => ExceptionType::DateMismatch,
                "reference" => ExceptionType::ReferenceMismatch,
                _ => ExceptionType::StatusMismatch,
            };
        }
    }
    // diff_records only emits the four fields above
    ExceptionType::StatusMismatch
}

fn amount_difference(differences: &[FieldDifference]) -> f64 {
    differences
        .iter()
        .find(|d| d.field == "amount")
        .and_then(|d| {
            let source: f64 = d.source_value.parse().ok()?;
            let target: f64 = d.target_value.parse().ok()?;
            Some((source - target).abs())
        })
        .unwrap_or(0.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snapshot(system: &str, id: &str, amount: f64, date: (i32, u32, u32)) -> RecordSnapshot {
        RecordSnapshot {
            record_id: id.to_string(),
            source_system: system.to_string(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            amount,
            currency: "USD".to_string(),
            reference: "INV-2025-001".to_string(),
            status: "posted".to_string(),
            description: "Invoice payment".to_string(),
        }
    }

    fn partial(source: Option<RecordSnapshot>, target: Option<RecordSnapshot>) -> MatchResult {
        MatchResult {
            status: MatchStatus::Partial,
            confidence: 0.8,
            source_record: source,
            target_record: target,
        }
    }

    #[test]
    fn test_amount_mismatch_classification() {
        // Scenario: same date/reference family, amounts 5250.00 vs 5200.00
        let classifier = ExceptionClassifier::new();
        let result = partial(
            Some(snapshot("ledger", "tx-1", 5250.00, (2025, 1, 15))),
            Some(snapshot("bank", "stmt-9", 5200.00, (2025, 1, 15))),
        );

        let exception = classifier.classify(&result).unwrap();

        assert_eq!(exception.exception_type, ExceptionType::AmountMismatch);
        assert_eq!(exception.differences.len(), 1);
        assert_eq!(exception.differences[0].field, "amount");
        assert!(exception.differences[0].note.contains("50.00"));
        assert_eq!(exception.severity, Severity::Medium); // 50 < 1000 threshold
        assert_eq!(exception.status, ExceptionStatus::Unassigned);
        assert_eq!(exception.history.len(), 1);
        assert_eq!(exception.history[0].action, "Created");
        assert!(exception.invariants_hold());
    }

    #[test]
    fn test_missing_target_is_high_severity() {
        let classifier = ExceptionClassifier::new();
        let result = MatchResult {
            status: MatchStatus::Exception,
            confidence: 0.9,
            source_record: Some(snapshot("ledger", "tx-2", 310.25, (2025, 2, 1))),
            target_record: None,
        };

        let exception = classifier.classify(&result).unwrap();

        assert_eq!(exception.exception_type, ExceptionType::MissingRecord);
        assert_eq!(exception.severity, Severity::High);
        assert_eq!(exception.amount, 310.25);
        assert!(exception.differences.is_empty());
    }

    #[test]
    fn test_duplicate_on_same_feed() {
        let classifier = ExceptionClassifier::new();
        let result = partial(
            Some(snapshot("ledger", "tx-3", 99.00, (2025, 3, 3))),
            Some(snapshot("ledger", "tx-4", 99.00, (2025, 3, 3))),
        );

        let exception = classifier.classify(&result).unwrap();

        assert_eq!(exception.exception_type, ExceptionType::DuplicateRecord);
        assert_eq!(exception.severity, Severity::High);
        let suggestion = exception.ai_suggestion.unwrap();
        assert_eq!(suggestion.action, "merge");
        assert!(suggestion.confidence > 0.0 && suggestion.confidence <= 1.0);
    }

    #[test]
    fn test_clean_match_is_rejected() {
        let classifier = ExceptionClassifier::new();
        let result = MatchResult {
            status: MatchStatus::Match,
            confidence: 1.0,
            source_record: Some(snapshot("ledger", "tx-5", 10.0, (2025, 1, 1))),
            target_record: Some(snapshot("bank", "stmt-5", 10.0, (2025, 1, 1))),
        };

        let err = classifier.classify(&result).unwrap_err();
        assert!(matches!(err, ReconError::Classification(_)));
    }

    #[test]
    fn test_zero_differences_with_both_records_is_contract_error() {
        let classifier = ExceptionClassifier::new();
        let result = partial(
            Some(snapshot("ledger", "tx-6", 42.00, (2025, 1, 1))),
            Some(snapshot("bank", "stmt-6", 42.00, (2025, 1, 1))),
        );

        let err = classifier.classify(&result).unwrap_err();
        assert!(matches!(err, ReconError::Classification(_)));
    }

    #[test]
    fn test_date_only_difference_is_low_severity() {
        let classifier = ExceptionClassifier::new();
        let result = partial(
            Some(snapshot("ledger", "tx-7", 75.00, (2025, 4, 1))),
            Some(snapshot("bank", "stmt-7", 75.00, (2025, 4, 3))),
        );

        let exception = classifier.classify(&result).unwrap();

        assert_eq!(exception.exception_type, ExceptionType::DateMismatch);
        assert_eq!(exception.severity, Severity::Low);
        assert!(exception.differences[0].note.contains("2 day(s)"));
    }

    #[test]
    fn test_threshold_is_configurable() {
        // Same 50.00 difference, but the threshold sits below it
        let classifier = ExceptionClassifier::with_threshold(40.0);
        let result = partial(
            Some(snapshot("ledger", "tx-8", 5250.00, (2025, 1, 15))),
            Some(snapshot("bank", "stmt-8", 5200.00, (2025, 1, 15))),
        );

        let exception = classifier.classify(&result).unwrap();

        assert_eq!(exception.exception_type, ExceptionType::AmountMismatch);
        assert_eq!(exception.severity, Severity::High);
        assert_eq!(exception.ai_suggestion.unwrap().action, "escalate");
    }

    #[test]
    fn test_amount_drives_type_over_date() {
        let classifier = ExceptionClassifier::new();
        let result = partial(
            Some(snapshot("ledger", "tx-9", 120.00, (2025, 5, 1))),
            Some(snapshot("bank", "stmt-9", 118.50, (2025, 5, 2))),
        );

        let exception = classifier.classify(&result).unwrap();

        // Both amount and date differ; amount is the most salient
        assert_eq!(exception.exception_type, ExceptionType::AmountMismatch);
        assert_eq!(exception.differences.len(), 2);
        assert_eq!(exception.differences[0].field, "amount");
    }

    #[test]
    fn test_no_records_at_all_is_contract_error() {
        let classifier = ExceptionClassifier::new();
        let result = partial(None, None);

        let err = classifier.classify(&result).unwrap_err();
        assert!(matches!(err, ReconError::Classification(_)));
    }
}
