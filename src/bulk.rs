// Bulk Operation Coordinator - one action across many exception IDs
//
// Fail fast on request-shape errors (unknown action, missing assignee)
// before touching any exception; fail soft per item on domain errors. One
// item's failure never rolls back the others, and a cancelled batch keeps
// everything already applied.

use crate::audit::AuditRecorder;
use crate::error::{ReconError, ReconResult};
use crate::model::Exception;
use crate::store::ExceptionStore;
use crate::workflow::{ReviewAction, WorkflowEngine};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// REQUEST / RESULT SHAPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Assign,
    Resolve,
    /// Appends an "Exported" history entry and returns full payloads for
    /// client-side file generation; never mutates status
    Export,
}

impl FromStr for BulkAction {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assign" => Ok(BulkAction::Assign),
            "resolve" => Ok(BulkAction::Resolve),
            "export" => Ok(BulkAction::Export),
            other => Err(ReconError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionData {
    pub assigned_to: Option<String>,
    pub resolution: Option<String>,
}

pub const DEFAULT_BULK_RESOLUTION: &str = "Bulk resolved";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum ItemOutcome {
    Applied,
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub applied_count: usize,
    pub skipped_count: usize,
    pub results: Vec<BulkItemResult>,
    /// Final state of every exception the batch touched or read
    pub exceptions: Vec<Exception>,
}

// ============================================================================
// COORDINATOR
// ============================================================================

pub struct BulkCoordinator<'a, S: ExceptionStore> {
    engine: &'a WorkflowEngine<S>,
}

impl<'a, S: ExceptionStore> BulkCoordinator<'a, S> {
    pub fn new(engine: &'a WorkflowEngine<S>) -> Self {
        BulkCoordinator { engine }
    }

    pub fn apply(
        &self,
        ids: &[String],
        action: BulkAction,
        data: &BulkActionData,
        actor: &str,
    ) -> ReconResult<BulkReport> {
        self.apply_with_cancel(ids, action, data, actor, None)
    }

    /// Apply one action across the batch, checking the cancellation flag
    /// between items. Items already applied when the flag flips stay
    /// applied; the rest are reported as skipped.
    pub fn apply_with_cancel(
        &self,
        ids: &[String],
        action: BulkAction,
        data: &BulkActionData,
        actor: &str,
        cancel: Option<&AtomicBool>,
    ) -> ReconResult<BulkReport> {
        // Request-shape validation happens before any mutation
        if action == BulkAction::Assign && data.assigned_to.is_none() {
            return Err(ReconError::InvalidRequest(
                "bulk assign requires data.assignedTo".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(ids.len());
        let mut exceptions = Vec::new();
        let mut applied_count = 0;
        let mut skipped_count = 0;
        let mut cancelled = false;

        for id in ids {
            if cancelled || cancel.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false) {
                cancelled = true;
                skipped_count += 1;
                results.push(BulkItemResult {
                    id: id.clone(),
                    outcome: ItemOutcome::Skipped {
                        reason: "cancelled".to_string(),
                    },
                });
                continue;
            }

            match self.apply_one(id, action, data, actor) {
                Ok(exception) => {
                    applied_count += 1;
                    results.push(BulkItemResult {
                        id: id.clone(),
                        outcome: ItemOutcome::Applied,
                    });
                    exceptions.push(exception);
                }
                Err(err) => {
                    let reason = skip_reason(action, &err);
                    tracing::debug!(id, reason, "bulk item skipped");
                    skipped_count += 1;
                    results.push(BulkItemResult {
                        id: id.clone(),
                        outcome: ItemOutcome::Skipped {
                            reason: reason.to_string(),
                        },
                    });
                    // Report the untouched state when the item exists
                    if let Ok(Some(existing)) = self.engine.store().get(id) {
                        exceptions.push(existing);
                    }
                }
            }
        }

        Ok(BulkReport {
            applied_count,
            skipped_count,
            results,
            exceptions,
        })
    }

    fn apply_one(
        &self,
        id: &str,
        action: BulkAction,
        data: &BulkActionData,
        actor: &str,
    ) -> ReconResult<Exception> {
        match action {
            BulkAction::Assign => {
                // Already validated before the batch loop
                let assignee = data.assigned_to.clone().ok_or_else(|| {
                    ReconError::InvalidRequest("bulk assign requires data.assignedTo".to_string())
                })?;
                self.engine
                    .apply(id, &ReviewAction::Assign { assignee }, actor)
            }
            BulkAction::Resolve => {
                let resolution = data
                    .resolution
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BULK_RESOLUTION.to_string());
                self.engine.apply(
                    id,
                    &ReviewAction::Accept {
                        resolution: Some(resolution),
                    },
                    actor,
                )
            }
            BulkAction::Export => {
                let recorder = AuditRecorder::new(self.engine.store());
                recorder.record(id, "Exported", "Included in bulk export", actor)
            }
        }
    }
}

/// Map a per-item domain error to its skip reason. Accept only fails on a
/// resolved exception, so InvalidTransition under `resolve` reads as
/// "already_resolved".
fn skip_reason(action: BulkAction, err: &ReconError) -> &'static str {
    match (action, err) {
        (BulkAction::Resolve, ReconError::InvalidTransition { .. }) => "already_resolved",
        _ => err.skip_reason(),
    }
}

// ============================================================================
// CSV EXPORT
// ============================================================================

/// Flatten exceptions into CSV for client-side download.
pub fn render_csv(exceptions: &[Exception]) -> ReconResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record([
            "id",
            "type",
            "severity",
            "status",
            "amount",
            "assigned_to",
            "resolution",
            "timestamp",
        ])
        .map_err(|e| ReconError::Storage(e.into()))?;

    for exception in exceptions {
        writer
            .write_record([
                exception.id.as_str(),
                exception.exception_type.as_str(),
                exception.severity.as_str(),
                exception.status.as_str(),
                &format!("{:.2}", exception.amount),
                exception.assigned_to.as_deref().unwrap_or(""),
                exception.resolution.as_deref().unwrap_or(""),
                &exception.timestamp.to_rfc3339(),
            ])
            .map_err(|e| ReconError::Storage(e.into()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ReconError::Storage(anyhow::anyhow!("csv flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ReconError::Storage(e.into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ExceptionStatus, ExceptionType, HistoryEntry, Severity,
    };
    use crate::store::SqliteExceptionStore;
    use chrono::Utc;

    fn engine() -> WorkflowEngine<SqliteExceptionStore> {
        WorkflowEngine::new(SqliteExceptionStore::open_in_memory().unwrap())
    }

    fn seed(engine: &WorkflowEngine<SqliteExceptionStore>) -> Exception {
        let exception = Exception {
            id: uuid::Uuid::new_v4().to_string(),
            exception_type: ExceptionType::AmountMismatch,
            severity: Severity::Medium,
            amount: 125.00,
            source_record: None,
            target_record: None,
            differences: Vec::new(),
            ai_suggestion: None,
            status: ExceptionStatus::Unassigned,
            assigned_to: None,
            resolution: None,
            history: vec![HistoryEntry::new("Created", "system", "fixture")],
            comments: Vec::new(),
            timestamp: Utc::now(),
            version: 0,
        };
        engine.store().insert(&exception).unwrap()
    }

    #[test]
    fn test_bulk_action_parse() {
        assert_eq!("assign".parse::<BulkAction>().unwrap(), BulkAction::Assign);
        assert_eq!("resolve".parse::<BulkAction>().unwrap(), BulkAction::Resolve);
        assert_eq!("export".parse::<BulkAction>().unwrap(), BulkAction::Export);

        let err = "delete".parse::<BulkAction>().unwrap_err();
        assert!(matches!(err, ReconError::UnknownAction(_)));
    }

    #[test]
    fn test_bulk_resolve_with_unknown_id() {
        // Scenario: bulk-resolve [id1, id2, unknownId] with "Q1 close"
        let engine = engine();
        let first = seed(&engine);
        let second = seed(&engine);
        let ids = vec![
            first.id.clone(),
            second.id.clone(),
            "unknown-id".to_string(),
        ];

        let coordinator = BulkCoordinator::new(&engine);
        let data = BulkActionData {
            assigned_to: None,
            resolution: Some("Q1 close".to_string()),
        };
        let report = coordinator
            .apply(&ids, BulkAction::Resolve, &data, "reviewer1")
            .unwrap();

        assert_eq!(report.applied_count, 2);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.applied_count + report.skipped_count, ids.len());

        for id in [&first.id, &second.id] {
            let loaded = engine.get(id).unwrap();
            assert_eq!(loaded.status, ExceptionStatus::Resolved);
            assert_eq!(loaded.resolution.as_deref(), Some("Q1 close"));
            let last = loaded.history.last().unwrap();
            assert_eq!(last.action, "Resolved");
            assert!(last.details.contains("Q1 close"));
        }

        let skipped: Vec<_> = report
            .results
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Skipped { .. }))
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].id, "unknown-id");
        match &skipped[0].outcome {
            ItemOutcome::Skipped { reason } => assert_eq!(reason, "not_found"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_bulk_resolve_skips_already_resolved() {
        let engine = engine();
        let open = seed(&engine);
        let closed = seed(&engine);
        engine
            .apply(&closed.id, &ReviewAction::Ignore, "reviewer1")
            .unwrap();

        let coordinator = BulkCoordinator::new(&engine);
        let report = coordinator
            .apply(
                &[open.id.clone(), closed.id.clone()],
                BulkAction::Resolve,
                &BulkActionData::default(),
                "reviewer1",
            )
            .unwrap();

        assert_eq!(report.applied_count, 1);
        assert_eq!(report.skipped_count, 1);
        match &report.results[1].outcome {
            ItemOutcome::Skipped { reason } => assert_eq!(reason, "already_resolved"),
            _ => panic!("resolved item should be skipped"),
        }

        // Default resolution text applies when none is given
        let loaded = engine.get(&open.id).unwrap();
        assert_eq!(loaded.resolution.as_deref(), Some(DEFAULT_BULK_RESOLUTION));
    }

    #[test]
    fn test_bulk_assign_requires_assignee() {
        let engine = engine();
        let exception = seed(&engine);

        let coordinator = BulkCoordinator::new(&engine);
        let err = coordinator
            .apply(
                &[exception.id.clone()],
                BulkAction::Assign,
                &BulkActionData::default(),
                "reviewer1",
            )
            .unwrap_err();

        assert!(matches!(err, ReconError::InvalidRequest(_)));

        // Fail-fast means nothing was touched
        let loaded = engine.get(&exception.id).unwrap();
        assert_eq!(loaded.status, ExceptionStatus::Unassigned);
        assert_eq!(loaded.history.len(), 1);
    }

    #[test]
    fn test_bulk_assign_moves_batch_into_review() {
        let engine = engine();
        let first = seed(&engine);
        let second = seed(&engine);

        let coordinator = BulkCoordinator::new(&engine);
        let data = BulkActionData {
            assigned_to: Some("reviewer2".to_string()),
            resolution: None,
        };
        let report = coordinator
            .apply(
                &[first.id.clone(), second.id.clone()],
                BulkAction::Assign,
                &data,
                "lead",
            )
            .unwrap();

        assert_eq!(report.applied_count, 2);
        for exception in &report.exceptions {
            assert_eq!(exception.status, ExceptionStatus::InReview);
            assert_eq!(exception.assigned_to.as_deref(), Some("reviewer2"));
        }
    }

    #[test]
    fn test_bulk_export_does_not_mutate_status() {
        let engine = engine();
        let exception = seed(&engine);

        let coordinator = BulkCoordinator::new(&engine);
        let report = coordinator
            .apply(
                &[exception.id.clone()],
                BulkAction::Export,
                &BulkActionData::default(),
                "reviewer1",
            )
            .unwrap();

        assert_eq!(report.applied_count, 1);
        assert_eq!(report.exceptions.len(), 1);

        let loaded = engine.get(&exception.id).unwrap();
        assert_eq!(loaded.status, ExceptionStatus::Unassigned);
        assert_eq!(loaded.history.last().unwrap().action, "Exported");
    }

    #[test]
    fn test_cancelled_batch_keeps_applied_items() {
        let engine = engine();
        let first = seed(&engine);
        let second = seed(&engine);

        // Flag already set: every item reports cancelled, nothing mutates
        let cancel = AtomicBool::new(true);
        let coordinator = BulkCoordinator::new(&engine);
        let report = coordinator
            .apply_with_cancel(
                &[first.id.clone(), second.id.clone()],
                BulkAction::Resolve,
                &BulkActionData::default(),
                "reviewer1",
                Some(&cancel),
            )
            .unwrap();

        assert_eq!(report.applied_count, 0);
        assert_eq!(report.skipped_count, 2);
        assert_eq!(engine.get(&first.id).unwrap().status, ExceptionStatus::Unassigned);
        assert_eq!(engine.get(&second.id).unwrap().status, ExceptionStatus::Unassigned);
    }

    #[test]
    fn test_render_csv() {
        let engine = engine();
        let exception = seed(&engine);

        let csv_text = render_csv(&[engine.get(&exception.id).unwrap()]).unwrap();
        let mut lines = csv_text.lines();

        assert!(lines.next().unwrap().starts_with("id,type,severity,status"));
        let row = lines.next().unwrap();
        assert!(row.contains(&exception.id));
        assert!(row.contains("AmountMismatch"));
        assert!(row.contains("125.00"));
    }
}
