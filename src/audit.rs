// Audit Trail Recorder - append-only history and comments
//
// Appends are not workflow transitions: they never touch status, assignee
// or resolution, and they are legal on resolved exceptions (exporting or
// discussing a closed item is normal). There is no update or delete here,
// ever. Timestamps are assigned server-side at append time so the trail has
// a total order regardless of what clients claim.

use crate::error::{ReconError, ReconResult};
use crate::model::{Comment, Exception, HistoryEntry};
use crate::store::{CasOutcome, ExceptionStore};
use chrono::Utc;

pub struct AuditRecorder<'a, S: ExceptionStore> {
    store: &'a S,
}

/// Appends commute, so a lost CAS race is always retried.
const MAX_APPEND_RETRIES: u32 = 10;

impl<'a, S: ExceptionStore> AuditRecorder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        AuditRecorder { store }
    }

    /// Append one immutable history entry.
    pub fn record(
        &self,
        exception_id: &str,
        action: &str,
        details: &str,
        actor: &str,
    ) -> ReconResult<Exception> {
        self.append(exception_id, |exception| {
            exception
                .history
                .push(HistoryEntry::new(action, actor, details));
        })
    }

    /// Append one comment to the discussion trail.
    pub fn comment(&self, exception_id: &str, author: &str, body: &str) -> ReconResult<Exception> {
        self.append(exception_id, |exception| {
            exception.comments.push(Comment {
                author: author.to_string(),
                body: body.to_string(),
                timestamp: Utc::now(),
            });
        })
    }

    fn append<F>(&self, exception_id: &str, mutate: F) -> ReconResult<Exception>
    where
        F: Fn(&mut Exception),
    {
        for _ in 0..MAX_APPEND_RETRIES {
            let current = self
                .store
                .get(exception_id)?
                .ok_or_else(|| ReconError::NotFound(exception_id.to_string()))?;

            let mut updated = current.clone();
            mutate(&mut updated);

            match self.store.compare_and_swap(current.version, &updated)? {
                CasOutcome::Applied(stored) => return Ok(stored),
                CasOutcome::VersionMismatch => continue,
                CasOutcome::Missing => {
                    return Err(ReconError::NotFound(exception_id.to_string()))
                }
            }
        }

        Err(ReconError::Conflict(exception_id.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExceptionStatus, ExceptionType, Severity};
    use crate::store::SqliteExceptionStore;

    fn seed(store: &SqliteExceptionStore) -> Exception {
        let exception = Exception {
            id: uuid::Uuid::new_v4().to_string(),
            exception_type: ExceptionType::DateMismatch,
            severity: Severity::Low,
            amount: 75.00,
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
        store.insert(&exception).unwrap()
    }

    #[test]
    fn test_record_appends_in_order() {
        let store = SqliteExceptionStore::open_in_memory().unwrap();
        let exception = seed(&store);
        let recorder = AuditRecorder::new(&store);

        recorder
            .record(&exception.id, "Exported", "Included in batch export", "reviewer1")
            .unwrap();
        let after = recorder
            .record(&exception.id, "Exported", "Included in second export", "reviewer2")
            .unwrap();

        assert_eq!(after.history.len(), 3);
        assert_eq!(after.history[1].action, "Exported");
        assert_eq!(after.history[2].actor, "reviewer2");
        // Server-assigned timestamps are totally ordered
        assert!(after.history[1].timestamp <= after.history[2].timestamp);
    }

    #[test]
    fn test_record_leaves_lifecycle_untouched() {
        let store = SqliteExceptionStore::open_in_memory().unwrap();
        let exception = seed(&store);
        let recorder = AuditRecorder::new(&store);

        let after = recorder
            .record(&exception.id, "Exported", "details", "reviewer1")
            .unwrap();

        assert_eq!(after.status, exception.status);
        assert_eq!(after.assigned_to, exception.assigned_to);
        assert_eq!(after.resolution, exception.resolution);
        assert_eq!(after.version, exception.version + 1);
    }

    #[test]
    fn test_comment_appends() {
        let store = SqliteExceptionStore::open_in_memory().unwrap();
        let exception = seed(&store);
        let recorder = AuditRecorder::new(&store);

        recorder
            .comment(&exception.id, "reviewer1", "Checked the bank feed")
            .unwrap();
        let after = recorder
            .comment(&exception.id, "reviewer2", "Agreed, looks like date drift")
            .unwrap();

        assert_eq!(after.comments.len(), 2);
        assert_eq!(after.comments[0].author, "reviewer1");
        assert_eq!(after.comments[1].body, "Agreed, looks like date drift");
        // Comments never touch the history trail
        assert_eq!(after.history.len(), 1);
    }

    #[test]
    fn test_comment_on_resolved_exception_is_allowed() {
        let store = SqliteExceptionStore::open_in_memory().unwrap();
        let exception = seed(&store);

        let resolved = crate::workflow::apply_action(
            &exception,
            &crate::workflow::ReviewAction::Ignore,
            "reviewer1",
        )
        .unwrap();
        store.compare_and_swap(exception.version, &resolved).unwrap();

        let recorder = AuditRecorder::new(&store);
        let after = recorder
            .comment(&exception.id, "auditor", "Spot-checked during Q1 close")
            .unwrap();

        assert_eq!(after.status, ExceptionStatus::Resolved);
        assert_eq!(after.comments.len(), 1);
    }

    #[test]
    fn test_record_unknown_id() {
        let store = SqliteExceptionStore::open_in_memory().unwrap();
        let recorder = AuditRecorder::new(&store);

        let err = recorder
            .record("no-such-id", "Exported", "details", "reviewer1")
            .unwrap_err();
        assert!(matches!(err, ReconError::NotFound(_)));
    }
}
