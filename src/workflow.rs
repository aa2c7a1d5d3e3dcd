// Workflow State Machine - owns the exception review lifecycle
// unassigned → in_review → pending_approval → resolved (terminal)
//
// This module is the single authority on transition legality. Display and
// transport layers never encode the transition table themselves.

use crate::config::{ConflictPolicy, EngineConfig};
use crate::error::{ReconError, ReconResult};
use crate::model::{Exception, ExceptionStatus, HistoryEntry, MatchResult};
use crate::store::{CasOutcome, ExceptionStore};

// ============================================================================
// REVIEW ACTIONS
// ============================================================================

/// The closed set of reviewer actions. Each maps to exactly one row of the
/// transition table in [`apply_action`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewAction {
    /// Take or hand over ownership; pulls unassigned items into review
    Assign { assignee: String },
    /// Accept the discrepancy and resolve
    Accept { resolution: Option<String> },
    /// Send for manual adjustment
    Adjust,
    /// Mark duplicate records for merging (needs approval)
    Merge,
    /// Write the discrepancy off as acceptable
    Ignore,
    /// Escalate for approval
    Escalate,
    /// Drag-and-drop style move to an explicit status
    Move {
        new_status: ExceptionStatus,
        assignee: Option<String>,
    },
}

impl ReviewAction {
    pub fn name(&self) -> &'static str {
        match self {
            ReviewAction::Assign { .. } => "assign",
            ReviewAction::Accept { .. } => "accept",
            ReviewAction::Adjust => "adjust",
            ReviewAction::Merge => "merge",
            ReviewAction::Ignore => "ignore",
            ReviewAction::Escalate => "escalate",
            ReviewAction::Move { .. } => "move",
        }
    }
}

/// Resolution text used when `ignore` closes an exception.
pub const IGNORED_RESOLUTION: &str = "Ignored as acceptable discrepancy";

// ============================================================================
// TRANSITION TABLE
// ============================================================================

/// Apply one action to an exception, returning the fully-updated entity.
///
/// Pure function: on error the input is untouched and nothing partial
/// escapes - status, resolution, assignee and the new history entry all land
/// in the returned clone together. Resolution is terminal; every action on a
/// resolved exception fails with `InvalidTransition`.
pub fn apply_action(
    exception: &Exception,
    action: &ReviewAction,
    actor: &str,
) -> ReconResult<Exception> {
    if exception.is_resolved() {
        return Err(ReconError::invalid_transition(
            action.name(),
            exception.status.as_str(),
        ));
    }

    let mut next = exception.clone();

    match action {
        ReviewAction::Assign { assignee } => {
            next.assigned_to = Some(assignee.clone());
            if next.status == ExceptionStatus::Unassigned {
                next.status = ExceptionStatus::InReview;
            }
            next.history
                .push(HistoryEntry::new("Assigned", actor, &format!("Assigned to {assignee}")));
        }

        ReviewAction::Accept { resolution } => {
            let text = resolution
                .clone()
                .unwrap_or_else(|| "Accepted after review".to_string());
            next.status = ExceptionStatus::Resolved;
            next.resolution = Some(text.clone());
            next.history.push(HistoryEntry::new("Resolved", actor, &text));
        }

        ReviewAction::Adjust => {
            require_from(
                exception,
                action,
                &[ExceptionStatus::Unassigned, ExceptionStatus::InReview],
            )?;
            next.status = ExceptionStatus::InReview;
            ensure_assignee(&mut next, None, actor);
            next.history.push(HistoryEntry::new(
                "Sent for manual adjustment",
                actor,
                "Queued for manual adjustment",
            ));
        }

        ReviewAction::Merge => {
            require_from(
                exception,
                action,
                &[ExceptionStatus::Unassigned, ExceptionStatus::InReview],
            )?;
            next.status = ExceptionStatus::PendingApproval;
            ensure_assignee(&mut next, None, actor);
            next.history.push(HistoryEntry::new(
                "Marked for merging",
                actor,
                "Duplicate records marked for merging, awaiting approval",
            ));
        }

        ReviewAction::Ignore => {
            next.status = ExceptionStatus::Resolved;
            next.resolution = Some(IGNORED_RESOLUTION.to_string());
            next.history
                .push(HistoryEntry::new("Ignored", actor, IGNORED_RESOLUTION));
        }

        ReviewAction::Escalate => {
            require_from(
                exception,
                action,
                &[ExceptionStatus::Unassigned, ExceptionStatus::InReview],
            )?;
            next.status = ExceptionStatus::PendingApproval;
            ensure_assignee(&mut next, None, actor);
            next.history.push(HistoryEntry::new(
                "Escalated for approval",
                actor,
                "Escalated for approval",
            ));
        }

        ReviewAction::Move {
            new_status,
            assignee,
        } => {
            next.status = *new_status;
            match new_status {
                ExceptionStatus::Unassigned => {
                    // Back to the pool - nobody owns it anymore
                    next.assigned_to = None;
                }
                ExceptionStatus::Resolved => {
                    if next.resolution.is_none() {
                        next.resolution = Some("Resolved".to_string());
                    }
                }
                _ => ensure_assignee(&mut next, assignee.clone(), actor),
            }
            next.history.push(HistoryEntry::new(
                "Status changed",
                actor,
                &format!("{} → {}", exception.status.as_str(), new_status.as_str()),
            ));
        }
    }

    debug_assert!(next.invariants_hold());
    Ok(next)
}

fn require_from(
    exception: &Exception,
    action: &ReviewAction,
    allowed: &[ExceptionStatus],
) -> ReconResult<()> {
    if allowed.contains(&exception.status) {
        Ok(())
    } else {
        Err(ReconError::invalid_transition(
            action.name(),
            exception.status.as_str(),
        ))
    }
}

/// An exception cannot be "in review" by nobody: when a transition lands in
/// a state that requires an owner and none is set, the acting reviewer
/// takes it.
fn ensure_assignee(exception: &mut Exception, explicit: Option<String>, actor: &str) {
    if let Some(assignee) = explicit {
        exception.assigned_to = Some(assignee);
    } else if exception.assigned_to.is_none() {
        exception.assigned_to = Some(actor.to_string());
    }
}

// ============================================================================
// WORKFLOW ENGINE (transitions against the shared store)
// ============================================================================

/// Drives transitions through the store's per-entity compare-and-swap so two
/// concurrent reviewers on the same exception are applied in a total order.
pub struct WorkflowEngine<S: ExceptionStore> {
    store: S,
    config: EngineConfig,
}

/// Retry budget for last-writer-wins before giving up with a conflict.
const MAX_CAS_RETRIES: u32 = 5;

impl<S: ExceptionStore> WorkflowEngine<S> {
    pub fn new(store: S) -> Self {
        WorkflowEngine {
            store,
            config: EngineConfig::new(),
        }
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        WorkflowEngine { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify a MatchResult and persist the new exception.
    pub fn create_from_match(&self, result: &MatchResult) -> ReconResult<Exception> {
        let classifier = crate::classifier::ExceptionClassifier::from_config(&self.config);
        let exception = classifier.classify(result)?;
        let stored = self.store.insert(&exception)?;
        tracing::info!(
            id = %stored.id,
            exception_type = stored.exception_type.as_str(),
            severity = stored.severity.as_str(),
            "exception created"
        );
        Ok(stored)
    }

    /// Filtered, paginated view over the exception set. The requested limit
    /// is clamped to the configured maximum before it reaches the store.
    pub fn query(
        &self,
        filter: &crate::query::ExceptionFilter,
        page: crate::query::PageRequest,
    ) -> ReconResult<crate::query::QueryResult> {
        let page = page.normalized(self.config.max_page_limit);
        let (items, total) = self.store.query(filter, page)?;
        Ok(crate::query::QueryResult {
            items,
            page_info: crate::query::PageInfo::new(page, total),
        })
    }

    pub fn get(&self, id: &str) -> ReconResult<Exception> {
        self.store
            .get(id)?
            .ok_or_else(|| ReconError::NotFound(id.to_string()))
    }

    /// Apply one transition atomically: read, transform, compare-and-swap.
    ///
    /// Under `last-writer-wins` a lost race is retried against the winner's
    /// state; under `reject` it surfaces as a conflict and the caller
    /// retries. Either way no partial mutation is ever visible.
    pub fn apply(&self, id: &str, action: &ReviewAction, actor: &str) -> ReconResult<Exception> {
        for _ in 0..MAX_CAS_RETRIES {
            let current = self.get(id)?;
            let updated = apply_action(&current, action, actor)?;

            match self.store.compare_and_swap(current.version, &updated)? {
                CasOutcome::Applied(stored) => {
                    tracing::debug!(id, action = action.name(), actor, "transition applied");
                    return Ok(stored);
                }
                CasOutcome::VersionMismatch => match self.config.conflict_policy {
                    ConflictPolicy::LastWriterWins => continue,
                    ConflictPolicy::Reject => return Err(ReconError::Conflict(id.to_string())),
                },
                CasOutcome::Missing => return Err(ReconError::NotFound(id.to_string())),
            }
        }

        Err(ReconError::Conflict(id.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
