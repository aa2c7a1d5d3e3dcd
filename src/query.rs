// Query/Filter Service types - filtered, paginated views for the review UI
// All filters are optional and combine with logical AND.

use crate::model::{Exception, ExceptionStatus, ExceptionType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// FILTERS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AssigneeFilter {
    /// Sentinel "unassigned": matches assigned_to == NULL
    Unassigned,
    Reviewer(String),
}

impl AssigneeFilter {
    pub fn parse(s: &str) -> Self {
        if s == "unassigned" {
            AssigneeFilter::Unassigned
        } else {
            AssigneeFilter::Reviewer(s.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExceptionFilter {
    pub exception_type: Option<ExceptionType>,
    pub severity: Option<Severity>,
    pub status: Option<ExceptionStatus>,
    pub assignee: Option<AssigneeFilter>,
    /// Inclusive amount range
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    /// Inclusive range over the exception timestamp
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl ExceptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, exception_type: ExceptionType) -> Self {
        self.exception_type = Some(exception_type);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_status(mut self, status: ExceptionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_assignee(mut self, assignee: AssigneeFilter) -> Self {
        self.assignee = Some(assignee);
        self
    }

    pub fn with_amount_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.amount_min = min;
        self.amount_max = max;
        self
    }

    pub fn with_date_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }
}

// ============================================================================
// PAGINATION
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    /// 1-indexed
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        PageRequest { page, limit }
    }

    /// Clamp to sane bounds: page >= 1, 1 <= limit <= max_limit.
    pub fn normalized(&self, max_limit: u32) -> PageRequest {
        PageRequest {
            page: self.page.max(1),
            limit: self.limit.clamp(1, max_limit.max(1)),
        }
    }

    /// Safe on un-normalized input: page 0 reads as page 1.
    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1) * self.limit
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub total_pages: u32,
    pub total_results: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(request: PageRequest, total_results: u64) -> Self {
        let total_pages = total_pages(total_results, request.limit);
        PageInfo {
            page: request.page,
            total_pages,
            total_results,
            has_next: request.page < total_pages,
            has_prev: request.page > 1 && total_results > 0,
        }
    }
}

pub fn total_pages(total_results: u64, limit: u32) -> u32 {
    if total_results == 0 {
        0
    } else {
        ((total_results + limit as u64 - 1) / limit as u64) as u32
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub items: Vec<Exception>,
    pub page_info: PageInfo,
}

// ============================================================================
// KANBAN GROUPING
// ============================================================================

/// Bucket exceptions by status for the kanban view.
/// Every bucket is present even when empty; iteration order follows the
/// lifecycle (unassigned, in_review, pending_approval, resolved) because
/// ExceptionStatus derives Ord in declaration order.
pub fn group_by_status(items: Vec<Exception>) -> BTreeMap<ExceptionStatus, Vec<Exception>> {
    let mut buckets: BTreeMap<ExceptionStatus, Vec<Exception>> = ExceptionStatus::ALL
        .iter()
        .map(|status| (*status, Vec::new()))
        .collect();

    for item in items {
        buckets.entry(item.status).or_default().push(item);
    }

    buckets
}

// ============================================================================
// TESTS
// ============================================================================
