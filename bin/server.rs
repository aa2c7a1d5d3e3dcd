// Recon Workbench - Exception Review API Server
// HTTP/JSON surface over the workflow engine. The server is transport glue
// only: transition legality lives in the workflow module, and a client's
// proposed kanban move is never trusted without it.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use recon_workbench::{
    group_by_status, AssigneeFilter, AuditRecorder, BulkAction, BulkActionData, BulkCoordinator,
    ConflictPolicy, EngineConfig, ExceptionFilter, ExceptionStatus, ExceptionType, MatchResult,
    PageRequest, ReconError, ReviewAction, Severity, SqliteExceptionStore, WorkflowEngine,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<WorkflowEngine<SqliteExceptionStore>>,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

fn api_error(message: String) -> ApiResponse<()> {
    ApiResponse {
        success: false,
        data: None,
        error: Some(message),
    }
}

/// Map domain errors onto HTTP status codes.
fn error_response(err: ReconError) -> (StatusCode, Json<ApiResponse<()>>) {
    let status = match &err {
        ReconError::NotFound(_) => StatusCode::NOT_FOUND,
        ReconError::InvalidTransition { .. } | ReconError::Conflict(_) => StatusCode::CONFLICT,
        ReconError::UnknownAction(_)
        | ReconError::InvalidRequest(_)
        | ReconError::Classification(_) => StatusCode::BAD_REQUEST,
        ReconError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }

    (status, Json(api_error(err.to_string())))
}

/// Caller identity, threaded through every mutating operation. There is no
/// global "current user"; the reviewer comes from the request itself.
fn actor_from(headers: &HeaderMap, fallback: Option<&str>) -> String {
    headers
        .get("x-reviewer")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| "system".to_string())
}

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

#[derive(Deserialize)]
struct ListParams {
    #[serde(rename = "type")]
    exception_type: Option<String>,
    severity: Option<String>,
    status: Option<String>,
    assignee: Option<String>,
    #[serde(rename = "amountMin")]
    amount_min: Option<f64>,
    #[serde(rename = "amountMax")]
    amount_max: Option<f64>,
    #[serde(rename = "dateFrom")]
    date_from: Option<String>,
    #[serde(rename = "dateTo")]
    date_to: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(rename = "groupBy")]
    group_by: Option<String>,
}

impl ListParams {
    fn to_filter(&self) -> Result<ExceptionFilter, ReconError> {
        let mut filter = ExceptionFilter::new();

        if let Some(raw) = &self.exception_type {
            filter.exception_type = Some(
                ExceptionType::parse(raw)
                    .ok_or_else(|| ReconError::InvalidRequest(format!("unknown type '{raw}'")))?,
            );
        }
        if let Some(raw) = &self.severity {
            filter.severity = Some(Severity::parse(raw).ok_or_else(|| {
                ReconError::InvalidRequest(format!("unknown severity '{raw}'"))
            })?);
        }
        if let Some(raw) = &self.status {
            filter.status = Some(ExceptionStatus::parse(raw).ok_or_else(|| {
                ReconError::InvalidRequest(format!("unknown status '{raw}'"))
            })?);
        }
        if let Some(raw) = &self.assignee {
            filter.assignee = Some(AssigneeFilter::parse(raw));
        }
        filter.amount_min = self.amount_min;
        filter.amount_max = self.amount_max;
        if let Some(raw) = &self.date_from {
            filter.date_from = Some(parse_date(raw)?);
        }
        if let Some(raw) = &self.date_to {
            filter.date_to = Some(parse_date(raw)?);
        }

        Ok(filter)
    }

    fn to_page(&self) -> PageRequest {
        PageRequest::new(self.page.unwrap_or(1), self.limit.unwrap_or(20))
    }
}

fn parse_date(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, ReconError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|_| ReconError::InvalidRequest(format!("invalid RFC3339 date '{raw}'")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    action: Option<String>,
    status: Option<String>,
    resolution: Option<String>,
    assigned_to: Option<String>,
}

impl UpdateRequest {
    /// Resolve the request into a workflow action. A named action wins;
    /// a bare status is treated as a move.
    fn to_action(&self) -> Result<ReviewAction, ReconError> {
        if let Some(name) = &self.action {
            return match name.as_str() {
                "assign" => {
                    let assignee = self.assigned_to.clone().ok_or_else(|| {
                        ReconError::InvalidRequest("assign requires assignedTo".to_string())
                    })?;
                    Ok(ReviewAction::Assign { assignee })
                }
                "accept" => Ok(ReviewAction::Accept {
                    resolution: self.resolution.clone(),
                }),
                "adjust" => Ok(ReviewAction::Adjust),
                "merge" => Ok(ReviewAction::Merge),
                "ignore" => Ok(ReviewAction::Ignore),
                "escalate" => Ok(ReviewAction::Escalate),
                other => Err(ReconError::InvalidRequest(format!(
                    "unknown transition action '{other}'"
                ))),
            };
        }

        if let Some(raw) = &self.status {
            let new_status = ExceptionStatus::parse(raw)
                .ok_or_else(|| ReconError::InvalidRequest(format!("unknown status '{raw}'")))?;
            // Resolving via a bare status must carry the caller's resolution
            // text; a plain move would replace it with the default.
            if new_status == ExceptionStatus::Resolved {
                return Ok(ReviewAction::Accept {
                    resolution: self.resolution.clone(),
                });
            }
            return Ok(ReviewAction::Move {
                new_status,
                assignee: self.assigned_to.clone(),
            });
        }

        Err(ReconError::InvalidRequest(
            "request needs either an action or a status".to_string(),
        ))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRequest {
    assigned_to: String,
}

#[derive(Deserialize)]
struct CommentRequest {
    author: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest {
    new_status: String,
    assigned_to: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    exception_ids: Vec<String>,
    action: String,
    #[serde(default)]
    data: BulkActionData,
}

// ============================================================================
// API HANDLERS
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/exceptions - classify a match result into a new exception
async fn create_exception(
    State(state): State<AppState>,
    Json(body): Json<MatchResult>,
) -> impl IntoResponse {
    match state.engine.create_from_match(&body) {
        Ok(exception) => (StatusCode::CREATED, Json(ApiResponse::ok(exception))).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// GET /api/exceptions - filtered, paginated list (or kanban grouping)
async fn list_exceptions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(err) => return error_response(err).into_response(),
    };

    match state.engine.query(&filter, params.to_page()) {
        Ok(result) => {
            if params.group_by.as_deref() == Some("status") {
                let buckets: Vec<serde_json::Value> = group_by_status(result.items)
                    .into_iter()
                    .map(|(status, items)| {
                        serde_json::json!({ "status": status, "exceptions": items })
                    })
                    .collect();
                return Json(serde_json::json!({
                    "success": true,
                    "buckets": buckets,
                    "pagination": result.page_info,
                }))
                .into_response();
            }

            Json(serde_json::json!({
                "success": true,
                "exceptions": result.items,
                "pagination": result.page_info,
            }))
            .into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}

/// GET /api/exceptions/:id
async fn get_exception(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.engine.get(&id) {
        Ok(exception) => Json(ApiResponse::ok(exception)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// PUT /api/exceptions/:id - apply a named transition
async fn update_exception(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateRequest>,
) -> impl IntoResponse {
    let action = match body.to_action() {
        Ok(action) => action,
        Err(err) => return error_response(err).into_response(),
    };
    let actor = actor_from(&headers, body.assigned_to.as_deref());

    match state.engine.apply(&id, &action, &actor) {
        Ok(exception) => Json(ApiResponse::ok(exception)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// POST /api/exceptions/:id/assign
async fn assign_exception(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AssignRequest>,
) -> impl IntoResponse {
    let actor = actor_from(&headers, Some(&body.assigned_to));
    let action = ReviewAction::Assign {
        assignee: body.assigned_to,
    };

    match state.engine.apply(&id, &action, &actor) {
        Ok(exception) => Json(ApiResponse::ok(exception)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// POST /api/exceptions/:id/comments
async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CommentRequest>,
) -> impl IntoResponse {
    let author = actor_from(&headers, Some(&body.author));
    let recorder = AuditRecorder::new(state.engine.store());

    match recorder.comment(&id, &author, &body.content) {
        Ok(exception) => Json(ApiResponse::ok(exception)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// POST /api/exceptions/:id/move - drag-and-drop kanban transition.
/// The server is the arbiter: an illegal move comes back 409 and the
/// client reverts the card.
async fn move_exception(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MoveRequest>,
) -> impl IntoResponse {
    let new_status = match ExceptionStatus::parse(&body.new_status) {
        Some(status) => status,
        None => {
            return error_response(ReconError::InvalidRequest(format!(
                "unknown status '{}'",
                body.new_status
            )))
            .into_response()
        }
    };

    let actor = actor_from(&headers, body.assigned_to.as_deref());
    let action = ReviewAction::Move {
        new_status,
        assignee: body.assigned_to.clone(),
    };

    match state.engine.apply(&id, &action, &actor) {
        Ok(exception) => Json(ApiResponse::ok(exception)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// POST /api/exceptions/bulk-update
async fn bulk_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BulkRequest>,
) -> impl IntoResponse {
    // An unknown action fails the whole call before touching any exception
    let action: BulkAction = match body.action.parse() {
        Ok(action) => action,
        Err(err) => return error_response(err).into_response(),
    };

    let actor = actor_from(&headers, body.data.assigned_to.as_deref());
    let coordinator = BulkCoordinator::new(&state.engine);

    match coordinator.apply(&body.exception_ids, action, &body.data, &actor) {
        Ok(report) => Json(serde_json::json!({
            "success": true,
            "appliedCount": report.applied_count,
            "skippedCount": report.skipped_count,
            "results": report.results,
            "exceptions": report.exceptions,
        }))
        .into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

// ============================================================================
// MAIN SERVER
// ============================================================================

fn config_from_env() -> EngineConfig {
    let mut config = EngineConfig::new();

    if let Ok(raw) = std::env::var("RECON_HIGH_AMOUNT_THRESHOLD") {
        if let Ok(threshold) = raw.parse() {
            config = config.with_high_amount_threshold(threshold);
        }
    }
    if let Ok(raw) = std::env::var("RECON_MAX_PAGE_LIMIT") {
        if let Ok(limit) = raw.parse() {
            config = config.with_max_page_limit(limit);
        }
    }
    if let Ok(raw) = std::env::var("RECON_CONFLICT_POLICY") {
        if let Some(policy) = ConflictPolicy::parse(&raw) {
            config = config.with_conflict_policy(policy);
        }
    }

    config
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recon_workbench=info,recon_server=info".into()),
        )
        .init();

    let db_path = std::env::var("RECON_DB").unwrap_or_else(|_| "exceptions.db".to_string());
    let store = SqliteExceptionStore::open(FsPath::new(&db_path))?;
    tracing::info!(db = %db_path, "exception store opened");

    let config = config_from_env();
    tracing::info!(?config, "engine configured");

    let state = AppState {
        engine: Arc::new(WorkflowEngine::with_config(store, config)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/exceptions", post(create_exception).get(list_exceptions))
        .route("/exceptions/bulk-update", post(bulk_update))
        .route("/exceptions/:id", get(get_exception).put(update_exception))
        .route("/exceptions/:id/assign", post(assign_exception))
        .route("/exceptions/:id/comments", post(add_comment))
        .route("/exceptions/:id/move", post(move_exception))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let port = std::env::var("RECON_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "recon server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn update(
        action: Option<&str>,
        status: Option<&str>,
        resolution: Option<&str>,
        assigned_to: Option<&str>,
    ) -> UpdateRequest {
        UpdateRequest {
            action: action.map(str::to_string),
            status: status.map(str::to_string),
            resolution: resolution.map(str::to_string),
            assigned_to: assigned_to.map(str::to_string),
        }
    }

    #[test]
    fn test_bare_resolved_status_keeps_caller_resolution() {
        let body = update(None, Some("resolved"), Some("Q1 writeoff"), None);

        let action = body.to_action().unwrap();
        assert_eq!(
            action,
            ReviewAction::Accept {
                resolution: Some("Q1 writeoff".to_string()),
            }
        );
    }

    #[test]
    fn test_bare_non_terminal_status_maps_to_move() {
        let body = update(None, Some("in_review"), None, Some("reviewer1"));

        let action = body.to_action().unwrap();
        assert_eq!(
            action,
            ReviewAction::Move {
                new_status: ExceptionStatus::InReview,
                assignee: Some("reviewer1".to_string()),
            }
        );
    }

    #[test]
    fn test_named_action_wins_over_status() {
        let body = update(Some("escalate"), Some("resolved"), None, None);
        assert_eq!(body.to_action().unwrap(), ReviewAction::Escalate);
    }

    #[test]
    fn test_assign_without_assignee_is_rejected() {
        let body = update(Some("assign"), None, None, None);
        assert!(matches!(
            body.to_action().unwrap_err(),
            ReconError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_empty_update_is_rejected() {
        let body = update(None, None, None, None);
        assert!(matches!(
            body.to_action().unwrap_err(),
            ReconError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let body = update(None, Some("reopened"), None, None);
        assert!(matches!(
            body.to_action().unwrap_err(),
            ReconError::InvalidRequest(_)
        ));
    }
}
