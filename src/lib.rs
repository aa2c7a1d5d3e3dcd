// Recon Workbench - Exception Resolution Workflow Engine
// Exposes all modules for use in the CLI, API server, and tests

pub mod audit;
pub mod bulk;
pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use audit::AuditRecorder;
pub use bulk::{
    render_csv, BulkAction, BulkActionData, BulkCoordinator, BulkItemResult, BulkReport,
    ItemOutcome, DEFAULT_BULK_RESOLUTION,
};
pub use classifier::ExceptionClassifier;
pub use config::{ConflictPolicy, EngineConfig};
pub use error::{ReconError, ReconResult};
pub use model::{
    AiSuggestion, Comment, Exception, ExceptionStatus, ExceptionType, FieldDifference,
    HistoryEntry, MatchResult, MatchStatus, RecordSnapshot, Severity,
};
pub use query::{
    group_by_status, AssigneeFilter, ExceptionFilter, PageInfo, PageRequest, QueryResult,
};
pub use store::{setup_database, CasOutcome, ExceptionStore, SqliteExceptionStore};
pub use workflow::{apply_action, ReviewAction, WorkflowEngine, IGNORED_RESOLUTION};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
