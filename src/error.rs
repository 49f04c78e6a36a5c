use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ElError {
    #[error("missing PROJECT_ID environment variable")]
    #[diagnostic(help("set PROJECT_ID in the environment or in a .env file"))]
    MissingProjectId,

    #[error("invalid run period: year={year}, month={month}")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to obtain access token: {0}")]
    Auth(String),

    #[error("Firestore request failed: {0}")]
    StoreHttp(String),

    #[error("Firestore returned status {status}: {message}")]
    StoreStatus { status: u16, message: String },

    #[error("unexpected Firestore response: {0}")]
    StoreResponse(String),

    #[error("BigQuery request failed: {0}")]
    WarehouseHttp(String),

    #[error("BigQuery returned status {status}: {message}")]
    WarehouseStatus { status: u16, message: String },

    #[error("BigQuery load job failed: {0}")]
    WarehouseJob(String),
}

impl ElError {
    /// Errors raised before any network activity.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ElError::MissingProjectId
                | ElError::InvalidPeriod { .. }
                | ElError::InvalidConfig(_)
        )
    }
}

/// Batch-level shape problems found while normalizing one category.
///
/// These never abort a run: the category is logged and contributes zero rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("missing expected columns: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("document {document}: field {field} expected {expected}, found {found}")]
    TypeMismatch {
        document: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}
