use std::path::PathBuf;

use thiserror::Error;

use crate::tracker::dispatch::TransportError;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Error type covering the failures that can occur while loading settings,
/// reading sources, or talking to the remote sheet store.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Wrapper for IO failures such as reading settings or source files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Errors bubbled up from the CSV reader.
    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    /// Raised when the HTTP client cannot be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Raised when a request could not be delivered, retries included.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Raised when the settings are malformed or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Raised when a mapping references a source that is not available.
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    /// Raised when a lookup column title does not exist on the target sheet.
    #[error("lookup column '{column}' not found in sheet '{sheet}'")]
    LookupColumnNotFound { column: String, sheet: String },

    /// The store refused access to the sheet.
    #[error("access to sheet {0} forbidden; check the access token")]
    SheetForbidden(i64),

    /// The sheet does not exist.
    #[error("sheet {0} not found; check the sheetId in mapping.json")]
    SheetNotFound(i64),

    /// Any other non-success status while fetching a sheet.
    #[error("fetching sheet {sheet_id} failed with status {status}")]
    SheetFetch { sheet_id: i64, status: u16 },

    /// Raised when the user provides a path that does not exist.
    #[error("input not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
