use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Typed error hierarchy for the whole pipeline.
///
/// Tool failures carry the tool name, exit status, and captured stderr so an
/// operator can act on the log line alone. The store layer reports through
/// `anyhow` and is folded into `Store` at the service boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Store(String),

    #[error("{0}")]
    Json(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("`{tool}` failed (status {status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("`{tool}` timed out after {timeout_ms}ms")]
    ToolTimedOut { tool: String, timeout_ms: u64 },

    #[error("could not parse `{tool}` output: {line}")]
    ToolOutput { tool: String, line: String },

    #[error("normalization failed for asset {asset_id}: {message}")]
    Normalization { asset_id: i64, message: String },

    #[error("transcription failed: {0}")]
    Transcription(String),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl Error {
    /// Shorthand for tool failures built from a finished process.
    pub fn tool_failed(tool: &str, status: i32, stderr: &str) -> Self {
        Error::ToolFailed {
            tool: tool.to_string(),
            status,
            stderr: stderr.trim().to_string(),
        }
    }
}
