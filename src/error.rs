use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no event log backend available: {what}")]
    MissingDependency { what: String, hint: String },
    #[error("access to '{channel}' was denied")]
    PermissionDenied { channel: String },
    #[error("event log '{channel}' not found{}", in_location(.location))]
    ChannelNotFound { channel: String, location: Option<PathBuf> },
    #[error("{0}")]
    Validation(String),
    #[error("spreadsheet formatting failed: {0}")]
    Formatting(String),
    #[error("operation cancelled by user")]
    Cancelled,
    #[error("event log query on '{channel}' failed: {detail}")]
    Query { channel: String, detail: String },
    #[error("{context}: {source}")]
    Io { context: String, #[source] source: std::io::Error },
    #[error("failed to write spreadsheet: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

fn in_location(location: &Option<PathBuf>) -> String {
    location.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default()
}

impl AppError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Io { context: context.into(), source }
    }

    /// Follow-up advice printed under the error message.
    pub fn hint(&self) -> Option<String> {
        match self {
            AppError::MissingDependency { hint, .. } => Some(hint.clone()),
            AppError::PermissionDenied { .. } => Some("Reading this log (for example 'Security') requires elevated rights. Re-run from an Administrator prompt.".to_string()),
            AppError::ChannelNotFound { location: Some(_), .. } => Some("Check that the exported .evtx file is present in the configured evtx_dir.".to_string()),
            AppError::ChannelNotFound { location: None, .. } => Some("The channel is not registered on this host.".to_string()),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self { AppError::Cancelled => 0, _ => 1 }
    }
}
