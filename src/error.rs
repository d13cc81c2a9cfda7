//! Error taxonomy for tool execution, DLP enforcement, and cache operations.
//!
//! Tools never propagate Rust errors to their caller: every failure is
//! normalized into one of four externally-visible kinds and attached to the
//! result envelope instead. Internally we keep a finer-grained [`ErrorCode`]
//! so logs and metrics can tell "sheet not found" apart from "invalid range"
//! without changing what callers see.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The four externally-visible error kinds a tool result can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    ValidationError,
    NotImplemented,
    PermissionDenied,
    RuntimeError,
}

impl fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorCode::ValidationError => "validation_error",
            ToolErrorCode::NotImplemented => "not_implemented",
            ToolErrorCode::PermissionDenied => "permission_denied",
            ToolErrorCode::RuntimeError => "runtime_error",
        };
        write!(f, "{s}")
    }
}

/// Finer-grained internal error code, used for logs and telemetry only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    UnknownTool = -32001,
    SchemaValidationFailed = -32002,
    InvalidRange = -32003,
    RangeTooLarge = -32004,
    ExternalDataDisabled = -32005,
    HostNotAllowed = -32006,
    ResponseTooLarge = -32007,
    AnomalyMethodUnsupported = -32008,
    CorrelationRequiresTwoColumns = -32009,
    DlpBlocked = -32010,
    SheetNotFound = -32011,
    Internal = -32099,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn taxonomy(&self) -> ToolErrorCode {
        match self {
            ErrorCode::UnknownTool | ErrorCode::AnomalyMethodUnsupported => {
                ToolErrorCode::NotImplemented
            }
            ErrorCode::SchemaValidationFailed
            | ErrorCode::InvalidRange
            | ErrorCode::CorrelationRequiresTwoColumns => ToolErrorCode::ValidationError,
            ErrorCode::RangeTooLarge
            | ErrorCode::ExternalDataDisabled
            | ErrorCode::HostNotAllowed
            | ErrorCode::ResponseTooLarge
            | ErrorCode::DlpBlocked => ToolErrorCode::PermissionDenied,
            ErrorCode::SheetNotFound | ErrorCode::Internal => ToolErrorCode::RuntimeError,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::UnknownTool | ErrorCode::AnomalyMethodUnsupported => "not_implemented",
            ErrorCode::SchemaValidationFailed
            | ErrorCode::InvalidRange
            | ErrorCode::CorrelationRequiresTwoColumns => "validation_error",
            ErrorCode::RangeTooLarge
            | ErrorCode::ExternalDataDisabled
            | ErrorCode::HostNotAllowed
            | ErrorCode::ResponseTooLarge
            | ErrorCode::DlpBlocked => "permission_denied",
            ErrorCode::SheetNotFound | ErrorCode::Internal => "runtime_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

/// Structured context attached to a [`GovernorError`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub tool: Option<String>,
    pub sheet_name: Option<String>,
    pub range: Option<String>,
    pub field: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
}

/// The crate's internal error type. `message`/`code` form the externally
/// visible `{code, message}` pair on a `ToolResult::error`.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorError {
    pub code: ErrorCode,
    pub message: String,
    pub context: ErrorContext,
}

impl GovernorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
        };
        error.track();
        error
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaValidationFailed, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownTool, message)
    }

    pub fn permission_denied(code: ErrorCode, message: impl Into<String>) -> Self {
        debug_assert_eq!(code.taxonomy(), ToolErrorCode::PermissionDenied);
        Self::new(code, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.context.tool = Some(tool.into());
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.context.range = Some(range.into());
        self
    }

    pub fn taxonomy(&self) -> ToolErrorCode {
        self.code.taxonomy()
    }

    fn track(&self) {
        ERROR_METRICS.record(self.code);
    }
}

impl fmt::Display for GovernorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for GovernorError {}

/// Process-wide error counters, grouped by category for operator dashboards.
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    by_code: RwLock<HashMap<ErrorCode, AtomicU64>>,
    by_category: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn record(&self, code: ErrorCode) {
        {
            let map = self.by_code.read();
            if let Some(counter) = map.get(&code) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(map);
                self.by_code
                    .write()
                    .entry(code)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        let category = code.category();
        let map = self.by_category.read();
        if let Some(counter) = map.get(category) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            drop(map);
            self.by_category
                .write()
                .entry(category)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(error_code = %code, category, "error recorded");
    }

    pub fn count(&self, code: ErrorCode) -> u64 {
        self.by_code
            .read()
            .get(&code)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

pub static ERROR_METRICS: Lazy<ErrorMetrics> = Lazy::new(ErrorMetrics::default);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_mapping_is_stable() {
        assert_eq!(ErrorCode::UnknownTool.taxonomy(), ToolErrorCode::NotImplemented);
        assert_eq!(ErrorCode::RangeTooLarge.taxonomy(), ToolErrorCode::PermissionDenied);
        assert_eq!(ErrorCode::Internal.taxonomy(), ToolErrorCode::RuntimeError);
    }

    #[test]
    fn display_shows_code_and_message() {
        let err = GovernorError::validation("bad row").with_tool("sort_range");
        assert!(format!("{err}").contains("bad row"));
        assert_eq!(err.context.tool.as_deref(), Some("sort_range"));
    }
}
