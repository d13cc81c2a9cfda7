pub mod address;
pub mod audit;
pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod dlp;
pub mod error;
pub mod executor;
pub mod logging;
pub mod model;
pub mod pivot;
pub mod preview;
pub mod stats;
pub mod workbook;

pub use config::{CliArgs, LogFormat, ServerConfig};
pub use error::{ERROR_METRICS, ErrorCode, ErrorMetrics, GovernorError, ToolErrorCode};
pub use executor::{Executor, ExecutorConfig, ToolCall};
pub use logging::init as init_logging;
pub use model::{CellData, CellValue, RangeAddress, ToolResult};
pub use workbook::{InMemoryWorkbook, SpreadsheetApi};
