//! Shared data types for cell content and addressing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cell's scalar content. Spreadsheet cells never nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Best-effort numeric coercion used by statistics, pivot aggregation,
    /// and sort/filter comparisons. Non-numeric text that doesn't parse as
    /// a number becomes NaN rather than failing the caller.
    pub fn as_f64_lossy(&self) -> f64 {
        match self {
            CellValue::Number(n) => *n,
            CellValue::Text(s) => s.parse().unwrap_or(f64::NAN),
            CellValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            CellValue::Null => f64::NAN,
        }
    }

    /// Text rendering used for equality/contains comparisons.
    pub fn as_text_lossy(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => b.to_string(),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Null
    }
}

/// A cell's full content: value, optional formula, optional format overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CellData {
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub format: BTreeMap<String, serde_json::Value>,
}

impl CellData {
    pub fn value(value: CellValue) -> Self {
        Self {
            value,
            formula: None,
            format: BTreeMap::new(),
        }
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            value: CellValue::Null,
            formula: Some(formula.into()),
            format: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.formula.is_none() && self.format.is_empty()
    }
}

/// 1-based (row, col) coordinate within a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// A resolved, fully-qualified cell address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

/// A resolved rectangular range, always normalized so `start <= end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeAddress {
    pub sheet: String,
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl RangeAddress {
    pub fn single_cell(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet: sheet.into(),
            start_row: row,
            start_col: col,
            end_row: row,
            end_col: col,
        }
    }

    pub fn rows(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.rows() as u64 * self.cols() as u64
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        coord.row >= self.start_row
            && coord.row <= self.end_row
            && coord.col >= self.start_col
            && coord.col <= self.end_col
    }

    /// True if this range and `other` share any cell on the same sheet.
    pub fn intersects(&self, other: &RangeAddress) -> bool {
        self.sheet == other.sheet
            && self.start_row <= other.end_row
            && other.start_row <= self.end_row
            && self.start_col <= other.end_col
            && other.start_col <= self.end_col
    }

    /// Smallest range containing both `self` and `other` (must share a sheet).
    pub fn union(&self, other: &RangeAddress) -> RangeAddress {
        debug_assert_eq!(self.sheet, other.sheet);
        RangeAddress {
            sheet: self.sheet.clone(),
            start_row: self.start_row.min(other.start_row),
            start_col: self.start_col.min(other.start_col),
            end_row: self.end_row.max(other.end_row),
            end_col: self.end_col.max(other.end_col),
        }
    }
}

/// The outcome of a single tool invocation, shared across the executor, DLP
/// enforcement, and preview/audit layers. On failure `data` is omitted —
/// no partial state is ever returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Number of cells the tool itself reports as touched, independent of
    /// any later diff-based count (used by the preview gate's threshold).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched_cells: Option<u64>,
}

impl ToolResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(error_code.into()),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_touched_cells(mut self, count: u64) -> Self {
        self.touched_cells = Some(count);
        self
    }
}
