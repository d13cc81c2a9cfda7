//! Tool Executor: validates tool calls against per-tool parameter
//! schemas, enforces the range-size gate, dispatches to the concrete
//! operation, and normalizes every failure into the four-kind error
//! taxonomy. Owns the pivot registration list for auto-refresh.

pub mod tools;

use crate::address;
use crate::config::ServerConfig;
use crate::error::{ErrorCode, GovernorError};
use crate::model::{RangeAddress, ToolResult};
use crate::pivot;
use crate::workbook::SpreadsheetApi;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// The six executor-level knobs, plus `preview_mode`. Constructed
/// from a [`ServerConfig`] so the executor never depends on logging/cache
/// knobs it has no use for.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub default_sheet: String,
    pub allow_external_data: bool,
    pub allowed_external_hosts: Vec<String>,
    pub max_external_bytes: u64,
    pub max_tool_range_cells: u64,
    pub max_read_range_cells: u64,
    pub preview_mode: bool,
}

impl From<&ServerConfig> for ExecutorConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            default_sheet: config.default_sheet.clone(),
            allow_external_data: config.allow_external_data,
            allowed_external_hosts: config.allowed_external_hosts.clone(),
            max_external_bytes: config.max_external_bytes,
            max_tool_range_cells: config.max_tool_range_cells,
            max_read_range_cells: config.max_read_range_cells,
            preview_mode: config.preview_mode,
        }
    }
}

impl ExecutorConfig {
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_external_hosts.is_empty()
            || self.allowed_external_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn parse_range(&self, tool: &str, input: &str) -> Result<RangeAddress, GovernorError> {
        address::parse(input, &self.default_sheet)
            .map_err(|e| GovernorError::new(ErrorCode::InvalidRange, e.to_string()).with_tool(tool).with_range(input))
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool: String,
    pub tool_call_id: String,
    pub params: Value,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Timing {
    pub started_at_ms: i64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ExecutedResult {
    pub tool: String,
    pub timing: Timing,
    pub result: ToolResult,
}

/// A live pivot table tracked for auto-refresh: rebuilt and re-written
/// whenever a mutation touches its source range (same sheet).
#[derive(Debug, Clone)]
pub struct PivotRegistration {
    pub id: String,
    pub source: RangeAddress,
    pub destination: RangeAddress,
    pub row_fields: Vec<String>,
    pub column_fields: Vec<String>,
    pub value_specs: Vec<pivot::ValueSpec>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Tools whose parameters denote a rectangular region and must pass the
/// range-size gate before any cell is materialized.
pub(crate) const READING_TOOLS: &[&str] = &["read_range", "filter_range", "detect_anomalies", "compute_statistics"];

/// Precedes materialization of any `CellData[][]`: validates `rows*cols`
/// against `max_tool_range_cells`, and additionally against
/// `max_read_range_cells` for reading tools.
pub(crate) fn check_range_gate(tool: &str, range: &RangeAddress, config: &ExecutorConfig) -> Result<(), GovernorError> {
    let cells = range.cell_count();
    if cells > config.max_tool_range_cells {
        return Err(GovernorError::permission_denied(
            ErrorCode::RangeTooLarge,
            format!("range spans {cells} cells, exceeding max_tool_range_cells={}", config.max_tool_range_cells),
        )
        .with_tool(tool));
    }
    if READING_TOOLS.contains(&tool) && cells > config.max_read_range_cells {
        return Err(GovernorError::permission_denied(
            ErrorCode::RangeTooLarge,
            format!("range spans {cells} cells, exceeding max_read_range_cells={}", config.max_read_range_cells),
        )
        .with_tool(tool));
    }
    Ok(())
}

pub struct Executor<S: SpreadsheetApi> {
    pub workbook: S,
    pub config: ExecutorConfig,
    pub pivots: Vec<PivotRegistration>,
    http_client: reqwest::Client,
    next_pivot_id: u64,
}

impl<S: SpreadsheetApi> Executor<S> {
    pub fn new(workbook: S, config: ExecutorConfig) -> Self {
        Self {
            workbook,
            config,
            pivots: Vec::new(),
            http_client: reqwest::Client::new(),
            next_pivot_id: 1,
        }
    }

    /// Runs a single tool call. Never panics or propagates a Rust error to
    /// the caller — every failure is normalized into the result envelope.
    pub async fn execute(&mut self, call: ToolCall) -> ExecutedResult {
        let started_at_ms = now_ms();
        let tool = call.tool.clone();

        let result = if self.config.preview_mode && tools::is_mutating(&tool) {
            ToolResult::success(serde_json::json!({"skipped": true, "reason": "preview_mode"}))
        } else {
            match self.dispatch(&call).await {
                Ok(result) => result,
                Err(err) => ToolResult::failure(err.taxonomy().to_string(), err.message),
            }
        };

        ExecutedResult {
            tool,
            timing: Timing {
                started_at_ms,
                duration_ms: now_ms() - started_at_ms,
            },
            result,
        }
    }

    /// Runs a sequence of calls sequentially; a step's failure does not
    /// abort the plan — each result is returned independently.
    pub async fn execute_plan(&mut self, calls: Vec<ToolCall>) -> Vec<ExecutedResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }

    async fn dispatch(&mut self, call: &ToolCall) -> Result<ToolResult, GovernorError> {
        match call.tool.as_str() {
            "read_range" => tools::read_range(&self.workbook, &self.config, &call.params),
            "write_cell" => {
                let (result, mutated) = tools::write_cell(&mut self.workbook, &self.config, &call.params)?;
                self.refresh_pivots(&mutated);
                Ok(result)
            }
            "set_range" => {
                let (result, mutated) = tools::set_range(&mut self.workbook, &self.config, &call.params)?;
                self.refresh_pivots(&mutated);
                Ok(result)
            }
            "apply_formula_column" => {
                let (result, mutated) = tools::apply_formula_column(&mut self.workbook, &self.config, &call.params)?;
                self.refresh_pivots(&mutated);
                Ok(result)
            }
            "create_pivot_table" => {
                let id = format!("pivot_{}", self.next_pivot_id);
                self.next_pivot_id += 1;
                let (result, registration) =
                    tools::create_pivot_table(&mut self.workbook, &self.config, &call.params, id)?;
                self.pivots.push(registration);
                Ok(result)
            }
            "sort_range" => {
                let (result, mutated) = tools::sort_range(&mut self.workbook, &self.config, &call.params)?;
                self.refresh_pivots(&mutated);
                Ok(result)
            }
            "filter_range" => tools::filter_range(&self.workbook, &self.config, &call.params),
            "apply_formatting" => tools::apply_formatting(&mut self.workbook, &self.config, &call.params),
            "detect_anomalies" => tools::detect_anomalies(&self.workbook, &self.config, &call.params),
            "compute_statistics" => tools::compute_statistics(&self.workbook, &self.config, &call.params),
            "fetch_external_data" => {
                let (result, mutated) =
                    tools::fetch_external_data(&mut self.workbook, &self.config, &self.http_client, &call.params)
                        .await?;
                if let Some(range) = &mutated {
                    self.refresh_pivots(range);
                }
                Ok(result)
            }
            other => Err(GovernorError::not_implemented(format!("unknown tool '{other}'")).with_tool(other)),
        }
    }

    /// On any mutation, rebuild and rewrite every registered pivot whose
    /// source intersects the mutated range (same sheet), to the union of
    /// its previous and new destination rectangles, padding shrinkage with
    /// null.
    fn refresh_pivots(&mut self, mutated: &RangeAddress) {
        for index in 0..self.pivots.len() {
            let (source, sheet_matches) = {
                let registration = &self.pivots[index];
                (registration.source.clone(), registration.source.sheet == mutated.sheet)
            };
            if !sheet_matches || !source.intersects(mutated) {
                continue;
            }
            if let Err(err) = self.rebuild_pivot(index) {
                tracing::warn!(pivot_id = %self.pivots[index].id, error = %err, "pivot auto-refresh failed");
            }
        }
    }

    fn rebuild_pivot(&mut self, index: usize) -> Result<(), GovernorError> {
        let registration = self.pivots[index].clone();
        let source_grid = self.workbook.read_range(&registration.source);
        let value_grid: Vec<Vec<crate::model::CellValue>> =
            source_grid.iter().map(|row| row.iter().map(|c| c.value.clone()).collect()).collect();

        let output = pivot::build_pivot(
            &value_grid,
            &registration.row_fields,
            &registration.column_fields,
            &registration.value_specs,
        )
        .map_err(|e| GovernorError::validation(e.to_string()))?;

        let new_rows = output.len() as u32;
        let new_cols = output.first().map(|r| r.len()).unwrap_or(0) as u32;
        let new_destination = RangeAddress {
            sheet: registration.destination.sheet.clone(),
            start_row: registration.destination.start_row,
            start_col: registration.destination.start_col,
            end_row: registration.destination.start_row + new_rows.saturating_sub(1),
            end_col: registration.destination.start_col + new_cols.saturating_sub(1),
        };
        let union = registration.destination.union(&new_destination);

        let mut grid = vec![
            vec![crate::model::CellData::default(); union.cols() as usize];
            union.rows() as usize
        ];
        for (r, row) in output.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                grid[r][c] = crate::model::CellData::value(value.clone());
            }
        }

        self.workbook
            .write_range(&union, &grid)
            .map_err(|e| GovernorError::runtime(e.to_string()))?;

        self.pivots[index].destination = new_destination;
        Ok(())
    }
}
