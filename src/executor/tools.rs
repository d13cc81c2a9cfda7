//! Parameter schemas and bodies for each supported tool. Every function
//! here is pure with respect to the executor: it takes the workbook, the
//! resolved config, and raw JSON params, and returns either a
//! `ToolResult`-shaped success payload or a [`GovernorError`] for the
//! caller to normalize.

use super::{ExecutorConfig, PivotRegistration, check_range_gate};
use crate::address;
use crate::error::{ErrorCode, GovernorError};
use crate::model::{CellData, CellValue, RangeAddress, ToolResult};
use crate::pivot::{self, ValueSpec};
use crate::stats;
use crate::workbook::SpreadsheetApi;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

pub(super) fn is_mutating(tool: &str) -> bool {
    matches!(
        tool,
        "write_cell" | "set_range" | "apply_formula_column" | "sort_range" | "create_pivot_table" | "apply_formatting"
    )
}

fn parse_params<T: for<'de> Deserialize<'de>>(tool: &str, params: &Value) -> Result<T, GovernorError> {
    serde_json::from_value(params.clone())
        .map_err(|e| GovernorError::validation(format!("invalid parameters for {tool}: {e}")).with_tool(tool))
}

fn interpret_cell(value: &Value, interpret_as: &str) -> CellData {
    if let Value::String(s) = value {
        if s.starts_with('=') && (interpret_as == "auto" || interpret_as == "formula") {
            return CellData::formula(s.clone());
        }
    }
    CellData::value(CellValue::from_json_cell(value.clone()))
}

// ---------------------------------------------------------------------
// read_range
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadRangeParams {
    pub range: String,
    #[serde(default)]
    pub include_formulas: bool,
}

pub fn read_range<S: SpreadsheetApi>(workbook: &S, config: &ExecutorConfig, params: &Value) -> Result<ToolResult, GovernorError> {
    let params: ReadRangeParams = parse_params("read_range", params)?;
    let range = config.parse_range("read_range", &params.range)?;
    check_range_gate("read_range", &range, config)?;

    let grid = workbook.read_range(&range);
    let values: Vec<Vec<Value>> = grid
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| {
                    if cell.formula.is_some() {
                        Value::Null
                    } else {
                        serde_json::to_value(&cell.value).unwrap_or(Value::Null)
                    }
                })
                .collect()
        })
        .collect();

    let mut data = json!({
        "range": address::format(&range),
        "values": values,
    });

    if params.include_formulas {
        let formulas: Vec<Vec<Value>> = grid
            .iter()
            .map(|row| row.iter().map(|cell| cell.formula.clone().map(Value::String).unwrap_or(Value::Null)).collect())
            .collect();
        data["formulas"] = Value::Array(formulas.into_iter().map(Value::Array).collect());
    }

    Ok(ToolResult::success(data).with_touched_cells(range.cell_count()))
}

// ---------------------------------------------------------------------
// write_cell
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteCellParams {
    pub address: String,
    pub value: Value,
    #[serde(default = "default_interpret_as")]
    pub interpret_as: String,
}

fn default_interpret_as() -> String {
    "auto".to_string()
}

pub fn write_cell<S: SpreadsheetApi>(
    workbook: &mut S,
    config: &ExecutorConfig,
    params: &Value,
) -> Result<(ToolResult, RangeAddress), GovernorError> {
    let params: WriteCellParams = parse_params("write_cell", params)?;
    let range = config.parse_range("write_cell", &params.address)?;
    check_range_gate("write_cell", &range, config)?;

    let data = interpret_cell(&params.value, &params.interpret_as);
    workbook.set_cell(&range.sheet, range.start_row, range.start_col, data);

    let result = ToolResult::success(json!({"address": address::format(&range)})).with_touched_cells(1);
    Ok((result, range))
}

// ---------------------------------------------------------------------
// set_range
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetRangeParams {
    pub range: String,
    pub values: Vec<Vec<Value>>,
    #[serde(default = "default_interpret_as")]
    pub interpret_as: String,
}

pub fn set_range<S: SpreadsheetApi>(
    workbook: &mut S,
    config: &ExecutorConfig,
    params: &Value,
) -> Result<(ToolResult, RangeAddress), GovernorError> {
    let params: SetRangeParams = parse_params("set_range", params)?;
    let anchor = config.parse_range("set_range", &params.range)?;

    if params.values.is_empty() || params.values[0].is_empty() {
        return Err(GovernorError::validation("set_range requires a non-empty values grid").with_tool("set_range"));
    }
    let value_rows = params.values.len() as u32;
    let value_cols = params.values[0].len() as u32;
    if !params.values.iter().all(|row| row.len() as u32 == value_cols) {
        return Err(GovernorError::validation("set_range values rows must all have equal length").with_tool("set_range"));
    }

    let range = if anchor.rows() == 1 && anchor.cols() == 1 {
        RangeAddress {
            sheet: anchor.sheet.clone(),
            start_row: anchor.start_row,
            start_col: anchor.start_col,
            end_row: anchor.start_row + value_rows - 1,
            end_col: anchor.start_col + value_cols - 1,
        }
    } else {
        if anchor.rows() != value_rows || anchor.cols() != value_cols {
            return Err(GovernorError::validation(format!(
                "values shape {value_rows}x{value_cols} does not match range shape {}x{}",
                anchor.rows(),
                anchor.cols()
            ))
            .with_tool("set_range"));
        }
        anchor
    };
    check_range_gate("set_range", &range, config)?;

    let grid: Vec<Vec<CellData>> = params
        .values
        .iter()
        .map(|row| row.iter().map(|v| interpret_cell(v, &params.interpret_as)).collect())
        .collect();

    workbook
        .write_range(&range, &grid)
        .map_err(|e| GovernorError::runtime(e.to_string()).with_tool("set_range"))?;

    let result = ToolResult::success(json!({"range": address::format(&range)})).with_touched_cells(range.cell_count());
    Ok((result, range))
}

// ---------------------------------------------------------------------
// apply_formula_column
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ApplyFormulaColumnParams {
    pub start_cell: String,
    pub formula_template: String,
    #[serde(default = "default_end_row")]
    pub end_row: i64,
}

fn default_end_row() -> i64 {
    -1
}

pub fn apply_formula_column<S: SpreadsheetApi>(
    workbook: &mut S,
    config: &ExecutorConfig,
    params: &Value,
) -> Result<(ToolResult, RangeAddress), GovernorError> {
    let params: ApplyFormulaColumnParams = parse_params("apply_formula_column", params)?;
    let start = config.parse_range("apply_formula_column", &params.start_cell)?;

    let resolved_end_row = if params.end_row == -1 {
        start.start_row.max(workbook.get_last_used_row(&start.sheet))
    } else if params.end_row >= start.start_row as i64 {
        params.end_row as u32
    } else {
        return Err(GovernorError::validation("end_row must be >= start row, or -1").with_tool("apply_formula_column"));
    };

    let range = RangeAddress {
        sheet: start.sheet.clone(),
        start_row: start.start_row,
        start_col: start.start_col,
        end_row: resolved_end_row,
        end_col: start.start_col,
    };
    check_range_gate("apply_formula_column", &range, config)?;

    for row in range.start_row..=range.end_row {
        let formula = params.formula_template.replace("{row}", &row.to_string());
        workbook.set_cell(&range.sheet, row, range.start_col, CellData::formula(formula));
    }

    let result =
        ToolResult::success(json!({"range": address::format(&range)})).with_touched_cells(range.rows() as u64);
    Ok((result, range))
}

// ---------------------------------------------------------------------
// create_pivot_table
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreatePivotTableParams {
    pub source_range: String,
    pub destination_cell: String,
    #[serde(default)]
    pub row_fields: Vec<String>,
    #[serde(default)]
    pub column_fields: Vec<String>,
    pub value_specs: Vec<ValueSpec>,
}

pub fn create_pivot_table<S: SpreadsheetApi>(
    workbook: &mut S,
    config: &ExecutorConfig,
    params: &Value,
    id: String,
) -> Result<(ToolResult, PivotRegistration), GovernorError> {
    let params: CreatePivotTableParams = parse_params("create_pivot_table", params)?;
    let source = config.parse_range("create_pivot_table", &params.source_range)?;
    check_range_gate("create_pivot_table", &source, config)?;
    let dest_anchor = config.parse_range("create_pivot_table", &params.destination_cell)?;

    let source_grid = workbook.read_range(&source);
    let value_grid: Vec<Vec<CellValue>> = source_grid.iter().map(|row| row.iter().map(|c| c.value.clone()).collect()).collect();

    let output = pivot::build_pivot(&value_grid, &params.row_fields, &params.column_fields, &params.value_specs)
        .map_err(|e| GovernorError::validation(e.to_string()).with_tool("create_pivot_table"))?;

    let rows = output.len() as u32;
    let cols = output.first().map(|r| r.len()).unwrap_or(0) as u32;
    let destination = RangeAddress {
        sheet: dest_anchor.sheet.clone(),
        start_row: dest_anchor.start_row,
        start_col: dest_anchor.start_col,
        end_row: dest_anchor.start_row + rows.saturating_sub(1),
        end_col: dest_anchor.start_col + cols.saturating_sub(1),
    };
    check_range_gate("create_pivot_table", &destination, config)?;

    let grid: Vec<Vec<CellData>> = output.into_iter().map(|row| row.into_iter().map(CellData::value).collect()).collect();
    workbook
        .write_range(&destination, &grid)
        .map_err(|e| GovernorError::runtime(e.to_string()).with_tool("create_pivot_table"))?;

    let registration = PivotRegistration {
        id: id.clone(),
        source,
        destination: destination.clone(),
        row_fields: params.row_fields,
        column_fields: params.column_fields,
        value_specs: params.value_specs,
    };

    let result = ToolResult::success(json!({
        "pivot_id": id,
        "destination": address::format(&destination),
    }))
    .with_touched_cells(destination.cell_count());

    Ok((result, registration))
}

// ---------------------------------------------------------------------
// sort_range
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SortKey {
    pub column: String,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SortRangeParams {
    pub range: String,
    pub keys: Vec<SortKey>,
    #[serde(default)]
    pub has_header: bool,
}

fn compare_cell_values(a: &CellValue, b: &CellValue) -> std::cmp::Ordering {
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.as_text_lossy().cmp(&b.as_text_lossy()),
    }
}

pub fn sort_range<S: SpreadsheetApi>(
    workbook: &mut S,
    config: &ExecutorConfig,
    params: &Value,
) -> Result<(ToolResult, RangeAddress), GovernorError> {
    let params: SortRangeParams = parse_params("sort_range", params)?;
    let range = config.parse_range("sort_range", &params.range)?;
    check_range_gate("sort_range", &range, config)?;

    let mut key_offsets = Vec::with_capacity(params.keys.len());
    for key in &params.keys {
        let col_index = address::column_label_to_index(&key.column)
            .map_err(|e| GovernorError::validation(format!("invalid sort column '{}': {e}", key.column)).with_tool("sort_range"))?;
        if col_index < range.start_col || col_index > range.end_col {
            return Err(GovernorError::validation(format!("sort column '{}' is outside the range", key.column)).with_tool("sort_range"));
        }
        key_offsets.push(((col_index - range.start_col) as usize, key.ascending));
    }

    let mut grid = workbook.read_range(&range);
    let header = if params.has_header && !grid.is_empty() { Some(grid.remove(0)) } else { None };

    grid.sort_by(|a, b| {
        for &(offset, ascending) in &key_offsets {
            let ordering = compare_cell_values(&a[offset].value, &b[offset].value);
            let ordering = if ascending { ordering } else { ordering.reverse() };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });

    if let Some(header_row) = header {
        grid.insert(0, header_row);
    }

    workbook
        .write_range(&range, &grid)
        .map_err(|e| GovernorError::runtime(e.to_string()).with_tool("sort_range"))?;

    let result = ToolResult::success(json!({"range": address::format(&range)})).with_touched_cells(range.cell_count());
    Ok((result, range))
}

// ---------------------------------------------------------------------
// filter_range
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FilterCriterion {
    pub column: String,
    pub operator: String,
    pub value: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FilterRangeParams {
    pub range: String,
    pub criteria: Vec<FilterCriterion>,
    #[serde(default)]
    pub has_header: bool,
}

fn criterion_matches(cell: &CellValue, criterion: &FilterCriterion) -> Result<bool, GovernorError> {
    match criterion.operator.as_str() {
        "equals" => Ok(cell.as_text_lossy() == value_as_text(&criterion.value)),
        "contains" => Ok(cell.as_text_lossy().contains(&value_as_text(&criterion.value))),
        "greater" => Ok(cell.as_f64_lossy() > criterion.value.as_f64().unwrap_or(f64::NAN)),
        "less" => Ok(cell.as_f64_lossy() < criterion.value.as_f64().unwrap_or(f64::NAN)),
        "between" => {
            let bounds = criterion
                .value
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| GovernorError::validation("'between' requires a two-element [low, high] value").with_tool("filter_range"))?;
            let low = bounds[0].as_f64().unwrap_or(f64::NEG_INFINITY);
            let high = bounds[1].as_f64().unwrap_or(f64::INFINITY);
            let v = cell.as_f64_lossy();
            Ok(v >= low && v <= high)
        }
        other => Err(GovernorError::validation(format!("unsupported filter operator '{other}'")).with_tool("filter_range")),
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn filter_range<S: SpreadsheetApi>(workbook: &S, config: &ExecutorConfig, params: &Value) -> Result<ToolResult, GovernorError> {
    let params: FilterRangeParams = parse_params("filter_range", params)?;
    let range = config.parse_range("filter_range", &params.range)?;
    check_range_gate("filter_range", &range, config)?;

    let mut offsets = Vec::with_capacity(params.criteria.len());
    for criterion in &params.criteria {
        let col_index = address::column_label_to_index(&criterion.column)
            .map_err(|e| GovernorError::validation(format!("invalid filter column '{}': {e}", criterion.column)).with_tool("filter_range"))?;
        if col_index < range.start_col || col_index > range.end_col {
            return Err(GovernorError::validation(format!("filter column '{}' is outside the range", criterion.column)).with_tool("filter_range"));
        }
        offsets.push((col_index - range.start_col) as usize);
    }

    let grid = workbook.read_range(&range);
    let mut matching_rows = Vec::new();
    for (r, row) in grid.iter().enumerate() {
        if params.has_header && r == 0 {
            continue;
        }
        let mut all_match = true;
        for (criterion, &offset) in params.criteria.iter().zip(offsets.iter()) {
            if !criterion_matches(&row[offset].value, criterion)? {
                all_match = false;
                break;
            }
        }
        if all_match {
            matching_rows.push(range.start_row + r as u32);
        }
    }

    Ok(ToolResult::success(json!({"matching_rows": matching_rows})).with_touched_cells(range.cell_count()))
}

// ---------------------------------------------------------------------
// apply_formatting
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ApplyFormattingParams {
    pub range: String,
    pub format: std::collections::BTreeMap<String, Value>,
}

pub fn apply_formatting<S: SpreadsheetApi>(workbook: &mut S, config: &ExecutorConfig, params: &Value) -> Result<ToolResult, GovernorError> {
    let params: ApplyFormattingParams = parse_params("apply_formatting", params)?;
    // Formatting tools are exempt from the range-size gate: delegated to the host.
    let range = config.parse_range("apply_formatting", &params.range)?;
    let count = workbook.apply_formatting(&range, &params.format);
    Ok(ToolResult::success(json!({"range": address::format(&range), "cells_formatted": count})).with_touched_cells(count as u64))
}

// ---------------------------------------------------------------------
// detect_anomalies
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetectAnomaliesParams {
    pub range: String,
    pub method: String,
    pub threshold: Option<f64>,
    pub multiplier: Option<f64>,
}

fn column_values<S: SpreadsheetApi>(workbook: &S, range: &RangeAddress) -> Vec<f64> {
    workbook.read_range(range).into_iter().flatten().map(|c| c.value.as_f64_lossy()).collect()
}

pub fn detect_anomalies<S: SpreadsheetApi>(workbook: &S, config: &ExecutorConfig, params: &Value) -> Result<ToolResult, GovernorError> {
    let params: DetectAnomaliesParams = parse_params("detect_anomalies", params)?;
    let range = config.parse_range("detect_anomalies", &params.range)?;
    check_range_gate("detect_anomalies", &range, config)?;

    let values = column_values(workbook, &range);
    let indices = match params.method.as_str() {
        "zscore" => stats::detect_anomalies_zscore(&values, params.threshold.unwrap_or(3.0)),
        "iqr" => stats::detect_anomalies_iqr(&values, params.multiplier.unwrap_or(1.5)),
        "isolation_forest" => {
            return Err(GovernorError::new(ErrorCode::AnomalyMethodUnsupported, "anomaly method 'isolation_forest' is not implemented")
                .with_tool("detect_anomalies"));
        }
        other => return Err(GovernorError::validation(format!("unsupported anomaly method '{other}'")).with_tool("detect_anomalies")),
    };

    let anomalous_rows: Vec<u32> = indices.into_iter().map(|i| range.start_row + i as u32).collect();
    Ok(ToolResult::success(json!({"anomalous_rows": anomalous_rows})))
}

// ---------------------------------------------------------------------
// compute_statistics
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ComputeStatisticsParams {
    pub range: String,
}

pub fn compute_statistics<S: SpreadsheetApi>(workbook: &S, config: &ExecutorConfig, params: &Value) -> Result<ToolResult, GovernorError> {
    let params: ComputeStatisticsParams = parse_params("compute_statistics", params)?;
    let range = config.parse_range("compute_statistics", &params.range)?;
    check_range_gate("compute_statistics", &range, config)?;

    let grid = workbook.read_range(&range);
    let cols = range.cols() as usize;
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(grid.len()); cols];
    for row in &grid {
        for (c, cell) in row.iter().enumerate() {
            columns[c].push(cell.value.as_f64_lossy());
        }
    }

    let stats_per_column: Vec<Value> = columns.iter().map(|col| serde_json::to_value(stats::compute_column_statistics(col)).unwrap_or(Value::Null)).collect();

    let mut data = if cols == 1 {
        stats_per_column.into_iter().next().unwrap_or(Value::Null)
    } else {
        let labels: Vec<String> = (range.start_col..=range.end_col).map(address::column_index_to_label).collect();
        let map: serde_json::Map<String, Value> = labels.into_iter().zip(stats_per_column).collect();
        Value::Object(map)
    };

    if cols == 2 {
        if let Some(correlation) = stats::correlation(&columns[0], &columns[1]) {
            if let Value::Object(map) = &mut data {
                map.insert("correlation".to_string(), json!(correlation));
            }
        }
    }

    Ok(ToolResult::success(data))
}

// ---------------------------------------------------------------------
// fetch_external_data
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchExternalDataParams {
    pub url: String,
    #[serde(default)]
    pub raw_text: bool,
    pub destination_cell: Option<String>,
}

fn json_to_table(value: &Value) -> Vec<Vec<CellValue>> {
    match value {
        Value::Array(items) if items.iter().all(|i| i.is_object()) && !items.is_empty() => {
            let mut headers: Vec<String> = Vec::new();
            for item in items {
                if let Value::Object(obj) = item {
                    for key in obj.keys() {
                        if !headers.contains(key) {
                            headers.push(key.clone());
                        }
                    }
                }
            }
            let mut grid = vec![headers.iter().map(|h| CellValue::Text(h.clone())).collect::<Vec<_>>()];
            for item in items {
                let obj = item.as_object();
                let row: Vec<CellValue> = headers
                    .iter()
                    .map(|h| obj.and_then(|o| o.get(h)).cloned().map(CellValue::from_json_cell).unwrap_or(CellValue::Null))
                    .collect();
                grid.push(row);
            }
            grid
        }
        Value::Array(items) => {
            vec![vec![CellValue::Text("value".to_string())]]
                .into_iter()
                .chain(items.iter().map(|i| vec![CellValue::from_json_cell(i.clone())]))
                .collect()
        }
        Value::Object(obj) => {
            let headers: Vec<String> = obj.keys().cloned().collect();
            let row: Vec<CellValue> = headers.iter().map(|h| CellValue::from_json_cell(obj[h.as_str()].clone())).collect();
            vec![headers.into_iter().map(CellValue::Text).collect(), row]
        }
        other => vec![vec![CellValue::from_json_cell(other.clone())]],
    }
}

pub async fn fetch_external_data<S: SpreadsheetApi>(
    workbook: &mut S,
    config: &ExecutorConfig,
    client: &reqwest::Client,
    params: &Value,
) -> Result<(ToolResult, Option<RangeAddress>), GovernorError> {
    let params: FetchExternalDataParams = parse_params("fetch_external_data", params)?;

    if !config.allow_external_data {
        return Err(GovernorError::permission_denied(ErrorCode::ExternalDataDisabled, "external data fetches are disabled")
            .with_tool("fetch_external_data"));
    }

    let url = reqwest::Url::parse(&params.url).map_err(|e| GovernorError::validation(format!("invalid URL: {e}")).with_tool("fetch_external_data"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(GovernorError::permission_denied(ErrorCode::HostNotAllowed, "only http/https URLs are allowed")
            .with_tool("fetch_external_data"));
    }
    let host = url.host_str().unwrap_or_default();
    if !config.is_host_allowed(host) {
        return Err(GovernorError::permission_denied(ErrorCode::HostNotAllowed, format!("host '{host}' is not allowlisted"))
            .with_tool("fetch_external_data"));
    }

    use futures::StreamExt;
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| GovernorError::runtime(e.to_string()).with_tool("fetch_external_data"))?;

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GovernorError::runtime(e.to_string()).with_tool("fetch_external_data"))?;
        body.extend_from_slice(&chunk);
        if body.len() as u64 > config.max_external_bytes {
            return Err(GovernorError::permission_denied(
                ErrorCode::ResponseTooLarge,
                format!("response exceeded max_external_bytes={}", config.max_external_bytes),
            )
            .with_tool("fetch_external_data"));
        }
    }

    let grid: Vec<Vec<CellValue>> = if params.raw_text {
        let text = String::from_utf8_lossy(&body).to_string();
        vec![vec![CellValue::Text(text)]]
    } else {
        let json: Value =
            serde_json::from_slice(&body).map_err(|e| GovernorError::runtime(format!("response was not valid JSON: {e}")).with_tool("fetch_external_data"))?;
        json_to_table(&json)
    };

    let mut mutated = None;
    let mut data = json!({"rows": grid.len(), "cols": grid.first().map(|r| r.len()).unwrap_or(0)});

    if let Some(dest) = &params.destination_cell {
        let anchor = config.parse_range("fetch_external_data", dest)?;
        let rows = grid.len() as u32;
        let cols = grid.first().map(|r| r.len()).unwrap_or(0) as u32;
        let range = RangeAddress {
            sheet: anchor.sheet,
            start_row: anchor.start_row,
            start_col: anchor.start_col,
            end_row: anchor.start_row + rows.saturating_sub(1),
            end_col: anchor.start_col + cols.saturating_sub(1),
        };
        check_range_gate("fetch_external_data", &range, config)?;
        let cell_grid: Vec<Vec<CellData>> = grid.into_iter().map(|row| row.into_iter().map(CellData::value).collect()).collect();
        workbook.write_range(&range, &cell_grid).map_err(|e| GovernorError::runtime(e.to_string()).with_tool("fetch_external_data"))?;
        data["range"] = Value::String(address::format(&range));
        mutated = Some(range);
    }

    Ok((ToolResult::success(data), mutated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::InMemoryWorkbook;

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            default_sheet: "Sheet1".to_string(),
            allow_external_data: false,
            allowed_external_hosts: Vec::new(),
            max_external_bytes: 1024,
            max_tool_range_cells: 10_000,
            max_read_range_cells: 10_000,
            preview_mode: false,
        }
    }

    fn seeded_workbook() -> InMemoryWorkbook {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let rows: &[(&str, f64)] = &[("East", 10.0), ("East", 5.0), ("West", 7.0)];
        wb.set_cell("Sheet1", 1, 1, CellData::value(CellValue::Text("Region".into())));
        wb.set_cell("Sheet1", 1, 2, CellData::value(CellValue::Text("Amount".into())));
        for (i, (region, amount)) in rows.iter().enumerate() {
            let row = i as u32 + 2;
            wb.set_cell("Sheet1", row, 1, CellData::value(CellValue::Text((*region).to_string())));
            wb.set_cell("Sheet1", row, 2, CellData::value(CellValue::Number(*amount)));
        }
        wb
    }

    #[test]
    fn read_range_reports_formula_cells_as_null_in_values() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        wb.set_cell("Sheet1", 1, 1, CellData::formula("=A2+1"));
        let result = read_range(&wb, &config(), &json!({"range": "A1"})).unwrap();
        let data = result.data.unwrap();
        assert_eq!(data["values"], json!([[null]]));
        assert!(!data.as_object().unwrap().contains_key("formulas"));
    }

    #[test]
    fn read_range_can_include_formulas() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        wb.set_cell("Sheet1", 1, 1, CellData::formula("=A2+1"));
        let result = read_range(&wb, &config(), &json!({"range": "A1", "include_formulas": true})).unwrap();
        let data = result.data.unwrap();
        assert_eq!(data["formulas"], json!([["=A2+1"]]));
    }

    #[test]
    fn read_range_rejects_oversized_range() {
        let wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let mut cfg = config();
        cfg.max_read_range_cells = 4;
        let err = read_range(&wb, &cfg, &json!({"range": "A1:C3"})).unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::PermissionDenied);
    }

    #[test]
    fn write_cell_interprets_leading_equals_as_formula() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let (_, range) = write_cell(&mut wb, &config(), &json!({"address": "B2", "value": "=1+1"})).unwrap();
        let cell = wb.get_cell("Sheet1", range.start_row, range.start_col);
        assert_eq!(cell.formula.as_deref(), Some("=1+1"));
    }

    #[test]
    fn write_cell_literal_text_is_not_a_formula() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        write_cell(&mut wb, &config(), &json!({"address": "B2", "value": "hello"})).unwrap();
        let cell = wb.get_cell("Sheet1", 2, 2);
        assert_eq!(cell.value, CellValue::Text("hello".into()));
        assert!(cell.formula.is_none());
    }

    #[test]
    fn set_range_expands_a_single_cell_anchor_to_fit_values() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let (result, range) = set_range(
            &mut wb,
            &config(),
            &json!({"range": "A1", "values": [[1, 2], [3, 4]]}),
        )
        .unwrap();
        assert_eq!(range.end_row, 2);
        assert_eq!(range.end_col, 2);
        assert_eq!(result.touched_cells, Some(4));
        assert_eq!(wb.get_cell("Sheet1", 2, 2).value, CellValue::Number(4.0));
    }

    #[test]
    fn set_range_rejects_mismatched_shape_against_explicit_range() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let err = set_range(&mut wb, &config(), &json!({"range": "A1:B2", "values": [[1, 2, 3]]})).unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::ValidationError);
    }

    #[test]
    fn apply_formula_column_fills_through_last_used_row() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        wb.set_cell("Sheet1", 5, 3, CellData::value(CellValue::Number(1.0)));
        let (_, range) = apply_formula_column(
            &mut wb,
            &config(),
            &json!({"start_cell": "A2", "formula_template": "=B{row}*2"}),
        )
        .unwrap();
        assert_eq!(range.end_row, 5);
        assert_eq!(wb.get_cell("Sheet1", 5, 1).formula.as_deref(), Some("=B5*2"));
    }

    #[test]
    fn sort_range_orders_numerically_and_preserves_header() {
        let mut wb = seeded_workbook();
        let (_, range) = sort_range(
            &mut wb,
            &config(),
            &json!({"range": "A1:B4", "keys": [{"column": "B", "ascending": true}], "has_header": true}),
        )
        .unwrap();
        let grid = wb.read_range(&range);
        assert_eq!(grid[0][1].value, CellValue::Text("Amount".into()));
        assert_eq!(grid[1][1].value, CellValue::Number(5.0));
        assert_eq!(grid[3][1].value, CellValue::Number(10.0));
    }

    #[test]
    fn filter_range_returns_absolute_matching_row_numbers() {
        let wb = seeded_workbook();
        let result = filter_range(
            &wb,
            &config(),
            &json!({
                "range": "A1:B4",
                "criteria": [{"column": "A", "operator": "equals", "value": "East"}],
                "has_header": true,
            }),
        )
        .unwrap();
        assert_eq!(result.data.unwrap()["matching_rows"], json!([2, 3]));
    }

    #[test]
    fn filter_range_rejects_unknown_operator() {
        let wb = seeded_workbook();
        let err = filter_range(
            &wb,
            &config(),
            &json!({"range": "A1:B4", "criteria": [{"column": "A", "operator": "fuzzy", "value": "x"}]}),
        )
        .unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::ValidationError);
    }

    #[test]
    fn apply_formatting_is_exempt_from_the_range_gate() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let mut cfg = config();
        cfg.max_tool_range_cells = 1;
        let result = apply_formatting(
            &mut wb,
            &cfg,
            &json!({"range": "A1:Z100", "format": {"bold": true}}),
        )
        .unwrap();
        assert_eq!(result.data.unwrap()["cells_formatted"], json!(2600));
    }

    #[test]
    fn detect_anomalies_zscore_flags_the_outlier_row() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        for (i, v) in [1.0, 2.0, 1.5, 2.5, 1.8, 100.0].iter().enumerate() {
            wb.set_cell("Sheet1", i as u32 + 1, 1, CellData::value(CellValue::Number(*v)));
        }
        let result = detect_anomalies(&wb, &config(), &json!({"range": "A1:A6", "method": "zscore"})).unwrap();
        assert_eq!(result.data.unwrap()["anomalous_rows"], json!([6]));
    }

    #[test]
    fn detect_anomalies_rejects_unsupported_isolation_forest() {
        let wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let err = detect_anomalies(&wb, &config(), &json!({"range": "A1:A3", "method": "isolation_forest"})).unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::NotImplemented);
    }

    #[test]
    fn compute_statistics_single_column_returns_one_object() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        for (i, v) in [1.0, 2.0, 3.0].iter().enumerate() {
            wb.set_cell("Sheet1", i as u32 + 1, 1, CellData::value(CellValue::Number(*v)));
        }
        let result = compute_statistics(&wb, &config(), &json!({"range": "A1:A3"})).unwrap();
        let data = result.data.unwrap();
        assert_eq!(data["mean"], json!(2.0));
    }

    #[test]
    fn compute_statistics_two_columns_adds_top_level_correlation() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        for (i, (a, b)) in [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)].iter().enumerate() {
            let row = i as u32 + 1;
            wb.set_cell("Sheet1", row, 1, CellData::value(CellValue::Number(*a)));
            wb.set_cell("Sheet1", row, 2, CellData::value(CellValue::Number(*b)));
        }
        let result = compute_statistics(&wb, &config(), &json!({"range": "A1:B3"})).unwrap();
        let data = result.data.unwrap();
        let correlation = data["correlation"].as_f64().unwrap();
        assert!((correlation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn create_pivot_table_writes_destination_and_returns_registration() {
        let mut wb = seeded_workbook();
        let (result, registration) = create_pivot_table(
            &mut wb,
            &config(),
            &json!({
                "source_range": "A1:B4",
                "destination_cell": "D1",
                "row_fields": ["Region"],
                "column_fields": [],
                "value_specs": [{"field": "Amount", "aggregation": "sum"}],
            }),
            "pivot_1".to_string(),
        )
        .unwrap();
        assert_eq!(registration.id, "pivot_1");
        assert!(result.data.unwrap()["destination"].as_str().unwrap().starts_with("Sheet1!D1"));
        assert_eq!(wb.get_cell("Sheet1", 2, 4).value, CellValue::Text("East".into()));
    }

    #[tokio::test]
    async fn fetch_external_data_blocked_when_disabled() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let client = reqwest::Client::new();
        let err = fetch_external_data(&mut wb, &config(), &client, &json!({"url": "https://example.com/data.json"}))
            .await
            .unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn fetch_external_data_blocked_for_disallowed_host() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let client = reqwest::Client::new();
        let mut cfg = config();
        cfg.allow_external_data = true;
        cfg.allowed_external_hosts = vec!["allowed.example.com".to_string()];
        let err = fetch_external_data(&mut wb, &cfg, &client, &json!({"url": "https://not-allowed.example.com/data.json"}))
            .await
            .unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn fetch_external_data_rejects_non_http_scheme() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let client = reqwest::Client::new();
        let mut cfg = config();
        cfg.allow_external_data = true;
        let err = fetch_external_data(&mut wb, &cfg, &client, &json!({"url": "file:///etc/passwd"}))
            .await
            .unwrap_err();
        assert_eq!(err.taxonomy(), crate::error::ToolErrorCode::PermissionDenied);
    }
}
