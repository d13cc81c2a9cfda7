//! The external workbook collaborator.
//!
//! The tool executor never touches a concrete spreadsheet engine directly —
//! it only calls through [`SpreadsheetApi`]. The real implementation (an
//! umya-spreadsheet or native host binding) lives outside this crate;
//! [`InMemoryWorkbook`] here exists purely so the executor and its tests have
//! something to run against.

use crate::model::{CellData, CellValue, RangeAddress};
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// Capability contract the tool executor depends on. Anything satisfying
/// this trait — a real host binding, a preview clone, a test double — can
/// sit underneath the executor.
pub trait SpreadsheetApi: Send + Sync {
    fn list_sheets(&self) -> Vec<String>;
    fn get_cell(&self, sheet: &str, row: u32, col: u32) -> CellData;
    fn set_cell(&mut self, sheet: &str, row: u32, col: u32, data: CellData);
    fn read_range(&self, range: &RangeAddress) -> Vec<Vec<CellData>>;
    fn write_range(&mut self, range: &RangeAddress, values: &[Vec<CellData>]) -> Result<()>;
    fn apply_formatting(
        &mut self,
        range: &RangeAddress,
        format: &BTreeMap<String, serde_json::Value>,
    ) -> usize;
    fn get_last_used_row(&self, sheet: &str) -> u32;
    fn clone_workbook(&self) -> Box<dyn SpreadsheetApi>;
}

/// A dense, sheet-keyed, sparse-cell map workbook used for tests and
/// previews. Non-existent cells read back as empty [`CellData`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkbook {
    sheets: BTreeMap<String, BTreeMap<(u32, u32), CellData>>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: impl Into<String>) -> Self {
        self.sheets.entry(name.into()).or_default();
        self
    }

    pub fn set(&mut self, sheet: &str, row: u32, col: u32, data: CellData) {
        self.sheets
            .entry(sheet.to_string())
            .or_default()
            .insert((row, col), data);
    }

    pub fn non_empty_cells(&self, sheet: &str) -> Vec<(u32, u32, &CellData)> {
        self.sheets
            .get(sheet)
            .map(|cells| {
                cells
                    .iter()
                    .filter(|(_, data)| !data.is_empty())
                    .map(|(&(row, col), data)| (row, col, data))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SpreadsheetApi for InMemoryWorkbook {
    fn list_sheets(&self) -> Vec<String> {
        self.sheets.keys().cloned().collect()
    }

    fn get_cell(&self, sheet: &str, row: u32, col: u32) -> CellData {
        self.sheets
            .get(sheet)
            .and_then(|cells| cells.get(&(row, col)))
            .cloned()
            .unwrap_or_default()
    }

    fn set_cell(&mut self, sheet: &str, row: u32, col: u32, data: CellData) {
        self.set(sheet, row, col, data);
    }

    fn read_range(&self, range: &RangeAddress) -> Vec<Vec<CellData>> {
        let mut grid = Vec::with_capacity(range.rows() as usize);
        for row in range.start_row..=range.end_row {
            let mut line = Vec::with_capacity(range.cols() as usize);
            for col in range.start_col..=range.end_col {
                line.push(self.get_cell(&range.sheet, row, col));
            }
            grid.push(line);
        }
        grid
    }

    fn write_range(&mut self, range: &RangeAddress, values: &[Vec<CellData>]) -> Result<()> {
        if values.len() as u32 != range.rows() {
            bail!(
                "shape mismatch: range has {} rows, values has {}",
                range.rows(),
                values.len()
            );
        }
        for (r_idx, row_values) in values.iter().enumerate() {
            if row_values.len() as u32 != range.cols() {
                bail!(
                    "shape mismatch: range has {} cols, row {r_idx} has {}",
                    range.cols(),
                    row_values.len()
                );
            }
            let row = range.start_row + r_idx as u32;
            for (c_idx, data) in row_values.iter().enumerate() {
                let col = range.start_col + c_idx as u32;
                self.set(&range.sheet, row, col, data.clone());
            }
        }
        Ok(())
    }

    fn apply_formatting(
        &mut self,
        range: &RangeAddress,
        format: &BTreeMap<String, serde_json::Value>,
    ) -> usize {
        let mut count = 0;
        for row in range.start_row..=range.end_row {
            for col in range.start_col..=range.end_col {
                let mut cell = self.get_cell(&range.sheet, row, col);
                cell.format.extend(format.clone());
                self.set(&range.sheet, row, col, cell);
                count += 1;
            }
        }
        count
    }

    fn get_last_used_row(&self, sheet: &str) -> u32 {
        self.sheets
            .get(sheet)
            .and_then(|cells| cells.keys().map(|&(row, _)| row).max())
            .unwrap_or(0)
    }

    fn clone_workbook(&self) -> Box<dyn SpreadsheetApi> {
        Box::new(self.clone())
    }
}

impl CellValue {
    pub fn from_json_cell(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => CellValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            other => CellValue::Text(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let range = RangeAddress {
            sheet: "Sheet1".into(),
            start_row: 1,
            start_col: 1,
            end_row: 1,
            end_col: 2,
        };
        wb.write_range(
            &range,
            &[vec![
                CellData::value(CellValue::Number(1.0)),
                CellData::value(CellValue::Text("b".into())),
            ]],
        )
        .unwrap();
        let grid = wb.read_range(&range);
        assert_eq!(grid[0][0].value, CellValue::Number(1.0));
        assert_eq!(grid[0][1].value, CellValue::Text("b".into()));
    }

    #[test]
    fn write_range_rejects_shape_mismatch() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        let range = RangeAddress::single_cell("Sheet1", 1, 1);
        let err = wb.write_range(&range, &[vec![CellData::default(), CellData::default()]]);
        assert!(err.is_err());
    }

    #[test]
    fn last_used_row_tracks_writes() {
        let mut wb = InMemoryWorkbook::new().with_sheet("Sheet1");
        wb.set_cell("Sheet1", 5, 1, CellData::value(CellValue::Number(1.0)));
        assert_eq!(wb.get_last_used_row("Sheet1"), 5);
    }
}
