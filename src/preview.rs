//! Preview / approval gate: simulate a plan against a cloned
//! workbook with external fetches force-disabled, diff before/after, and
//! decide whether the plan needs human approval before it runs for real.

use crate::model::CellValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellKey {
    pub sheet_order: u32,
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone)]
pub struct CellChange {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
    pub kind: ChangeKind,
    pub before: Option<CellValue>,
    pub after: Option<CellValue>,
}

#[derive(Debug, Default, Clone)]
pub struct PreviewSummary {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone)]
pub struct PreviewResult {
    pub summary: PreviewSummary,
    pub changes: Vec<CellChange>,
    pub requires_approval: bool,
    pub approval_reasons: Vec<String>,
}

/// A non-empty workbook cell snapshot: `(sheet, row, col) -> value`, used as
/// the before/after maps diffed by [`diff_snapshots`]. A missing entry
/// means the cell is empty.
pub type Snapshot = BTreeMap<(String, u32, u32), CellValue>;

pub struct DiffInput<'a> {
    pub before: &'a Snapshot,
    pub after: &'a Snapshot,
}

/// Diffs two non-empty-cell snapshots, classifying every differing key as
/// create/modify/delete. Keys present and equal in both snapshots produce
/// no change entry.
pub fn diff_snapshots(input: DiffInput) -> Vec<CellChange> {
    let mut changes = Vec::new();
    let mut keys: Vec<&(String, u32, u32)> = input.before.keys().chain(input.after.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let before = input.before.get(key).cloned();
        let after = input.after.get(key).cloned();
        let kind = match (&before, &after) {
            (None, Some(_)) => ChangeKind::Create,
            (Some(_), None) => ChangeKind::Delete,
            (Some(b), Some(a)) if b != a => ChangeKind::Modify,
            _ => continue,
        };
        changes.push(CellChange {
            sheet: key.0.clone(),
            row: key.1,
            col: key.2,
            kind,
            before,
            after,
        });
    }

    changes
}

pub struct PreviewThresholds {
    pub touched_cell_threshold: u64,
    pub max_preview_changes: usize,
}

/// Aggregates diff changes plus per-call execution facts (reported touched
/// cells, whether the call was `fetch_external_data`, whether it produced a
/// warning) into a preview result. `reported_touched_cells` and `had_warning`
/// are per tool call in the plan; `any_fetch` is true if any call in the
/// plan was `fetch_external_data`.
pub fn summarize(
    changes: Vec<CellChange>,
    reported_touched_cells: u64,
    any_fetch: bool,
    any_warning: bool,
    thresholds: &PreviewThresholds,
) -> PreviewResult {
    let mut summary = PreviewSummary::default();
    for change in &changes {
        match change.kind {
            ChangeKind::Create => summary.created += 1,
            ChangeKind::Modify => summary.modified += 1,
            ChangeKind::Delete => summary.deleted += 1,
        }
    }

    let effective_touched = (changes.len() as u64).max(reported_touched_cells);

    let mut approval_reasons = Vec::new();
    if effective_touched > thresholds.touched_cell_threshold {
        approval_reasons.push(format!(
            "touched {effective_touched} cells, exceeding threshold {}",
            thresholds.touched_cell_threshold
        ));
    }
    if summary.deleted > 0 {
        approval_reasons.push(format!("{} cell deletions", summary.deleted));
    }
    if any_fetch {
        approval_reasons.push("plan includes fetch_external_data".to_string());
    }
    if any_warning {
        approval_reasons.push("a tool call produced a warning".to_string());
    }

    let mut sorted_changes = changes;
    sorted_changes.sort_by(|a, b| (a.sheet.clone(), a.row, a.col).cmp(&(b.sheet.clone(), b.row, b.col)));
    sorted_changes.truncate(thresholds.max_preview_changes);

    PreviewResult {
        summary,
        changes: sorted_changes,
        requires_approval: !approval_reasons.is_empty(),
        approval_reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, u32, u32, f64)]) -> Snapshot {
        entries
            .iter()
            .map(|(sheet, row, col, value)| ((sheet.to_string(), *row, *col), CellValue::Number(*value)))
            .collect()
    }

    #[test]
    fn classifies_create_modify_delete() {
        let before = snap(&[("Sheet1", 1, 1, 1.0), ("Sheet1", 2, 1, 2.0)]);
        let after = snap(&[("Sheet1", 1, 1, 5.0), ("Sheet1", 3, 1, 3.0)]);
        let changes = diff_snapshots(DiffInput {
            before: &before,
            after: &after,
        });
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Modify && c.row == 1));
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Delete && c.row == 2));
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Create && c.row == 3));
    }

    #[test]
    fn deletes_always_require_approval() {
        let before = snap(&[("Sheet1", 1, 1, 1.0)]);
        let after = Snapshot::new();
        let changes = diff_snapshots(DiffInput {
            before: &before,
            after: &after,
        });
        let result = summarize(
            changes,
            0,
            false,
            false,
            &PreviewThresholds {
                touched_cell_threshold: 1_000_000,
                max_preview_changes: 500,
            },
        );
        assert!(result.requires_approval);
        assert_eq!(result.summary.deleted, 1);
    }

    #[test]
    fn external_fetch_always_requires_approval_even_with_no_changes() {
        let result = summarize(
            Vec::new(),
            0,
            true,
            false,
            &PreviewThresholds {
                touched_cell_threshold: 1_000_000,
                max_preview_changes: 500,
            },
        );
        assert!(result.requires_approval);
        assert_eq!(result.approval_reasons, vec!["plan includes fetch_external_data".to_string()]);
    }

    #[test]
    fn preview_list_is_capped_and_sorted() {
        let mut before = Snapshot::new();
        let mut after = Snapshot::new();
        for row in 1..=10u32 {
            after.insert(("Sheet1".into(), row, 1), CellValue::Number(row as f64));
        }
        let changes = diff_snapshots(DiffInput {
            before: &before,
            after: &after,
        });
        let result = summarize(
            changes,
            0,
            false,
            false,
            &PreviewThresholds {
                touched_cell_threshold: 1,
                max_preview_changes: 3,
            },
        );
        assert_eq!(result.changes.len(), 3);
        assert_eq!(result.changes[0].row, 1);
        before.clear();
    }
}
