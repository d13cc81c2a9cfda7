//! DLP output enforcement: wraps an already-successful [`ToolResult`]
//! and returns a possibly-mutated result. Never touches error results.

use super::policy::{Action, Policy};
use super::selectors::{ClassificationIndex, Level};
use crate::audit::{AuditEvent, AuditSink};
use crate::model::{RangeAddress, ToolResult};
use serde_json::Value;

pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Tools whose output is a function of a selection range and therefore
/// subject to DLP rewriting; every other tool passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlpShape {
    /// `read_range`: per-cell redaction of the returned grid.
    ReadRange,
    /// `compute_statistics` / `detect_anomalies` / `filter_range`: the
    /// whole derived output is nullified on redact, passed through on
    /// allow, blocked on block.
    DerivedWholeOutput,
    /// Any other tool: DLP never touches it.
    PassThrough,
}

pub struct EnforceContext<'a> {
    pub document_id: String,
    pub tool: String,
    pub tool_call_id: String,
    pub range: Option<RangeAddress>,
    pub index: &'a ClassificationIndex,
    pub policy: &'a Policy,
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Public => "public",
        Level::Internal => "internal",
        Level::Confidential => "confidential",
        Level::Restricted => "restricted",
    }
}

fn action_label(action: Action) -> &'static str {
    match action {
        Action::Allow => "allow",
        Action::Redact => "redact",
        Action::Block => "block",
    }
}

/// Wraps `result` per the DLP shape for `ctx.tool`. Emits an `ai.tool_dlp`
/// audit event via `sink` whenever the range/selection path actually ran
/// (i.e. not for `PassThrough` tools, which carry no selection to judge).
pub fn enforce(shape: DlpShape, mut result: ToolResult, ctx: &EnforceContext, sink: &dyn AuditSink) -> ToolResult {
    if !result.ok {
        return result;
    }
    let Some(range) = &ctx.range else {
        return result;
    };

    let selection = ctx.index.classify_range(
        &ctx.document_id,
        &range.sheet,
        range.start_row,
        range.start_col,
        range.end_row,
        range.end_col,
    );
    let decision = ctx.policy.evaluate(&selection);

    let mut audit = AuditEvent::invocation(&ctx.tool, &ctx.tool_call_id, 0, 0, true);
    audit.document_id = Some(ctx.document_id.clone());
    audit.action = Some(ctx.policy.name.clone());
    audit.range = Some(format!(
        "{}!R{}C{}:R{}C{}",
        range.sheet, range.start_row, range.start_col, range.end_row, range.end_col
    ));
    audit.selection_classification = Some(level_label(selection.level).to_string());
    audit.decision = Some(action_label(decision.action).to_string());

    match (shape, decision.action) {
        (DlpShape::PassThrough, _) => {}
        (_, Action::Block) => {
            result = ToolResult::failure("permission_denied", "DLP policy blocks this selection");
            sink.record(audit);
            return result;
        }
        (DlpShape::ReadRange, Action::Allow) => {
            sink.record(audit);
        }
        (DlpShape::ReadRange, Action::Redact) => {
            let redacted = redact_read_range(&mut result, ctx, range);
            audit.redacted_cell_count = Some(redacted);
            if redacted > 0 {
                result = result.with_warning(format!("DLP: {redacted} cells redacted."));
            }
            sink.record(audit);
        }
        (DlpShape::DerivedWholeOutput, Action::Allow) => {
            sink.record(audit);
        }
        (DlpShape::DerivedWholeOutput, Action::Redact) => {
            nullify_derived(&mut result);
            audit.redacted_derived = Some(true);
            result = result.with_warning("DLP: derived output redacted.".to_string());
            sink.record(audit);
        }
    }

    result
}

/// Re-evaluates per-cell classification for every cell in the returned
/// `values` (and `formulas`, in lock-step) grid, substituting the
/// placeholder wherever the cell's own decision is not ALLOW. Returns the
/// number of cells redacted.
fn redact_read_range(result: &mut ToolResult, ctx: &EnforceContext, range: &RangeAddress) -> u64 {
    let Some(data) = result.data.as_mut() else {
        return 0;
    };
    let Some(values) = data.get_mut("values").and_then(Value::as_array_mut) else {
        return 0;
    };

    let mut redacted = 0u64;
    for (r, row) in values.iter_mut().enumerate() {
        let Some(row) = row.as_array_mut() else { continue };
        for (c, cell) in row.iter_mut().enumerate() {
            let row_idx = range.start_row + r as u32;
            let col_idx = range.start_col + c as u32;
            let cell_class = ctx.index.classify_cell(&ctx.document_id, &range.sheet, row_idx, col_idx);
            let cell_decision = ctx.policy.evaluate(&cell_class);
            if cell_decision.action != Action::Allow {
                *cell = Value::String(REDACTED_PLACEHOLDER.to_string());
                redacted += 1;
            }
        }
    }

    if let Some(formulas) = data.get_mut("formulas").and_then(Value::as_array_mut) {
        for (r, row) in formulas.iter_mut().enumerate() {
            let Some(row) = row.as_array_mut() else { continue };
            for (c, cell) in row.iter_mut().enumerate() {
                if cell.is_null() {
                    continue;
                }
                let row_idx = range.start_row + r as u32;
                let col_idx = range.start_col + c as u32;
                let cell_class = ctx.index.classify_cell(&ctx.document_id, &range.sheet, row_idx, col_idx);
                let cell_decision = ctx.policy.evaluate(&cell_class);
                if cell_decision.action != Action::Allow {
                    *cell = Value::String(REDACTED_PLACEHOLDER.to_string());
                }
            }
        }
    }

    redacted
}

/// For derived-output tools, redaction means nullifying the computed
/// result entirely: nulled statistics, empty anomaly/filter lists.
fn nullify_derived(result: &mut ToolResult) {
    let Some(data) = result.data.as_mut() else {
        return;
    };
    let Some(obj) = data.as_object_mut() else {
        return;
    };
    for (key, value) in obj.iter_mut() {
        *value = match value {
            Value::Array(_) => Value::Array(Vec::new()),
            _ => Value::Null,
        };
        let _ = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::dlp::selectors::{Classification, ClassificationRecord, Scope};
    use serde_json::json;

    fn range() -> RangeAddress {
        RangeAddress {
            sheet: "Sheet1".into(),
            start_row: 1,
            start_col: 1,
            end_row: 1,
            end_col: 2,
        }
    }

    #[test]
    fn redacts_only_restricted_cells() {
        let records = vec![ClassificationRecord {
            selector: Scope::Cell {
                document_id: "doc".into(),
                sheet: "Sheet1".into(),
                row: 1,
                col: 2,
            },
            classification: Classification::new(Level::Restricted),
        }];
        let index = ClassificationIndex::build(&records);
        let policy = Policy::ai_cloud_processing_default();
        let sink = MemoryAuditSink::new(10);
        let ctx = EnforceContext {
            document_id: "doc".into(),
            tool: "read_range".into(),
            tool_call_id: "1".into(),
            range: Some(range()),
            index: &index,
            policy: &policy,
        };
        let result = ToolResult::success(json!({"values": [["ok", "secret"]]}));
        let out = enforce(DlpShape::ReadRange, result, &ctx, &sink);
        assert_eq!(out.data.unwrap()["values"], json!([["ok", "[REDACTED]"]]));
        assert_eq!(out.warnings, vec!["DLP: 1 cells redacted.".to_string()]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn block_turns_success_into_permission_denied() {
        let records = vec![ClassificationRecord {
            selector: Scope::Sheet {
                document_id: "doc".into(),
                sheet: "Sheet1".into(),
            },
            classification: Classification::new(Level::Restricted),
        }];
        let index = ClassificationIndex::build(&records);
        let mut policy = Policy::ai_cloud_processing_default();
        policy.redact_disallowed = false;
        let sink = MemoryAuditSink::new(10);
        let ctx = EnforceContext {
            document_id: "doc".into(),
            tool: "read_range".into(),
            tool_call_id: "1".into(),
            range: Some(range()),
            index: &index,
            policy: &policy,
        };
        let result = ToolResult::success(json!({"values": [["a", "b"]]}));
        let out = enforce(DlpShape::ReadRange, result, &ctx, &sink);
        assert!(!out.ok);
        assert_eq!(out.error_code.as_deref(), Some("permission_denied"));
    }

    #[test]
    fn derived_output_is_nullified_on_redact() {
        let records = vec![ClassificationRecord {
            selector: Scope::Sheet {
                document_id: "doc".into(),
                sheet: "Sheet1".into(),
            },
            classification: Classification::new(Level::Confidential),
        }];
        let index = ClassificationIndex::build(&records);
        let policy = Policy::ai_cloud_processing_default();
        let sink = MemoryAuditSink::new(10);
        let ctx = EnforceContext {
            document_id: "doc".into(),
            tool: "compute_statistics".into(),
            tool_call_id: "1".into(),
            range: Some(range()),
            index: &index,
            policy: &policy,
        };
        let result = ToolResult::success(json!({"mean": 5.0, "anomalies": [1, 2]}));
        let out = enforce(DlpShape::DerivedWholeOutput, result, &ctx, &sink);
        let data = out.data.unwrap();
        assert!(data["mean"].is_null());
        assert_eq!(data["anomalies"], json!([]));
    }

    #[test]
    fn error_results_pass_through_untouched() {
        let index = ClassificationIndex::build(&[]);
        let policy = Policy::ai_cloud_processing_default();
        let sink = MemoryAuditSink::new(10);
        let ctx = EnforceContext {
            document_id: "doc".into(),
            tool: "read_range".into(),
            tool_call_id: "1".into(),
            range: Some(range()),
            index: &index,
            policy: &policy,
        };
        let result = ToolResult::failure("validation_error", "bad range");
        let out = enforce(DlpShape::ReadRange, result, &ctx, &sink);
        assert!(!out.ok);
        assert_eq!(sink.len(), 0);
    }
}
