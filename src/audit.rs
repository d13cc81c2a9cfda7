//! Audit trail: a pluggable sink every executor call reports to,
//! independent of whether DLP enforcement ran. Built on the same
//! `tracing`-first logging posture as the rest of the crate, plus an
//! in-memory sink the preview gate and tests can inspect directly.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The `ai.tool_dlp` decision record plus the general `ToolInvocation`
/// envelope emitted for every tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tool: String,
    pub tool_call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workbook_id: Option<String>,
    pub started_at_ms: i64,
    pub duration_ms: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_cell_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_derived: Option<bool>,
}

impl AuditEvent {
    pub fn invocation(tool: impl Into<String>, tool_call_id: impl Into<String>, started_at_ms: i64, duration_ms: i64, ok: bool) -> Self {
        Self {
            event_type: "tool_invocation".into(),
            tool: tool.into(),
            tool_call_id: tool_call_id.into(),
            workbook_id: None,
            started_at_ms,
            duration_ms,
            ok,
            error_code: None,
            document_id: None,
            action: None,
            range: None,
            selection_classification: None,
            decision: None,
            redacted_cell_count: None,
            redacted_derived: None,
        }
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_workbook(mut self, workbook_id: impl Into<String>) -> Self {
        self.workbook_id = Some(workbook_id.into());
        self
    }
}

/// Sinks never cause a tool call to fail: `record` is infallible by
/// construction, matching the cache's best-effort posture.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Bounded, oldest-first-eviction ring buffer, used by tests and the
/// preview gate to inspect what was recorded during a simulated run.
pub struct MemoryAuditSink {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Emits one structured `info!`/`warn!` event per record via `tracing`,
/// using consistent field names so downstream log processors can key on
/// them regardless of which sink produced the line.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        if event.ok {
            tracing::info!(
                tool = %event.tool,
                tool_call_id = %event.tool_call_id,
                ok = event.ok,
                decision = event.decision.as_deref().unwrap_or("n/a"),
                duration_ms = event.duration_ms,
                "tool invocation recorded"
            );
        } else {
            tracing::warn!(
                tool = %event.tool,
                tool_call_id = %event.tool_call_id,
                ok = event.ok,
                error_code = event.error_code.as_deref().unwrap_or("unknown"),
                duration_ms = event.duration_ms,
                "tool invocation failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_first() {
        let sink = MemoryAuditSink::new(2);
        sink.record(AuditEvent::invocation("read_range", "1", 0, 1, true));
        sink.record(AuditEvent::invocation("read_range", "2", 1, 1, true));
        sink.record(AuditEvent::invocation("read_range", "3", 2, 1, true));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tool_call_id, "2");
        assert_eq!(events[1].tool_call_id, "3");
    }

    #[test]
    fn tracing_sink_never_panics_on_failure_record() {
        let sink = TracingAuditSink;
        sink.record(AuditEvent::invocation("write_cell", "1", 0, 1, false).with_error_code("validation_error"));
    }
}
