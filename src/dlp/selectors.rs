//! DLP selectors and the classification index.
//!
//! A selector targets a scope (document, sheet, column, range, or cell) and
//! carries a classification. The effective classification of a cell is the
//! maximum classification across every selector whose scope covers it.
//! [`ClassificationIndex`] builds a one-time per-sheet index so a
//! `read_range` of N cells against M selectors resolves in roughly
//! `O(N + M)` rather than `O(N*M)`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Public,
    Internal,
    Confidential,
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub level: Level,
    pub labels: Vec<String>,
}

impl Classification {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            labels: Vec::new(),
        }
    }

    /// Combines two classifications: max level, union of labels.
    pub fn merge(&self, other: &Classification) -> Classification {
        let level = self.level.max(other.level);
        let mut labels = self.labels.clone();
        for label in &other.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        Classification { level, labels }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Document {
        document_id: String,
    },
    Sheet {
        document_id: String,
        sheet: String,
    },
    Column {
        document_id: String,
        sheet: String,
        col: u32,
    },
    Range {
        document_id: String,
        sheet: String,
        start_row: u32,
        start_col: u32,
        end_row: u32,
        end_col: u32,
    },
    Cell {
        document_id: String,
        sheet: String,
        row: u32,
        col: u32,
    },
}

impl Scope {
    fn document_id(&self) -> &str {
        match self {
            Scope::Document { document_id }
            | Scope::Sheet { document_id, .. }
            | Scope::Column { document_id, .. }
            | Scope::Range { document_id, .. }
            | Scope::Cell { document_id, .. } => document_id,
        }
    }

    fn sheet(&self) -> Option<&str> {
        match self {
            Scope::Document { .. } => None,
            Scope::Sheet { sheet, .. }
            | Scope::Column { sheet, .. }
            | Scope::Range { sheet, .. }
            | Scope::Cell { sheet, .. } => Some(sheet),
        }
    }

    fn covers(&self, document_id: &str, sheet: &str, row: u32, col: u32) -> bool {
        if self.document_id() != document_id {
            return false;
        }
        match self {
            Scope::Document { .. } => true,
            Scope::Sheet { sheet: s, .. } => s == sheet,
            Scope::Column { sheet: s, col: c, .. } => s == sheet && *c == col,
            Scope::Range {
                sheet: s,
                start_row,
                start_col,
                end_row,
                end_col,
                ..
            } => {
                s == sheet
                    && row >= *start_row
                    && row <= *end_row
                    && col >= *start_col
                    && col <= *end_col
            }
            Scope::Cell {
                sheet: s,
                row: r,
                col: c,
                ..
            } => s == sheet && *r == row && *c == col,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub selector: Scope,
    pub classification: Classification,
}

/// A one-time-built index over a record set, keyed by `(document, sheet)`
/// and split by scope granularity so cell lookups only scan records that
/// could possibly cover the queried sheet.
pub struct ClassificationIndex {
    by_document: HashMap<String, Vec<ClassificationRecord>>,
    by_sheet: HashMap<(String, String), Vec<ClassificationRecord>>,
}

impl ClassificationIndex {
    pub fn build(records: &[ClassificationRecord]) -> Self {
        let mut by_document: HashMap<String, Vec<ClassificationRecord>> = HashMap::new();
        let mut by_sheet: HashMap<(String, String), Vec<ClassificationRecord>> = HashMap::new();

        for record in records {
            let doc = record.selector.document_id().to_string();
            match record.selector.sheet() {
                None => by_document.entry(doc).or_default().push(record.clone()),
                Some(sheet) => by_sheet
                    .entry((doc, sheet.to_string()))
                    .or_default()
                    .push(record.clone()),
            }
        }

        Self { by_document, by_sheet }
    }

    /// Effective classification for a single cell: max over every covering
    /// selector, in document -> sheet -> column -> range -> cell order
    /// (order does not affect the result since the combine is commutative).
    pub fn classify_cell(&self, document_id: &str, sheet: &str, row: u32, col: u32) -> Classification {
        let mut result = Classification::new(Level::Public);
        if let Some(records) = self.by_document.get(document_id) {
            for record in records {
                if record.selector.covers(document_id, sheet, row, col) {
                    result = result.merge(&record.classification);
                }
            }
        }
        if let Some(records) = self.by_sheet.get(&(document_id.to_string(), sheet.to_string())) {
            for record in records {
                if record.selector.covers(document_id, sheet, row, col) {
                    result = result.merge(&record.classification);
                }
            }
        }
        result
    }

    /// Effective classification for a rectangular range: max over the
    /// range's cells, computed without enumerating every cell by only
    /// considering selectors whose scope can intersect the range.
    pub fn classify_range(
        &self,
        document_id: &str,
        sheet: &str,
        start_row: u32,
        start_col: u32,
        end_row: u32,
        end_col: u32,
    ) -> Classification {
        let mut result = Classification::new(Level::Public);
        let candidates = self
            .by_document
            .get(document_id)
            .into_iter()
            .flatten()
            .chain(
                self.by_sheet
                    .get(&(document_id.to_string(), sheet.to_string()))
                    .into_iter()
                    .flatten(),
            );
        for record in candidates {
            if scope_intersects_range(&record.selector, document_id, sheet, start_row, start_col, end_row, end_col) {
                result = result.merge(&record.classification);
            }
        }
        result
    }
}

fn scope_intersects_range(
    scope: &Scope,
    document_id: &str,
    sheet: &str,
    start_row: u32,
    start_col: u32,
    end_row: u32,
    end_col: u32,
) -> bool {
    if scope.document_id() != document_id {
        return false;
    }
    match scope {
        Scope::Document { .. } => true,
        Scope::Sheet { sheet: s, .. } => s == sheet,
        Scope::Column { sheet: s, col, .. } => s == sheet && *col >= start_col && *col <= end_col,
        Scope::Range {
            sheet: s,
            start_row: r1,
            start_col: c1,
            end_row: r2,
            end_col: c2,
            ..
        } => s == sheet && *r1 <= end_row && start_row <= *r2 && *c1 <= end_col && start_col <= *c2,
        Scope::Cell {
            sheet: s,
            row,
            col,
            ..
        } => {
            s == sheet
                && *row >= start_row
                && *row <= end_row
                && *col >= start_col
                && *col <= end_col
        }
    }
}
