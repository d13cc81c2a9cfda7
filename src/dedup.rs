//! Retrieval ranking / dedup: drops near-duplicate search results
//! referring to overlapping workbook rectangles, keeping the
//! highest-scoring (input-order) survivor.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl Rect {
    fn area(&self) -> u64 {
        (self.end_row - self.start_row + 1) as u64 * (self.end_col - self.start_col + 1) as u64
    }

    fn intersection_area(&self, other: &Rect) -> u64 {
        let row_overlap = self.end_row.min(other.end_row) as i64 - self.start_row.max(other.start_row) as i64 + 1;
        let col_overlap = self.end_col.min(other.end_col) as i64 - self.start_col.max(other.start_col) as i64 + 1;
        if row_overlap <= 0 || col_overlap <= 0 {
            0
        } else {
            row_overlap as u64 * col_overlap as u64
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub workbook_id: String,
    pub sheet_name: String,
    pub rect: Option<Rect>,
}

const DEFAULT_OVERLAP_RATIO: f64 = 0.8;

/// Walks `results` in input (already score-sorted) order, keeping the
/// first occurrence of each id and dropping any later result whose
/// rectangle overlaps an already-kept result (same workbook+sheet) by more
/// than `overlap_ratio` of the smaller rectangle's area. Results without
/// coordinates always pass through.
pub fn dedupe(results: Vec<SearchResult>, overlap_ratio: Option<f64>) -> Vec<SearchResult> {
    let overlap_ratio = overlap_ratio.unwrap_or(DEFAULT_OVERLAP_RATIO);
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut kept: Vec<SearchResult> = Vec::new();

    for result in results {
        if !seen_ids.insert(result.id.clone()) {
            continue;
        }
        let Some(rect) = result.rect else {
            kept.push(result);
            continue;
        };
        let overlaps_existing = kept.iter().any(|existing| {
            existing.workbook_id == result.workbook_id
                && existing.sheet_name == result.sheet_name
                && existing
                    .rect
                    .map(|existing_rect| {
                        let smaller_area = rect.area().min(existing_rect.area());
                        if smaller_area == 0 {
                            false
                        } else {
                            rect.intersection_area(&existing_rect) as f64 / smaller_area as f64 > overlap_ratio
                        }
                    })
                    .unwrap_or(false)
        });
        if !overlaps_existing {
            kept.push(result);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, rect: Option<Rect>) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            workbook_id: "wb".into(),
            sheet_name: "Sheet1".into(),
            rect,
        }
    }

    #[test]
    fn drops_repeated_ids() {
        let results = vec![
            result("a", None),
            result("a", None),
        ];
        assert_eq!(dedupe(results, None).len(), 1);
    }

    #[test]
    fn drops_heavily_overlapping_rectangles() {
        let a = Rect {
            start_row: 1,
            start_col: 1,
            end_row: 10,
            end_col: 10,
        };
        let b = Rect {
            start_row: 1,
            start_col: 1,
            end_row: 9,
            end_col: 9,
        };
        let results = vec![result("a", Some(a)), result("b", Some(b))];
        let kept = dedupe(results, None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }

    #[test]
    fn keeps_non_overlapping_rectangles() {
        let a = Rect {
            start_row: 1,
            start_col: 1,
            end_row: 2,
            end_col: 2,
        };
        let b = Rect {
            start_row: 10,
            start_col: 10,
            end_row: 11,
            end_col: 11,
        };
        let results = vec![result("a", Some(a)), result("b", Some(b))];
        assert_eq!(dedupe(results, None).len(), 2);
    }

    #[test]
    fn results_without_coordinates_always_pass_through() {
        let results = vec![result("a", None), result("b", None)];
        assert_eq!(dedupe(results, None).len(), 2);
    }

    #[test]
    fn custom_overlap_ratio_is_respected() {
        let a = Rect {
            start_row: 1,
            start_col: 1,
            end_row: 10,
            end_col: 10,
        };
        let b = Rect {
            start_row: 1,
            start_col: 1,
            end_row: 5,
            end_col: 10,
        };
        // b is half of a's area and fully contained -> overlap ratio 1.0
        let results = vec![result("a", Some(a)), result("b", Some(b))];
        assert_eq!(dedupe(results.clone(), Some(0.99)).len(), 1);
        assert_eq!(dedupe(results, Some(1.1)).len(), 2);
    }
}
