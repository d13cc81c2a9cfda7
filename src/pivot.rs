//! Pivot table builder: group/aggregate a rectangular region into a
//! cross-tabulated output grid.

use crate::model::CellValue;
use crate::stats::Accumulator;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Count,
    CountNumbers,
    Average,
    Min,
    Max,
    Product,
    Var,
    VarP,
    StdDev,
    StdDevP,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValueSpec {
    pub field: String,
    pub aggregation: Aggregation,
}

#[derive(Debug, thiserror::Error)]
pub enum PivotError {
    #[error("field '{0}' not found in header row")]
    MissingField(String),
    #[error("input grid has no header row")]
    EmptyGrid,
}

fn cell_to_key(value: &CellValue) -> String {
    value.as_text_lossy()
}

fn cell_to_number(value: &CellValue) -> f64 {
    value.as_f64_lossy()
}

fn finalize(acc: &Accumulator, agg: Aggregation) -> CellValue {
    let v = match agg {
        Aggregation::Sum => Some(acc.sum),
        Aggregation::Count => Some(acc.count as f64),
        Aggregation::CountNumbers => Some(acc.count_numbers as f64),
        Aggregation::Average => {
            if acc.count_numbers == 0 {
                None
            } else {
                Some(acc.mean)
            }
        }
        Aggregation::Min => acc.min,
        Aggregation::Max => acc.max,
        Aggregation::Product => Some(acc.product),
        Aggregation::Var => acc.variance(),
        Aggregation::VarP => acc.population_variance(),
        Aggregation::StdDev => acc.stdev(),
        Aggregation::StdDevP => acc.population_stdev(),
    };
    v.map(CellValue::Number).unwrap_or(CellValue::Null)
}

/// Builds a pivot table from a header-first 2-D grid.
///
/// Output layout: `[header row; one row per distinct rowKey, sorted
/// lexicographically; optional Grand Total row]`. When `column_fields` is
/// non-empty, Grand Total columns are appended per value spec.
pub fn build_pivot(
    grid: &[Vec<CellValue>],
    row_fields: &[String],
    column_fields: &[String],
    value_specs: &[ValueSpec],
) -> Result<Vec<Vec<CellValue>>, PivotError> {
    let header = grid.first().ok_or(PivotError::EmptyGrid)?;
    let col_index = |name: &str| -> Result<usize, PivotError> {
        header
            .iter()
            .position(|h| cell_to_key(h) == name)
            .ok_or_else(|| PivotError::MissingField(name.to_string()))
    };

    let row_idx: Vec<usize> = row_fields.iter().map(|f| col_index(f)).collect::<Result<_, _>>()?;
    let col_idx: Vec<usize> = column_fields
        .iter()
        .map(|f| col_index(f))
        .collect::<Result<_, _>>()?;
    let value_idx: Vec<(usize, Aggregation)> = value_specs
        .iter()
        .map(|spec| col_index(&spec.field).map(|i| (i, spec.aggregation)))
        .collect::<Result<_, _>>()?;

    // rowKey -> colKey -> valueSpecIndex -> accumulator
    let mut table: IndexMap<Vec<String>, IndexMap<Vec<String>, Vec<Accumulator>>> = IndexMap::new();
    let mut col_keys_seen: IndexMap<Vec<String>, ()> = IndexMap::new();

    for record in grid.iter().skip(1) {
        let row_key: Vec<String> = row_idx.iter().map(|&i| cell_to_key(&record[i])).collect();
        let col_key: Vec<String> = col_idx.iter().map(|&i| cell_to_key(&record[i])).collect();
        col_keys_seen.entry(col_key.clone()).or_insert(());

        let row_entry = table.entry(row_key).or_default();
        let cell_entry = row_entry
            .entry(col_key)
            .or_insert_with(|| vec![Accumulator::default(); value_idx.len()]);
        for (slot, &(field_idx, _)) in cell_entry.iter_mut().zip(value_idx.iter()) {
            slot.push(cell_to_number(&record[field_idx]));
        }
    }

    let mut row_keys: Vec<Vec<String>> = table.keys().cloned().collect();
    row_keys.sort_by(lexicographic);
    let mut col_keys: Vec<Vec<String>> = col_keys_seen.keys().cloned().collect();
    col_keys.sort_by(lexicographic);

    let mut output = Vec::new();

    // Header row
    let mut header_row: Vec<CellValue> = row_fields.iter().map(|f| CellValue::Text(f.clone())).collect();
    if column_fields.is_empty() {
        for spec in value_specs {
            header_row.push(CellValue::Text(spec.field.clone()));
        }
    } else {
        for col_key in &col_keys {
            for spec in value_specs {
                header_row.push(CellValue::Text(format!(
                    "{} | {}",
                    format_key_str(col_key),
                    spec.field
                )));
            }
        }
        for spec in value_specs {
            header_row.push(CellValue::Text(format!("Grand Total | {}", spec.field)));
        }
    }
    output.push(header_row);

    let mut grand_total: Vec<Accumulator> = vec![Accumulator::default(); value_idx.len()];

    for row_key in &row_keys {
        let row_key_all_blank = row_key.iter().all(|part| part.is_empty());
        let mut out_row: Vec<CellValue> = row_key
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, part)| {
                if row_key_all_blank {
                    if i == 0 {
                        CellValue::Text("(blank)".to_string())
                    } else {
                        CellValue::Text(String::new())
                    }
                } else {
                    CellValue::Text(part)
                }
            })
            .collect();
        let row_data = &table[row_key];
        let mut row_total: Vec<Accumulator> = vec![Accumulator::default(); value_idx.len()];

        if column_fields.is_empty() {
            let accs = row_data
                .get(&EMPTY_KEY)
                .cloned()
                .unwrap_or_else(|| vec![Accumulator::default(); value_idx.len()]);
            for (i, &(_, agg)) in value_idx.iter().enumerate() {
                out_row.push(finalize(&accs[i], agg));
                row_total[i] = row_total[i].merge(&accs[i]);
            }
        } else {
            for col_key in &col_keys {
                let accs = row_data.get(col_key).cloned();
                for (i, &(_, agg)) in value_idx.iter().enumerate() {
                    let acc = accs.as_ref().map(|a| a[i]).unwrap_or_default();
                    out_row.push(finalize(&acc, agg));
                    row_total[i] = row_total[i].merge(&acc);
                }
            }
            for (i, &(_, agg)) in value_idx.iter().enumerate() {
                out_row.push(finalize(&row_total[i], agg));
            }
        }

        for (i, acc) in row_total.iter().enumerate() {
            grand_total[i] = grand_total[i].merge(acc);
        }
        output.push(out_row);
    }

    if !column_fields.is_empty() {
        let mut total_row: Vec<CellValue> = row_fields
            .iter()
            .map(|_| CellValue::Text("Grand Total".to_string()))
            .collect();
        for col_key in &col_keys {
            let mut col_total: Vec<Accumulator> = vec![Accumulator::default(); value_idx.len()];
            for row_key in &row_keys {
                if let Some(accs) = table[row_key].get(col_key) {
                    for (i, acc) in accs.iter().enumerate() {
                        col_total[i] = col_total[i].merge(acc);
                    }
                }
            }
            for (i, &(_, agg)) in value_idx.iter().enumerate() {
                total_row.push(finalize(&col_total[i], agg));
            }
        }
        for (i, &(_, agg)) in value_idx.iter().enumerate() {
            total_row.push(finalize(&grand_total[i], agg));
        }
        output.push(total_row);
    }

    Ok(output)
}

static EMPTY_KEY: Vec<String> = Vec::new();

fn lexicographic(a: &Vec<String>, b: &Vec<String>) -> Ordering {
    a.cmp(b)
}

fn format_key_str(parts: &[String]) -> String {
    if parts.iter().all(|p| p.is_empty()) {
        "(blank)".to_string()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Vec<CellValue>> {
        vec![
            vec![
                CellValue::Text("Region".into()),
                CellValue::Text("Product".into()),
                CellValue::Text("Amount".into()),
            ],
            vec![
                CellValue::Text("East".into()),
                CellValue::Text("Widget".into()),
                CellValue::Number(10.0),
            ],
            vec![
                CellValue::Text("East".into()),
                CellValue::Text("Widget".into()),
                CellValue::Number(5.0),
            ],
            vec![
                CellValue::Text("West".into()),
                CellValue::Text("Gadget".into()),
                CellValue::Number(7.0),
            ],
        ]
    }

    #[test]
    fn sums_grouped_by_row_field() {
        let specs = vec![ValueSpec {
            field: "Amount".into(),
            aggregation: Aggregation::Sum,
        }];
        let out = build_pivot(&grid(), &["Region".to_string()], &[], &specs).unwrap();
        assert_eq!(out[0], vec![CellValue::Text("Region".into()), CellValue::Text("Amount".into())]);
        // East sorts before West lexicographically
        assert_eq!(out[1][0], CellValue::Text("East".into()));
        assert_eq!(out[1][1], CellValue::Number(15.0));
        assert_eq!(out[2][1], CellValue::Number(7.0));
    }

    #[test]
    fn deterministic_across_runs() {
        let specs = vec![ValueSpec {
            field: "Amount".into(),
            aggregation: Aggregation::Sum,
        }];
        let a = build_pivot(&grid(), &["Region".to_string()], &[], &specs).unwrap();
        let b = build_pivot(&grid(), &["Region".to_string()], &[], &specs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_field_errors() {
        let specs = vec![ValueSpec {
            field: "Amount".into(),
            aggregation: Aggregation::Sum,
        }];
        let err = build_pivot(&grid(), &["Nope".to_string()], &[], &specs);
        assert!(matches!(err, Err(PivotError::MissingField(_))));
    }

    #[test]
    fn column_fields_add_grand_total() {
        let specs = vec![ValueSpec {
            field: "Amount".into(),
            aggregation: Aggregation::Sum,
        }];
        let out = build_pivot(
            &grid(),
            &["Region".to_string()],
            &["Product".to_string()],
            &specs,
        )
        .unwrap();
        assert_eq!(out.last().unwrap()[0], CellValue::Text("Grand Total".into()));
    }
}
