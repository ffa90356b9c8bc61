//! Cell-level response metrics, computed from a stimulus response table.

use anyhow::Context;
use indexmap::IndexMap;

use crate::field::Field;
use crate::table::Table;

/// Responses below this p-value count as significant.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Trial-averaged response. NaN for no responses.
pub fn mean_response(responses: &[f64]) -> f64 {
    if responses.is_empty() {
        return f64::NAN;
    }
    responses.iter().sum::<f64>() / responses.len() as f64
}

/// Fraction of presentations whose p-value is below [`SIGNIFICANCE_LEVEL`]. NaN for no
/// presentations.
pub fn fraction_significant_trials(p_values: &[f64]) -> f64 {
    if p_values.is_empty() {
        return f64::NAN;
    }
    let significant = p_values.iter().filter(|p| **p < SIGNIFICANCE_LEVEL).count();
    significant as f64 / p_values.len() as f64
}

#[derive(Default)]
struct CellAccumulator {
    responses: Vec<f64>,
    p_values: Vec<f64>,
}

/// One metrics row per cell, in first-seen order, ready for
/// [`crate::writers::write_metrics`]:
/// `experiment_id, cell_specimen_id, mean_response, fraction_significant_trials`.
pub fn metrics_table(stimulus_response: &Table, ophys_experiment_id: i64) -> anyhow::Result<Table> {
    let cells = stimulus_response.require_column("cell_specimen_id")?;
    let responses = stimulus_response.require_column("mean_response")?;
    let p_values = stimulus_response.require_column("p_value")?;

    let mut by_cell: IndexMap<i64, CellAccumulator> = IndexMap::new();
    for (i, cell) in cells.iter().enumerate() {
        let id = cell
            .as_i64()
            .with_context(|| format!("row {i}: cell_specimen_id is not an integer"))?;
        let acc = by_cell.entry(id).or_default();
        acc.responses.push(responses[i].as_f64().unwrap_or(f64::NAN));
        acc.p_values.push(p_values[i].as_f64().unwrap_or(f64::NAN));
    }

    let n = by_cell.len();
    let mut experiment = Vec::with_capacity(n);
    let mut cell_ids = Vec::with_capacity(n);
    let mut means = Vec::with_capacity(n);
    let mut fractions = Vec::with_capacity(n);
    for (cell, acc) in by_cell {
        experiment.push(Field::I64(ophys_experiment_id));
        cell_ids.push(Field::I64(cell));
        means.push(Field::F64(mean_response(&acc.responses)));
        fractions.push(Field::F64(fraction_significant_trials(&acc.p_values)));
    }

    Ok(Table::new()
        .with_column("experiment_id", experiment)?
        .with_column("cell_specimen_id", cell_ids)?
        .with_column("mean_response", means)?
        .with_column("fraction_significant_trials", fractions)?)
}
