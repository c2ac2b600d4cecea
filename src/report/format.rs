//! Formatted terminal output: model tables, fit diagnostics, run summaries.
//!
//! Formatting lives here so the fitting and estimation code stays free of
//! presentation details.

use std::path::PathBuf;

use crate::estimate::ReducedDataset;
use crate::fit::FitResult;
use crate::models::{Models, SkyModel};

/// Table of every component and parameter, marking which ones the fit may move.
pub fn format_models(models: &Models) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Models: {} components, {} free parameters\n",
        models.len(),
        models.free_parameters().len()
    ));
    for model in models.iter() {
        out.push('\n');
        out.push_str(&format_component(model));
    }
    out
}

fn format_component(model: &SkyModel) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} [{} x {}]\n",
        model.name,
        model.spectral.kind.type_name(),
        model.spatial.kind.type_name()
    ));
    out.push_str(format!("  {:<12} {:>14} {:<16} {:<6}\n", "name", "value", "unit", "state").trim_end());
    out.push('\n');
    out.push_str(format!("  {:-<12} {:-<14} {:-<16} {:-<6}\n", "", "", "", "").trim_end());
    out.push('\n');
    for p in model.parameters() {
        let state = if p.frozen { "frozen" } else { "free" };
        out.push_str(
            format!(
                "  {:<12} {:>14} {:<16} {:<6}\n",
                truncate(&p.name, 12),
                fmt_value(p.value),
                truncate(&p.unit, 16),
                state
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Outcome of the background fit.
pub fn format_fit_summary(result: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Background fit: {} after {} iterations ({})\n",
        if result.success { "converged" } else { "failed" },
        result.iterations,
        result.message
    ));
    out.push_str(&format!(
        "Cash statistic: {:.3} -> {:.3} (delta {:.3})\n",
        result.initial_stat,
        result.total_stat,
        result.total_stat - result.initial_stat
    ));
    for p in &result.parameters {
        out.push_str(&format!(
            "- {}: {} -> {}\n",
            p.label,
            fmt_value(p.initial),
            fmt_value(p.value)
        ));
    }
    out
}

/// One line per dataset: reduced and written, or why not.
pub fn format_reduction(reduced: &[ReducedDataset], written: &[PathBuf]) -> String {
    let mut out = String::new();
    for item in reduced {
        match &item.maps {
            Ok(maps) => {
                let keys: Vec<&str> = maps.keys().collect();
                out.push_str(&format!("{:<16} ok     [{}]\n", item.name, keys.join(", ")));
            }
            Err(e) => out.push_str(&format!("{:<16} failed {e}\n", item.name)),
        }
    }
    for path in written {
        out.push_str(&format!("wrote {}\n", path.display()));
    }
    out
}

fn fmt_value(v: f64) -> String {
    if v != 0.0 && (v.abs() < 1e-3 || v.abs() >= 1e5) {
        format!("{v:.4e}")
    } else {
        format!("{v:.5}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
