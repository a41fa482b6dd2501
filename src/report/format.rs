//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the core stays free of presentation
//! - output changes are localized

use chrono::NaiveDate;

use crate::app::pipeline::RunReport;
use crate::balance::BalanceOutcome;
use crate::consolidate::ConsolidationSummary;
use crate::domain::{Cadence, ConsolidationStatus, Period};
use crate::train::EpochSelection;

/// Full run summary: balancing, chosen epoch, consolidation statuses.
pub fn format_run_report(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("=== marker run ===\n");
    out.push_str(&format!("ROI: {}\n", report.roi_name));
    out.push_str(&format!("Parcels: {}\n", report.parcels));
    out.push('\n');

    out.push_str(&format_balance(&report.balance));
    out.push('\n');

    match &report.selection {
        Some(selection) => out.push_str(&format_selection(selection)),
        None => out.push_str("Best epoch: n/a (non-iterative model)\n"),
    }
    out.push('\n');

    if !report.prediction_failures.is_empty() {
        out.push_str(&format!(
            "Rejected predictions: {} (consolidated as NO_PREDICTION)\n",
            report.prediction_failures.len()
        ));
        for failure in report.prediction_failures.iter().take(5) {
            out.push_str(&format!("  {}: {}\n", failure.parcel_id, failure.error));
        }
        out.push('\n');
    }

    out.push_str(&format_consolidation_summary(&report.summary));
    out
}

/// Per-class balancing table.
pub fn format_balance(outcome: &BalanceOutcome) -> String {
    let mut out = String::new();
    out.push_str("Balancing:\n");
    out.push_str(&format!(
        "{:<24} {:>8} {:>8} {:>8} {:>10} {:>8} {:>8}\n",
        "class", "input", "eligible", "selected", "duplicates", "train", "valid"
    ));
    out.push_str(&format!("{}\n", "-".repeat(24 + 9 * 5 + 11)));

    for c in &outcome.classes {
        out.push_str(&format!(
            "{:<24} {:>8} {:>8} {:>8} {:>10} {:>8} {:>8}\n",
            truncate(&c.class.name, 24),
            c.input,
            c.eligible,
            c.selected,
            c.duplicates,
            c.train_count(),
            c.validation
        ));
    }
    for d in &outcome.dropped {
        out.push_str(&format!("  (dropped {}) {}\n", d.class, d.reason));
    }
    out.push_str(&format!(
        "Total: train={} validation={}\n",
        outcome.train.len(),
        outcome.validation.len()
    ));
    out
}

pub fn format_selection(selection: &EpochSelection) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Best epoch: {} ({}={:.6})\n",
        selection.epoch,
        selection.strategy.display_name(),
        selection.criterion
    ));
    if let Some(fallback) = &selection.fallback {
        out.push_str(&format!("Fallback: {fallback}\n"));
    }
    out
}

pub fn format_consolidation_summary(summary: &ConsolidationSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Consolidation ({} parcels):\n", summary.total));
    for status in ConsolidationStatus::ALL {
        out.push_str(&format!(
            "  {:<18} {:>8} {:>7.2}%\n",
            status.as_str(),
            summary.count(status),
            summary.pct(status)
        ));
    }
    out.push_str(&format!("  OK with another class than declared: {}\n", summary.ok_changed));
    out
}

/// Requested vs aligned range and the enumerated periods.
pub fn format_alignment(
    cadence: Cadence,
    requested: (NaiveDate, NaiveDate),
    aligned: (NaiveDate, NaiveDate),
    periods: &[Period],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Cadence: {}\n", cadence.display_name()));
    out.push_str(&format!("Requested: {} .. {}\n", requested.0, requested.1));
    out.push_str(&format!("Aligned:   {} .. {} (end exclusive)\n", aligned.0, aligned.1));
    out.push_str(&format!("Periods: {}\n", periods.len()));
    for p in periods {
        out.push_str(&format!("  {} .. {} ({} days)\n", p.start, p.end, p.days()));
    }
    out
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
