//! Output formatting for CLI display.

use crate::{
    cycle::CycleReport,
    model::{ObservationRecord, OperationWindow},
};

/// One queued observation per line.
pub(super) fn format_record(record: &ObservationRecord) -> String {
    let range = match (record.summary.min, record.summary.max) {
        (Some(min), Some(max)) => format!(" [{min}..{max}]"),
        _ => String::new(),
    };
    format!(
        "#{}  {}  {} {}={}{range}  -> {}",
        record.id,
        record.phenomenon_time.as_str(),
        record.device_name,
        record.variable,
        record.summary.mean,
        record.operation_id,
    )
}

pub(super) fn format_window(window: &OperationWindow) -> String {
    let bound = |b: &Option<String>| b.clone().unwrap_or_else(|| "open".to_string());
    format!(
        "{}  operation {}  {} to {}",
        window.pile_name,
        window.operation_id,
        bound(&window.start),
        bound(&window.end),
    )
}

pub(super) fn format_report(operation_id: &str, report: &CycleReport) -> String {
    let mut out = format!(
        "Operation {operation_id}: {} sent, {} queued, {} resent",
        report.sent, report.queued, report.resent
    );
    if report.devices_skipped > 0 || report.devices_failed > 0 {
        out.push_str(&format!(
            " ({} device(s) without asset, {} failed)",
            report.devices_skipped, report.devices_failed
        ));
    }
    out
}
