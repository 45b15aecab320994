//! CSV metrics export: one row per simulation run.

use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crossway_kernel::metrics::MetricsReport;

const HEADER: &str = "timestamp,veh_per_min,avg_wait,utilization,fairness,total_vehicles,\
context_switches,emergency_response,deadlocks_prevented,queue_overflows,simulation_time";

/// Append one metrics row to `path`, writing the header first when the
/// file is newly created.
pub fn append_metrics_csv(path: &Path, report: &MetricsReport) -> std::io::Result<()> {
    let is_new = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    if is_new {
        writeln!(file, "{HEADER}")?;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    writeln!(
        file,
        "{timestamp},{:.2},{:.2},{:.3},{:.3},{},{},{:.2},{},{},{}",
        report.vehicles_per_minute,
        report.avg_wait_s,
        report.utilization,
        report.fairness_index,
        report.total_vehicles_processed,
        report.context_switches,
        report.average_emergency_response.as_secs_f64(),
        report.deadlocks_prevented,
        report.queue_overflows,
        report.simulation_time.as_secs(),
    )
}
