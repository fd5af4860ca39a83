// Reporting for race simulation results

use crate::models::{CsvResultRow, SimulationConfig, SimulationResult};
use std::path::Path;

/// Print one summary line per strategy
pub fn print_results(result: &SimulationResult) {
    println!(
        "{:<11} {:>7} {:>7} {:>7} {:>8} {:>9} {:>9} {:>9} {:>10}",
        "Strategy", "Stale", "Fresh", "Absent", "Stale %", "Writes", "Loads", "Cached", "Time"
    );
    println!("{}", "-".repeat(86));
    for report in &result.reports {
        println!(
            "{:<11} {:>7} {:>7} {:>7} {:>7.2}% {:>9} {:>9} {:>9} {:>9.3}s",
            report.strategy.as_str(),
            report.stale_entries,
            report.fresh_entries,
            report.absent_entries,
            report.stale_rate(),
            report.writes,
            report.loads,
            report.loads_cached,
            report.duration.as_secs_f64(),
        );
    }
}

/// Print each strategy's own counters
pub fn print_metrics(result: &SimulationResult) {
    for report in &result.reports {
        println!("\n{} metrics:", report.strategy);
        for (name, value) in &report.metrics {
            println!("  {name:<28} {value:>12.2}");
        }
    }
}

/// Export results to a CSV file, one row per strategy
pub fn export_csv(
    path: &Path,
    config: &SimulationConfig,
    result: &SimulationResult,
) -> Result<(), std::io::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for report in &result.reports {
        writer.serialize(CsvResultRow::new(config, report))?;
    }
    writer.flush()?;
    Ok(())
}
