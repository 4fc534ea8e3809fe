//! Result reporting and persistence.

use std::path::{Path, PathBuf};

use anyhow::Result;
use bottlenet_core::{Ranking, RoundResults};
use chrono::Local;

/// Print the ranking summary for a completed round.
pub fn print_results(results: &RoundResults) {
    let ranking = Ranking::from_results(results);
    if ranking.entries.is_empty() {
        println!("not enough nodes took part in this round to rank anything");
        return;
    }

    println!();
    println!(
        "Total Throughput : {}/s (max)  {}/s (avg)",
        humanize_ibytes(ranking.max),
        humanize_ibytes(ranking.avg)
    );
    println!();
    println!("Slowest nodes in your network:");
    for (pos, entry) in ranking.entries.iter().take(3).enumerate() {
        println!(
            "{}. {:<21} : {}/s",
            pos + 1,
            entry.addr,
            humanize_ibytes(entry.normalized)
        );
    }
}

/// Write the verbatim result map to `bottlenet_<timestamp>.json` in the
/// working directory.
pub fn save_results(results: &RoundResults) -> Result<PathBuf> {
    save_results_in(results, Path::new("."))
}

/// Write the verbatim result map into `dir`.
pub fn save_results_in(results: &RoundResults, dir: &Path) -> Result<PathBuf> {
    let filename = format!("bottlenet_{}.json", Local::now().format("%Y%m%d%H%M%S"));
    let path = dir.join(filename);
    std::fs::write(&path, serde_json::to_string_pretty(results)?)?;
    Ok(path)
}

/// IEC-humanized byte count, `1.5 MiB` style.
fn humanize_ibytes(value: f64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut value = value.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
