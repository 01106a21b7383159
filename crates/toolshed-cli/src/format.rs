//! Human-readable sizes and runtimes for terminal output.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with binary units: `512 B`, `1.5 KB`, `2.0 GB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS.get(unit).copied().unwrap_or("TB"))
}

/// Formats a runtime at the granularity that reads best.
///
/// Under a minute shows seconds, under two hours shows whole minutes,
/// anything longer shows hours with one decimal.
pub fn format_runtime(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 7200 {
        format!("{}min", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

/// `H:MM:SS`
pub fn format_runtime_compact(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{hours}:{mins:02}:{secs:02}")
}
