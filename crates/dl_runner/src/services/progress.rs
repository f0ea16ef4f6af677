use crate::models::types::UploadStats;

/// Parses rclone `-P` stats output into `UploadStats`. This is the only
/// place that knows the line format; everything else consumes the struct.
///
/// rclone interleaves two kinds of `Transferred:` lines in its stats block:
/// a byte line (`10.500 MiB / 100.000 MiB, 10%, ...`) and a file-count line
/// (`3 / 12, 25%`). Per-file progress shows up as `* <name>: <pct>% ...`.
/// The latest occurrence of each wins.
pub fn parse_upload_log(log: &str) -> Option<UploadStats> {
    let mut stats = UploadStats::default();
    let mut seen = false;

    for line in log.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("Transferred:") {
            if parse_transferred(rest, &mut stats) {
                seen = true;
            }
        } else if let Some(rest) = trimmed.strip_prefix("* ") {
            parse_file_line(rest, &mut stats);
        }
    }

    seen.then_some(stats)
}

fn parse_transferred(rest: &str, stats: &mut UploadStats) -> bool {
    let mut parts = rest.split(',');
    let amounts = parts.next().unwrap_or_default().trim();
    let Some((done, total)) = amounts.split_once('/') else {
        return false;
    };
    let done = done.trim();
    let total = total.trim();
    let percent = parts
        .next()
        .and_then(|p| p.trim().strip_suffix('%'))
        .and_then(|p| p.parse::<f32>().ok());

    // Bare integers on both sides means the file-count line.
    match (done.parse::<u64>(), total.parse::<u64>()) {
        (Ok(done), Ok(total)) => {
            stats.uploaded_files = Some(done);
            stats.total_files = Some(total);
            if stats.percent.is_none() {
                stats.percent = percent;
            }
        }
        _ => {
            stats.transferred = Some(done.to_string());
            stats.total = Some(total.to_string());
            stats.percent = percent.or(stats.percent);
        }
    }
    true
}

fn parse_file_line(rest: &str, stats: &mut UploadStats) {
    let Some((name, progress)) = rest.rsplit_once(':') else {
        return;
    };
    let percent = progress
        .trim()
        .split(|c: char| c == '%' || c == ',')
        .next()
        .and_then(|p| p.trim().parse::<f32>().ok());
    if let Some(percent) = percent {
        stats.current_file = Some(name.trim().to_string());
        stats.file_percent = Some(percent);
    }
}
