//! Parsing of biolatency histogram output.

use serde::Serialize;

/// Lines before the first histogram row: banner, blank line, column header.
const HEADER_LINES: usize = 3;

/// One row of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencyBucket {
    /// Range label, e.g. `16-31`.
    pub usecs: String,
    pub low: Option<u64>,
    pub high: Option<u64>,
    pub count: u64,
}

/// Parse biolatency output such as
///
/// ```text
/// Tracing block device I/O... Hit Ctrl-C to end.
///
///      usecs               : count    distribution
///          0 -> 1          : 0        |                                        |
///         16 -> 31         : 12       |****                                    |
/// ```
///
/// Rows with fewer than three `:`/`|` separated parts, or a non-numeric
/// count, are skipped.
pub fn parse_histogram(output: &str) -> Vec<LatencyBucket> {
    output
        .lines()
        .skip(HEADER_LINES)
        .filter_map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Option<LatencyBucket> {
    let parts: Vec<&str> = line.split([':', '|']).collect();
    if parts.len() < 3 {
        return None;
    }

    let label = parts[0].trim().replace("->", "-");
    let count = parts[1].trim().parse().ok()?;

    let mut bounds = label.split('-').map(|s| s.trim().parse::<u64>().ok());
    let low = bounds.next().flatten();
    let high = bounds.next().flatten();
    let usecs = label.split_whitespace().collect::<String>();

    Some(LatencyBucket {
        usecs,
        low,
        high,
        count,
    })
}
