//! Accelerator utilization probe.
//!
//! Shells out to `nvidia-smi` and parses its CSV output. Failures (missing
//! tool, unexpected output) surface as plain errors and are not intercepted
//! anywhere in the driver.

use std::{io, process::Command};

const QUERY: &str = "--query-gpu=memory.used,memory.total,utilization.gpu";

fn invalid<T>(msg: &str) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, msg.to_string()))
}

/// Reads the first device's `(memory-used %, utilization %)`.
pub fn gpu_stats() -> io::Result<(u64, u64)> {
    let output = Command::new("nvidia-smi")
        .args([QUERY, "--format=csv"])
        .output()?;

    parse_stats(&String::from_utf8_lossy(&output.stdout))
}

/// Extracts the leading integer of a CSV field like `"123 MiB"`.
fn leading_u64(field: Option<&str>) -> io::Result<u64> {
    field
        .and_then(|f| f.trim().split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .map_or_else(|| invalid("field holds no integer"), Ok)
}

/// Parses the first data row below the CSV header.
fn parse_stats(text: &str) -> io::Result<(u64, u64)> {
    let Some(row) = text.lines().nth(1) else {
        return invalid("no data row in nvidia-smi output");
    };

    let mut fields = row.split(',');
    let memory_used = leading_u64(fields.next())?;
    let memory_total = leading_u64(fields.next())?;
    let utilization = leading_u64(fields.next())?;

    if memory_total == 0 {
        return invalid("reported total memory is zero");
    }

    Ok((memory_used * 100 / memory_total, utilization))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_csv_row() {
        let text = "memory.used [MiB], memory.total [MiB], utilization.gpu [%]\n\
                    2048 MiB, 8192 MiB, 37 %\n";

        assert_eq!(parse_stats(text).unwrap(), (25, 37));
    }

    #[test]
    fn missing_row_is_an_error() {
        assert!(parse_stats("header only\n").is_err());
    }

    #[test]
    fn garbage_fields_are_an_error() {
        assert!(parse_stats("h\nfoo, bar, baz\n").is_err());
    }
}
