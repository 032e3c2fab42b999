//! Telemetry line parsing.
//!
//! Expected format is the output of
//! `nvidia-smi --query-gpu=index,memory.used,memory.total,utilization.gpu --format=csv,noheader,nounits`:
//!
//! ```text
//! 0, 2048, 24576, 35
//! 1, 512, 24576, 0
//! ```
//!
//! Memory is reported in MiB and stored in bytes.

use cryoatom_common::{AcceleratorRecord, CryoAtomError, Result};
use tracing::{debug, warn};

const FIELD_COUNT: usize = 4;
const MIB: u64 = 1024 * 1024;

/// Parse a single telemetry line.
pub fn parse_line(line: &str) -> Result<AcceleratorRecord> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != FIELD_COUNT {
        return Err(parse_error(
            line,
            format!("expected {} fields, found {}", FIELD_COUNT, parts.len()),
        ));
    }

    let index: u32 = parse_field(line, "index", parts[0])?;
    let memory_used: u64 = parse_field(line, "memory.used", parts[1])?;
    let memory_total: u64 = parse_field(line, "memory.total", parts[2])?;
    let utilization_percent: u32 = parse_field(line, "utilization", parts[3])?;

    Ok(AcceleratorRecord {
        index,
        memory_used: memory_used.saturating_mul(MIB),
        memory_total: memory_total.saturating_mul(MIB),
        utilization_percent,
    })
}

/// Parse every line of `raw`. Malformed lines are skipped with a warning;
/// partial telemetry is still enough to choose a device.
pub fn parse_telemetry(raw: &str) -> Vec<AcceleratorRecord> {
    let records: Vec<AcceleratorRecord> = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match parse_line(l) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping telemetry line: {}", e);
                None
            }
        })
        .collect();

    debug!("Parsed {} accelerator records", records.len());
    records
}

fn parse_field<T: std::str::FromStr>(line: &str, name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| parse_error(line, format!("{} is not an integer: {:?}", name, value)))
}

fn parse_error(line: &str, reason: String) -> CryoAtomError {
    CryoAtomError::Parse {
        line: line.to_string(),
        reason,
    }
}
