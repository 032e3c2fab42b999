//! Least-loaded accelerator selection.

use cryoatom_common::{AcceleratorRecord, CryoAtomError, Result};
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::source::{TelemetrySource, VisibleDevices};
use crate::telemetry::parse_telemetry;

/// Load score in [0, 1]: the larger of the memory ratio and the utilization
/// fraction. A device reporting zero total memory counts as fully loaded.
pub fn load_score(record: &AcceleratorRecord) -> f64 {
    let memory_ratio = if record.memory_total == 0 {
        1.0
    } else {
        (record.memory_used as f64 / record.memory_total as f64).clamp(0.0, 1.0)
    };
    let utilization = (record.utilization_percent as f64 / 100.0).clamp(0.0, 1.0);
    memory_ratio.max(utilization)
}

/// Pick the record with the lowest load score; ties go to the smaller index.
pub fn select_accelerator(records: &[AcceleratorRecord]) -> Result<u32> {
    if records.is_empty() {
        return Err(CryoAtomError::NoAcceleratorAvailable(
            "telemetry reported no devices".to_string(),
        ));
    }
    if records.iter().all(|r| r.memory_total == 0) {
        return Err(CryoAtomError::NoAcceleratorAvailable(
            "no device reported a non-zero memory total".to_string(),
        ));
    }

    let (best, score) = records
        .iter()
        .map(|r| (r, load_score(r)))
        .min_by(|(a, sa), (b, sb)| match sa.total_cmp(sb) {
            Ordering::Equal => a.index.cmp(&b.index),
            other => other,
        })
        .ok_or_else(|| CryoAtomError::NoAcceleratorAvailable("no candidates".to_string()))?;

    debug!("Selected device {} with load score {:.3}", best.index, score);
    Ok(best.index)
}

/// Resolve the device for a run. A manual index is returned as-is, without
/// querying telemetry or checking that the device exists.
pub async fn resolve_accelerator(
    manual: Option<u32>,
    source: &dyn TelemetrySource,
    visible: &VisibleDevices,
) -> Result<u32> {
    if let Some(index) = manual {
        info!("Using operator-specified GPU {}", index);
        return Ok(index);
    }

    let raw = source.query().await?;
    let records: Vec<AcceleratorRecord> = parse_telemetry(&raw)
        .into_iter()
        .filter(|r| visible.allows(r.index))
        .collect();

    let index = select_accelerator(&records)?;
    info!("Automatically selected GPU {}", index);
    Ok(index)
}
