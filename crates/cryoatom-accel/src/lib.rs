//! cryoatom-accel: picks the compute device a build runs on.
//!
//! 1. Query telemetry (`nvidia-smi` by default)
//! 2. Parse one record per device, skipping malformed lines
//! 3. Restrict to `CUDA_VISIBLE_DEVICES` when set
//! 4. Choose the least-loaded device
//!
//! A manual device index skips all of the above.

pub mod telemetry;
pub mod selector;
pub mod source;

pub use selector::{load_score, resolve_accelerator, select_accelerator};
pub use source::{NvidiaSmiSource, TelemetrySource, VisibleDevices};
pub use telemetry::{parse_line, parse_telemetry};
