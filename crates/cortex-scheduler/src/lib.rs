//! Windowing scheduler, telemetry buffer and writers, and the run
//! configuration surface consumed by `cortex-cli`.

pub mod config;
pub mod scheduler;
pub mod telemetry;

pub use config::{ConfigError, RunConfig};
pub use scheduler::{
    deadline_offset_ns, warmup_windows, window_duration, DeviceWindowTiming, DispatchOutcome,
    RegisteredDevice, Scheduler, SchedulerError,
};
pub use telemetry::{SystemInfo, TelemetryBuffer, TelemetryError, TelemetryRecord};
