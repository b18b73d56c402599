//! Append-only telemetry record store with writers for CSV and NDJSON.
//!
//! Generalizes the `Storage` trait shape (synchronous, `Clone + Send +
//! Sync`, explicit error type) into a single-writer, growth-on-demand
//! buffer: telemetry is only ever appended by the scheduler thread (§5),
//! so there is no need for the teacher's multi-implementation trait
//! seam here — one concrete type suffices.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// One per-window, per-device telemetry row. Field order here is the
/// column order both writers emit.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    /// Identifier shared by every record of one run.
    pub run_id: String,
    /// Kernel/plugin under test.
    pub plugin_name: String,
    /// Adapter's self-reported name.
    pub adapter_name: String,
    /// Cumulative window index (post-warmup numbering starts at the
    /// first recorded window).
    pub window_index: u64,
    /// Window length in samples.
    pub window_samples: u32,
    /// Hop length in samples.
    pub hop_samples: u32,
    /// Channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Whether this window fell inside the warmup period.
    pub warmup: bool,
    /// Which repeat of the benchmark this record belongs to.
    pub repeat_index: u32,
    /// Host-clock release timestamp, ns.
    pub release_ts_ns: u64,
    /// Host-clock deadline timestamp, ns.
    pub deadline_ts_ns: u64,
    /// Host-clock timestamp just before dispatch, ns.
    pub host_start_ts_ns: u64,
    /// Host-clock timestamp just after dispatch returned, ns.
    pub host_end_ts_ns: u64,
    /// Whether `host_end_ts_ns` exceeded `deadline_ts_ns`.
    pub deadline_missed: bool,
    /// Device-monotonic: when the window's LAST chunk was decoded.
    pub t_in_ns: u64,
    /// Device-monotonic: immediately before kernel execution.
    pub t_start_ns: u64,
    /// Device-monotonic: immediately after kernel execution.
    pub t_end_ns: u64,
    /// Device-monotonic: first transmitted byte of the RESULT.
    pub t_first_tx_ns: u64,
    /// Device-monotonic: last transmitted byte of the RESULT.
    pub t_last_tx_ns: u64,
    /// Whether the device failed to execute this window.
    pub window_failed: bool,
    /// Stable numeric error code; `0` when not failed.
    pub error_code: i32,
}

/// OS/hardware inventory captured once per run, written as a header.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    /// `_type` discriminator for NDJSON consumers; always `"system_info"`.
    #[serde(rename = "_type")]
    pub record_type: &'static str,
    /// OS name and version, e.g. `"linux 6.18"`.
    pub os_description: String,
    /// CPU model string.
    pub cpu_model: String,
    /// Device hostname.
    pub hostname: String,
    /// Logical CPU count.
    pub cpu_count: usize,
    /// Total system RAM in MiB.
    pub total_ram_mib: u64,
    /// Thermal reading in degrees Celsius, when the platform exposes one.
    pub thermal_celsius: Option<f32>,
}

impl SystemInfo {
    /// Gather system info via `sysinfo`. Thermal data is best-effort: a
    /// platform with no exposed sensors yields `None`, not an error.
    #[must_use]
    pub fn gather() -> Self {
        let mut system = sysinfo::System::new_all();
        system.refresh_all();
        let components = sysinfo::Components::new_with_refreshed_list();
        let thermal_celsius = components.iter().map(sysinfo::Component::temperature).find(|t| !t.is_nan());

        Self {
            record_type: "system_info",
            os_description: format!(
                "{} {}",
                sysinfo::System::name().unwrap_or_else(|| "unknown".to_string()),
                sysinfo::System::os_version().unwrap_or_else(|| "unknown".to_string())
            ),
            cpu_model: system
                .cpus()
                .first()
                .map_or_else(|| "unknown".to_string(), |cpu| cpu.brand().to_string()),
            hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string()),
            cpu_count: system.cpus().len(),
            total_ram_mib: system.total_memory() / (1024 * 1024),
            thermal_celsius,
        }
    }
}

/// Errors writing telemetry to disk.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Appending would overflow the buffer's capacity calculation.
    #[error("telemetry buffer capacity calculation overflowed")]
    CapacityOverflow,
    /// `[start, end)` was out of bounds for the buffer's current length.
    #[error("telemetry range [{start}, {end}) out of bounds for length {len}")]
    RangeOutOfBounds {
        /// Requested range start.
        start: usize,
        /// Requested range end.
        end: usize,
        /// Buffer length at the time of the request.
        len: usize,
    },
    /// Underlying file I/O failed.
    #[error("telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The `csv` writer rejected a record.
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    /// The `serde_json` serializer rejected a record.
    #[error("JSON write error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only telemetry store. Growth doubles capacity (overflow
/// checked) rather than reallocating per-append.
pub struct TelemetryBuffer {
    records: Vec<TelemetryRecord>,
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::new(64)
    }
}

impl TelemetryBuffer {
    /// Pre-allocate for `initial_capacity` records.
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        Self { records: Vec::with_capacity(initial_capacity) }
    }

    /// Append one record, doubling capacity when full.
    ///
    /// # Errors
    /// Returns [`TelemetryError::CapacityOverflow`] if doubling the
    /// current capacity would overflow `usize`.
    pub fn append(&mut self, record: TelemetryRecord) -> Result<(), TelemetryError> {
        if self.records.len() == self.records.capacity() {
            let new_capacity =
                self.records.capacity().checked_mul(2).unwrap_or(self.records.capacity() + 1);
            let doubled = new_capacity.checked_sub(self.records.capacity()).ok_or(TelemetryError::CapacityOverflow)?;
            self.records.reserve(doubled.max(1));
        }
        self.records.push(record);
        Ok(())
    }

    /// Number of records appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn slice(&self, start: usize, end: usize) -> Result<&[TelemetryRecord], TelemetryError> {
        if start > end || end > self.records.len() {
            return Err(TelemetryError::RangeOutOfBounds { start, end, len: self.records.len() });
        }
        Ok(&self.records[start..end])
    }

    /// Write `[start, end)` as CSV, preceded by `#`-prefixed system-info
    /// comment lines.
    ///
    /// # Errors
    /// Propagates I/O and CSV-encoding failures, or an out-of-bounds range.
    pub fn write_csv(&self, path: &Path, start: usize, end: usize, system_info: &SystemInfo) -> Result<(), TelemetryError> {
        let records = self.slice(start, end)?;
        let mut file = File::create(path)?;
        write_system_info_comment(&mut file, system_info)?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write every record as CSV.
    ///
    /// # Errors
    /// Propagates I/O and CSV-encoding failures.
    pub fn write_full_csv(&self, path: &Path, system_info: &SystemInfo) -> Result<(), TelemetryError> {
        self.write_csv(path, 0, self.records.len(), system_info)
    }

    /// Write `[start, end)` as newline-delimited JSON, with a leading
    /// `{"_type": "system_info", ...}` record.
    ///
    /// # Errors
    /// Propagates I/O and JSON-encoding failures, or an out-of-bounds range.
    pub fn write_ndjson(&self, path: &Path, start: usize, end: usize, system_info: &SystemInfo) -> Result<(), TelemetryError> {
        let records = self.slice(start, end)?;
        let mut file = File::create(path)?;
        writeln!(file, "{}", sanitize_json_line(&serde_json::to_string(system_info)?))?;
        for record in records {
            writeln!(file, "{}", sanitize_json_line(&serde_json::to_string(record)?))?;
        }
        Ok(())
    }
}

fn write_system_info_comment(file: &mut File, system_info: &SystemInfo) -> std::io::Result<()> {
    writeln!(file, "# os: {}", system_info.os_description)?;
    writeln!(file, "# cpu: {}", system_info.cpu_model)?;
    writeln!(file, "# hostname: {}", system_info.hostname)?;
    writeln!(file, "# cpu_count: {}", system_info.cpu_count)?;
    writeln!(file, "# total_ram_mib: {}", system_info.total_ram_mib)?;
    match system_info.thermal_celsius {
        Some(celsius) => writeln!(file, "# thermal_celsius: {celsius}")?,
        None => writeln!(file, "# thermal_celsius: null")?,
    }
    Ok(())
}

/// `serde_json::to_string` escapes `"`, `\`, and the standard control
/// characters into valid `\u00XX` sequences, so a well-formed line never
/// contains a raw control byte. This drops any that slip through anyway
/// (a non-standard control byte outside what `serde_json` escapes)
/// rather than failing the whole write.
fn sanitize_json_line(line: &str) -> String {
    line.chars().filter(|ch| !ch.is_control()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(window_index: u64) -> TelemetryRecord {
        TelemetryRecord {
            run_id: "run-1".to_string(),
            plugin_name: "identity".to_string(),
            adapter_name: "reference-adapter".to_string(),
            window_index,
            window_samples: 160,
            hop_samples: 80,
            channels: 64,
            sample_rate_hz: 160,
            warmup: false,
            repeat_index: 0,
            release_ts_ns: 1000,
            deadline_ts_ns: 1_500_000_000,
            host_start_ts_ns: 1100,
            host_end_ts_ns: 1200,
            deadline_missed: false,
            t_in_ns: 10,
            t_start_ns: 20,
            t_end_ns: 30,
            t_first_tx_ns: 40,
            t_last_tx_ns: 50,
            window_failed: false,
            error_code: 0,
        }
    }

    #[test]
    fn append_grows_capacity_by_doubling() {
        let mut buffer = TelemetryBuffer::new(1);
        for i in 0..5 {
            buffer.append(sample_record(i)).unwrap();
        }
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let mut buffer = TelemetryBuffer::new(4);
        buffer.append(sample_record(0)).unwrap();
        let result = buffer.slice(0, 5);
        assert!(matches!(result, Err(TelemetryError::RangeOutOfBounds { start: 0, end: 5, len: 1 })));
    }

    #[test]
    fn csv_and_ndjson_round_trip_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = TelemetryBuffer::new(4);
        buffer.append(sample_record(0)).unwrap();
        buffer.append(sample_record(1)).unwrap();
        let system_info = SystemInfo {
            record_type: "system_info",
            os_description: "linux 6.18".to_string(),
            cpu_model: "test-cpu".to_string(),
            hostname: "test-host".to_string(),
            cpu_count: 4,
            total_ram_mib: 8192,
            thermal_celsius: None,
        };

        let csv_path = dir.path().join("telemetry.csv");
        buffer.write_full_csv(&csv_path, &system_info).unwrap();
        let csv_contents = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv_contents.starts_with("# os:"));
        assert_eq!(csv_contents.lines().count(), 6 + 2);

        let ndjson_path = dir.path().join("telemetry.ndjson");
        buffer.write_ndjson(&ndjson_path, 0, 2, &system_info).unwrap();
        let ndjson_contents = std::fs::read_to_string(&ndjson_path).unwrap();
        let lines: Vec<&str> = ndjson_contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"_type\":\"system_info\""));
    }

    proptest::proptest! {
        #[test]
        fn append_count_matches_len_for_any_initial_capacity(
            initial_capacity in 0usize..8,
            appends in 0usize..64,
        ) {
            let mut buffer = TelemetryBuffer::new(initial_capacity);
            for i in 0..appends {
                buffer.append(sample_record(i as u64)).unwrap();
            }
            proptest::prop_assert_eq!(buffer.len(), appends);
            proptest::prop_assert_eq!(buffer.is_empty(), appends == 0);
        }
    }
}
