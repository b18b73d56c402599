//! The run descriptor a config file deserializes into: dataset, realtime
//! hints, benchmark parameters, output, and the ordered plugin list.
//! Parsed from TOML with `serde`, matching the `toml` + `serde` pairing
//! the workspace already uses for on-wire-adjacent structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample format of the dataset file, or a kernel's declared `dtype`.
/// Only `Float32Le` has normative arithmetic defined in this core; `Q15`
/// and `Q7` are declared here so the configuration surface can name them,
/// but a kernel requesting either is rejected at validation time (no
/// quantization spec has been adopted yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 32-bit IEEE-754 float, little-endian.
    Float32Le,
    /// Q15 fixed-point. No normative arithmetic defined; rejected at
    /// validation time.
    Q15,
    /// Q7 fixed-point. No normative arithmetic defined; rejected at
    /// validation time.
    Q7,
}

/// Dataset source description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the dataset file.
    pub path: PathBuf,
    /// On-disk sample format.
    pub sample_format: SampleFormat,
    /// Channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,
}

/// Realtime scheduling hint label. Advisory only: this core never calls
/// `sched_setscheduler`/`pthread_setaffinity_np`; applying the hint is an
/// external collaborator's responsibility (spec.md §1's out-of-scope list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimePolicy {
    /// `SCHED_FIFO`.
    Fifo,
    /// `SCHED_RR`.
    Rr,
    /// `SCHED_DEADLINE`.
    Deadline,
    /// No realtime policy requested.
    Other,
}

/// Realtime scheduling hints, stored but not applied by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeHints {
    /// Requested scheduling policy.
    pub policy: RealtimePolicy,
    /// Requested priority within the policy's range.
    pub priority: i32,
    /// CPU affinity mask as a bitset, lowest bit = CPU 0.
    pub cpu_affinity_mask: u64,
    /// Nominal per-window deadline in milliseconds.
    pub deadline_ms: u32,
}

/// Background load profile applied outside this core while benchmarking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundLoad {
    /// No synthetic load.
    Idle,
    /// Moderate synthetic load.
    Medium,
    /// Heavy synthetic load.
    Heavy,
}

/// Benchmark sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// How long each repeat runs, in seconds.
    pub duration_seconds: f64,
    /// Number of repeats.
    pub repeats: u32,
    /// Warmup period at the start of each repeat, in seconds.
    pub warmup_seconds: f64,
    /// Optional synthetic background load to apply during the run.
    pub background_load: Option<BackgroundLoad>,
}

/// Telemetry output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Newline-delimited JSON.
    Ndjson,
    /// Comma-separated values.
    Csv,
}

/// Telemetry output destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory telemetry files are written under.
    pub directory: PathBuf,
    /// Which writer to use.
    pub format: OutputFormat,
}

/// Plugin readiness, gating whether it runs in this batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    /// Not yet ready to run; skipped by the scheduler.
    Draft,
    /// Ready to run.
    Ready,
}

/// Per-plugin window shape, overriding the kernel spec's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Window length in samples.
    pub window_samples: u32,
    /// Hop length in samples.
    pub hop_samples: u32,
    /// Channel count; must equal the dataset's channel count.
    pub channels: u32,
    /// Sample dtype the kernel expects.
    pub dtype: SampleFormat,
    /// Whether the kernel may write its output into the input buffer.
    pub allow_in_place: bool,
}

impl RuntimeConfig {
    /// The spec's stated defaults: W=160, H=80, dtype=float32,
    /// `channels` taken from the dataset.
    #[must_use]
    pub fn defaults(dataset_channels: u32) -> Self {
        Self {
            window_samples: 160,
            hop_samples: 80,
            channels: dataset_channels,
            dtype: SampleFormat::Float32Le,
            allow_in_place: false,
        }
    }
}

/// One plugin (kernel) entry in the ordered run list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Kernel/plugin name.
    pub name: String,
    /// Readiness gate.
    pub status: PluginStatus,
    /// URI to the kernel's spec document; required when `status == Ready`.
    pub spec_uri: Option<String>,
    /// Window shape; falls back to [`RuntimeConfig::defaults`] when absent.
    pub runtime: Option<RuntimeConfig>,
    /// Opaque kernel parameters, passed through CONFIG's `plugin_params`.
    pub kernel_params: Option<Vec<u8>>,
    /// Path to a calibration-state file (magic `"CXST"`), if any.
    pub calibration_state_path: Option<PathBuf>,
}

/// The full run descriptor, as parsed from one TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Dataset source.
    pub dataset: DatasetConfig,
    /// Realtime scheduling hints.
    pub realtime: RealtimeHints,
    /// Benchmark sizing parameters.
    pub benchmark: BenchmarkConfig,
    /// Telemetry output destination.
    pub output: OutputConfig,
    /// Ordered plugin list.
    pub plugins: Vec<PluginConfig>,
}

/// A single validation failure, naming the offending plugin when
/// applicable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `dataset.sample_rate_hz` was zero.
    #[error("sample_rate_hz must be > 0")]
    ZeroSampleRate,
    /// `dataset.channels` was zero.
    #[error("dataset channels must be > 0")]
    ZeroChannels,
    /// A plugin's `0 < H ≤ W` invariant was violated.
    #[error("plugin {plugin}: hop_samples must be in (0, window_samples]")]
    InvalidHop {
        /// Offending plugin's name.
        plugin: String,
    },
    /// A plugin's runtime channel count did not match the dataset's.
    #[error("plugin {plugin}: runtime.channels must equal dataset.channels")]
    ChannelMismatch {
        /// Offending plugin's name.
        plugin: String,
    },
    /// A plugin's deadline was tighter than one hop at the dataset rate.
    #[error("plugin {plugin}: deadline_ms must be >= 1000 * hop_samples / sample_rate_hz")]
    DeadlineTooTight {
        /// Offending plugin's name.
        plugin: String,
    },
    /// A `status = "ready"` plugin had no `spec_uri`.
    #[error("plugin {plugin}: status \"ready\" requires a spec_uri")]
    ReadyWithoutSpecUri {
        /// Offending plugin's name.
        plugin: String,
    },
    /// A plugin declared a non-float32 `dtype`, which has no normative
    /// arithmetic defined in this core.
    #[error("plugin {plugin}: dtype must be float32_le, no quantized arithmetic is defined")]
    UnsupportedDtype {
        /// Offending plugin's name.
        plugin: String,
    },
}

impl RunConfig {
    /// Parse a run descriptor from TOML text.
    ///
    /// # Errors
    /// Propagates `toml`'s parse error.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Validate every rule in spec.md §4.9 before any plugin is spawned.
    /// Returns every violation found, not just the first.
    ///
    /// # Errors
    /// Returns one [`ConfigError`] per violated rule.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.dataset.sample_rate_hz == 0 {
            errors.push(ConfigError::ZeroSampleRate);
        }
        if self.dataset.channels == 0 {
            errors.push(ConfigError::ZeroChannels);
        }
        for plugin in &self.plugins {
            let runtime = plugin
                .runtime
                .clone()
                .unwrap_or_else(|| RuntimeConfig::defaults(self.dataset.channels));
            if runtime.hop_samples == 0 || runtime.hop_samples > runtime.window_samples {
                errors.push(ConfigError::InvalidHop { plugin: plugin.name.clone() });
            }
            if runtime.channels != self.dataset.channels {
                errors.push(ConfigError::ChannelMismatch { plugin: plugin.name.clone() });
            }
            if self.dataset.sample_rate_hz > 0 {
                let min_deadline_ms =
                    (1000.0 * f64::from(runtime.hop_samples) / f64::from(self.dataset.sample_rate_hz)).ceil() as u32;
                if self.realtime.deadline_ms < min_deadline_ms {
                    errors.push(ConfigError::DeadlineTooTight { plugin: plugin.name.clone() });
                }
            }
            if plugin.status == PluginStatus::Ready && plugin.spec_uri.is_none() {
                errors.push(ConfigError::ReadyWithoutSpecUri { plugin: plugin.name.clone() });
            }
            if runtime.dtype != SampleFormat::Float32Le {
                errors.push(ConfigError::UnsupportedDtype { plugin: plugin.name.clone() });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Filter `self.plugins` down to names present in a comma-separated
    /// allowlist (`CORTEX_KERNEL_FILTER`). An empty or absent filter
    /// keeps every plugin.
    #[must_use]
    pub fn filter_plugins(&self, allowlist: Option<&str>) -> Vec<&PluginConfig> {
        match allowlist {
            None => self.plugins.iter().collect(),
            Some(raw) => {
                let names: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
                if names.is_empty() {
                    self.plugins.iter().collect()
                } else {
                    self.plugins.iter().filter(|plugin| names.contains(&plugin.name.as_str())).collect()
                }
            }
        }
    }
}
