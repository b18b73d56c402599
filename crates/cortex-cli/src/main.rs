//! CORTEX benchmark batch runner: `cortex run <config-path>`.
//!
//! Out of scope here (spec.md §1, carried into SPEC_FULL.md §12): HTML
//! report rendering, SSH deployment, the background stress workload,
//! and real dataset decoding/pacing — see [`replayer`] for the seam a
//! real decoder would plug into.

#![allow(unsafe_code)]

mod replayer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use cortex_core::environment::SystemEnvironment;
use cortex_harness::{device_init, device_teardown, DeviceInitRequest};
use cortex_scheduler::config::{OutputFormat, PluginConfig, PluginStatus, RunConfig};
use cortex_scheduler::telemetry::{SystemInfo, TelemetryBuffer, TelemetryRecord};
use cortex_scheduler::{DispatchOutcome, RegisteredDevice, Scheduler};

use replayer::{InMemoryReplayer, Replayer};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// CORTEX benchmark batch runner.
#[derive(Parser, Debug)]
#[command(name = "cortex")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the batch defined by a config file.
    Run {
        /// Path to the TOML run descriptor.
        config_path: PathBuf,
    },
}

/// Locate the `cortex-adapter` binary alongside this one, for the
/// default `local://` transport.
fn sibling_adapter_path() -> Result<PathBuf, String> {
    let exe = std::env::current_exe().map_err(|err| err.to_string())?;
    let dir = exe.parent().ok_or_else(|| "current exe has no parent directory".to_string())?;
    Ok(dir.join("cortex-adapter"))
}

fn resolve_transport_uri(env_override: Option<String>) -> (String, Option<PathBuf>) {
    match env_override {
        Some(uri) => (uri, None),
        None => match sibling_adapter_path() {
            Ok(path) => (String::new(), Some(path)),
            Err(_) => (String::new(), None),
        },
    }
}

fn run_plugin(
    config: &RunConfig,
    plugin: &PluginConfig,
    transport_uri: &str,
    adapter_path: Option<&Path>,
) -> Result<(TelemetryBuffer, Vec<TelemetryRecord>), String> {
    let runtime = plugin.runtime.clone().unwrap_or_else(|| {
        cortex_scheduler::config::RuntimeConfig::defaults(config.dataset.channels)
    });
    let calibration_state = match &plugin.calibration_state_path {
        Some(path) => cortex_core::CalibrationState::read(path).map_err(|err| err.to_string())?.payload,
        None => Vec::new(),
    };

    let env = SystemEnvironment::new();
    let request = DeviceInitRequest {
        adapter_path: adapter_path.and_then(Path::to_str),
        transport_uri,
        plugin_name: &plugin.name,
        plugin_params: plugin.kernel_params.as_deref().unwrap_or(&[]),
        sample_rate_hz: config.dataset.sample_rate_hz,
        window_samples: runtime.window_samples,
        hop_samples: runtime.hop_samples,
        channels: runtime.channels,
        calibration_state: &calibration_state,
        window_timeout: None,
    };

    let handle = device_init(&env, &request).map_err(|err| format!("device_init: {err}"))?;
    let adapter_name = handle.adapter_name.clone();
    let mut devices =
        vec![RegisteredDevice { handle, plugin_name: plugin.name.clone(), adapter_name: adapter_name.clone() }];

    let mut scheduler = Scheduler::new(
        config.dataset.sample_rate_hz,
        runtime.window_samples,
        runtime.hop_samples,
        runtime.channels,
        config.benchmark.warmup_seconds,
    )
    .map_err(|err| format!("scheduler init: {err}"))?;

    let total_samples =
        (config.benchmark.duration_seconds * f64::from(config.dataset.sample_rate_hz)) as usize
            * runtime.channels as usize;
    let mut replayer = InMemoryReplayer::new(vec![0.0f32; total_samples], runtime.window_samples as usize * runtime.channels as usize);

    let run_id = format!("{}-{}", plugin.name, config.dataset.channels);
    let mut records = Vec::new();
    let mut chunk = Vec::new();
    while replayer.next_chunk(&mut chunk) {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            tracing::info!("shutdown requested, stopping after in-flight window");
            break;
        }
        let outcomes =
            scheduler.feed_samples(&chunk, &mut devices).map_err(|err| format!("feed_samples: {err}"))?;
        for outcome in outcomes {
            record_outcome(&run_id, plugin, &runtime, config, &devices, &outcome, &mut records);
        }
    }
    if !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        for outcome in scheduler.flush(&mut devices) {
            record_outcome(&run_id, plugin, &runtime, config, &devices, &outcome, &mut records);
        }
    }

    for device in &mut devices {
        device_teardown(&mut device.handle).map_err(|err| format!("device_teardown: {err}"))?;
    }

    let mut buffer = TelemetryBuffer::new(records.len().max(1));
    for record in &records {
        buffer.append(record.clone()).map_err(|err| err.to_string())?;
    }
    Ok((buffer, records))
}

#[allow(clippy::too_many_arguments)]
fn record_outcome(
    run_id: &str,
    plugin: &PluginConfig,
    runtime: &cortex_scheduler::config::RuntimeConfig,
    config: &RunConfig,
    devices: &[RegisteredDevice],
    outcome: &DispatchOutcome,
    records: &mut Vec<TelemetryRecord>,
) {
    if outcome.warmup {
        return;
    }
    let device = &devices[outcome.device_index];
    records.push(TelemetryRecord {
        run_id: run_id.to_string(),
        plugin_name: plugin.name.clone(),
        adapter_name: device.adapter_name.clone(),
        window_index: outcome.window_index,
        window_samples: runtime.window_samples,
        hop_samples: runtime.hop_samples,
        channels: runtime.channels,
        sample_rate_hz: config.dataset.sample_rate_hz,
        warmup: outcome.warmup,
        repeat_index: 0,
        release_ts_ns: outcome.release_ts_ns,
        deadline_ts_ns: outcome.deadline_ts_ns,
        host_start_ts_ns: outcome.host_start_ns,
        host_end_ts_ns: outcome.host_end_ns,
        deadline_missed: outcome.deadline_missed,
        t_in_ns: outcome.device_timing.t_in,
        t_start_ns: outcome.device_timing.t_start,
        t_end_ns: outcome.device_timing.t_end,
        t_first_tx_ns: outcome.device_timing.t_first_tx,
        t_last_tx_ns: outcome.device_timing.t_last_tx,
        window_failed: outcome.window_failed,
        error_code: outcome.error_code,
    });
}

fn run(config_path: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(config_path).map_err(|err| err.to_string())?;
    let mut config = RunConfig::parse(&text).map_err(|err| err.to_string())?;

    if let Ok(output_dir) = std::env::var("CORTEX_OUTPUT_DIR") {
        config.output.directory = PathBuf::from(output_dir);
    }
    let transport_override = std::env::var("CORTEX_TRANSPORT_URI").ok();
    let kernel_filter = std::env::var("CORTEX_KERNEL_FILTER").ok();

    config.validate().map_err(|errors| {
        errors.into_iter().map(|err| err.to_string()).collect::<Vec<_>>().join("; ")
    })?;

    let (default_transport_uri, adapter_path) = resolve_transport_uri(transport_override);

    std::fs::create_dir_all(&config.output.directory).map_err(|err| err.to_string())?;
    let system_info = SystemInfo::gather();
    let mut cumulative = TelemetryBuffer::new(1024);

    let ready_plugins: Vec<PluginConfig> = config
        .filter_plugins(kernel_filter.as_deref())
        .into_iter()
        .filter(|plugin| plugin.status == PluginStatus::Ready)
        .cloned()
        .collect();

    for plugin in &ready_plugins {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            break;
        }
        tracing::info!(plugin = %plugin.name, "starting plugin run");
        match run_plugin(&config, plugin, &default_transport_uri, adapter_path.as_deref()) {
            Ok((plugin_buffer, records)) => {
                let plugin_dir = config.output.directory.join("kernel-data").join(&plugin.name);
                std::fs::create_dir_all(&plugin_dir).map_err(|err| err.to_string())?;
                write_telemetry(&plugin_buffer, &plugin_dir.join("telemetry"), config.output.format, &system_info)?;
                for record in records {
                    cumulative.append(record).map_err(|err| err.to_string())?;
                }
            }
            Err(err) => {
                tracing::error!(plugin = %plugin.name, error = %err, "plugin run failed, moving to next plugin");
            }
        }
    }

    if !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        write_telemetry(&cumulative, &config.output.directory.join("telemetry"), config.output.format, &system_info)?;
    } else {
        tracing::info!("shutdown requested: cumulative telemetry still persisted, report generation skipped");
        write_telemetry(&cumulative, &config.output.directory.join("telemetry"), config.output.format, &system_info)?;
    }

    Ok(())
}

fn write_telemetry(
    buffer: &TelemetryBuffer,
    path_stem: &Path,
    format: OutputFormat,
    system_info: &SystemInfo,
) -> Result<(), String> {
    match format {
        OutputFormat::Csv => buffer
            .write_full_csv(&path_stem.with_extension("csv"), system_info)
            .map_err(|err| err.to_string()),
        OutputFormat::Ndjson => buffer
            .write_ndjson(&path_stem.with_extension("ndjson"), 0, buffer.len(), system_info)
            .map_err(|err| err.to_string()),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let args = Args::parse();
    let Command::Run { config_path } = args.command;

    let exit_code = match run(&config_path) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            1
        }
    };
    std::process::exit(exit_code);
}
