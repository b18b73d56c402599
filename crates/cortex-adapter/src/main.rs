//! Out-of-process kernel host binary: advertises its kernels via HELLO,
//! accepts one CONFIG, then serves windows until transport EOF.

#![allow(unsafe_code)]

use std::time::{Duration, Instant};

use clap::Parser;
use cortex_adapter::kernel::AVAILABLE_KERNELS;
use cortex_adapter::session::{AdapterAction, AdapterSession};
use cortex_core::environment::SystemEnvironment;
use cortex_core::transport::local::LocalTransport;
use cortex_core::transport::shm::ShmTransport;
use cortex_core::transport::tcp::TcpTransport;
use cortex_core::transport::uart::UartTransport;
use cortex_core::transport::uri::{self, TransportUri};
use cortex_core::transport::Transport;
use cortex_core::{recv_frame, send_frame};
use cortex_proto::payload::{ConfigPayload, HelloPayload};
use cortex_proto::FrameType;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);
const WINDOW_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_WINDOW_SAMPLES: u32 = 8192;
const MAX_CHANNELS: u32 = 256;

/// Out-of-process CORTEX kernel host.
#[derive(Parser, Debug)]
#[command(name = "cortex-adapter")]
struct Args {
    /// Transport URI to serve on; defaults to `local://` (stdin/stdout).
    #[arg(long = "transport-uri", default_value = "")]
    transport_uri: String,

    /// Short adapter name advertised in HELLO.
    #[arg(long, default_value = "reference-adapter")]
    name: String,
}

fn build_transport(uri_str: &str) -> Result<Box<dyn Transport>, cortex_core::TransportError> {
    match uri::parse(uri_str)? {
        TransportUri::Local => Ok(Box::new(LocalTransport::from_stream({
            use std::os::fd::FromRawFd;
            use std::os::unix::net::UnixStream;
            // SAFETY: fd 0 is the process's stdin, handed to us by the
            // harness as one end of a `socketpair` with dup2'd stdio.
            unsafe { UnixStream::from_raw_fd(0) }
        }))),
        TransportUri::TcpServer { port, accept_timeout } => {
            Ok(Box::new(TcpTransport::accept_one(port, accept_timeout)?))
        }
        TransportUri::TcpClient { host, port, timeout } => {
            Ok(Box::new(TcpTransport::connect(&host, port, timeout)?))
        }
        TransportUri::Serial { device_path, baud } => {
            Ok(Box::new(UartTransport::open(&device_path, baud)?))
        }
        TransportUri::Shm { name } => Ok(Box::new(ShmTransport::open(&name)?)),
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut transport = build_transport(&args.transport_uri)?;
    let env = SystemEnvironment::new();

    let hello = HelloPayload {
        boot_id: {
            use cortex_core::Environment;
            env.random_u32_nonzero()
        },
        adapter_abi_version: 1,
        max_window_samples: MAX_WINDOW_SAMPLES,
        max_channels: MAX_CHANNELS,
        adapter_name: args.name.clone(),
        kernel_names: AVAILABLE_KERNELS.iter().map(|s| s.to_string()).collect(),
        hostname: hostname_string(),
        cpu_description: "unknown".to_string(),
        os_description: std::env::consts::OS.to_string(),
    };
    send_frame(transport.as_mut(), FrameType::Hello, &hello.encode())?;

    let mut session = AdapterSession::new(env, MAX_WINDOW_SAMPLES, MAX_CHANNELS);

    let config_frame = recv_frame(transport.as_mut(), Instant::now() + HANDSHAKE_TIMEOUT)?;
    if config_frame.frame_type()? != FrameType::Config {
        tracing::error!("expected CONFIG, got {:?}", config_frame.frame_type());
        return Ok(());
    }
    let config = ConfigPayload::decode(&config_frame.payload)?;
    for action in session.on_config(config) {
        if execute_action(transport.as_mut(), action)? {
            return Ok(());
        }
    }

    loop {
        let frame = match recv_frame(transport.as_mut(), Instant::now() + WINDOW_TIMEOUT) {
            Ok(frame) => frame,
            Err(cortex_core::CortexError::Transport(cortex_core::TransportError::ConnReset)) => {
                tracing::info!("transport closed, exiting");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        match frame.frame_type()? {
            FrameType::WindowChunk => {
                for action in session.on_window_chunk(&frame.payload) {
                    if execute_action(transport.as_mut(), action)? {
                        return Ok(());
                    }
                }
            }
            other => {
                tracing::warn!("unexpected frame type {:?} in window loop", other);
            }
        }
    }
}

/// Execute one action; returns `true` if the caller should exit.
fn execute_action(
    transport: &mut dyn Transport,
    action: AdapterAction,
) -> Result<bool, Box<dyn std::error::Error>> {
    match action {
        AdapterAction::SendFrame { frame_type, payload } => {
            send_frame(transport, frame_type, &payload)?;
            Ok(false)
        }
        AdapterAction::Terminate => {
            transport.close()?;
            Ok(true)
        }
    }
}

fn hostname_string() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    // SIGPIPE ignored process-wide so a broken transport write surfaces as
    // a return code rather than terminating the process.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let args = Args::parse();
    run(args)
}
