//! Spawning a local adapter process over a `socketpair`-backed transport,
//! per the process-spawn design note: close-on-exec set atomically with
//! pair creation, the child's end dup2'd onto its stdin/stdout.

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};

use cortex_core::transport::local::LocalTransport;

use crate::error::HarnessError;

/// A spawned adapter child process and the harness's end of its
/// socketpair transport.
pub struct AdapterProcess {
    child: Child,
    transport: Option<LocalTransport>,
}

impl AdapterProcess {
    /// Spawn `adapter_path`, binding its stdin and stdout to one end of a
    /// freshly created socketpair. `UnixStream::pair` sets close-on-exec
    /// atomically on both ends; the child's end loses it again across
    /// `dup2` onto fd 0/1, which is the desired outcome (the adapter's
    /// process image needs that descriptor, nothing else does).
    pub fn spawn(adapter_path: &str, extra_args: &[&str]) -> Result<Self, HarnessError> {
        let (harness_end, adapter_end) =
            UnixStream::pair().map_err(|err| HarnessError::Process(err.to_string()))?;

        let adapter_stdin: OwnedFd = adapter_end
            .try_clone()
            .map_err(|err| HarnessError::Process(err.to_string()))?
            .into();
        let adapter_stdout: OwnedFd = adapter_end.into();

        let child = Command::new(adapter_path)
            .args(extra_args)
            .stdin(Stdio::from(adapter_stdin))
            .stdout(Stdio::from(adapter_stdout))
            .spawn()
            .map_err(|err| HarnessError::Process(format!("spawning {adapter_path}: {err}")))?;

        Ok(Self { child, transport: Some(LocalTransport::from_stream(harness_end)) })
    }

    /// Take the harness's transport handle, leaving `None` behind so a
    /// second call is a cheap no-op rather than a panic.
    pub fn take_transport(&mut self) -> Option<LocalTransport> {
        self.transport.take()
    }

    /// Wait for the child to exit, reaping it. Safe to call more than
    /// once; a second call observes the child already reaped and returns
    /// immediately.
    pub fn reap(&mut self) -> Result<(), HarnessError> {
        self.child.wait().map_err(|err| HarnessError::Process(err.to_string()))?;
        Ok(())
    }

    /// The child's raw pid, for diagnostics.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_reports_a_live_pid_and_reaps_cleanly() {
        let mut process = AdapterProcess::spawn("/bin/true", &[]).unwrap();
        assert!(process.pid() > 0);
        assert!(process.take_transport().is_some());
        process.reap().unwrap();
        // Reaping twice must not panic or hang.
        process.reap().unwrap();
    }
}
