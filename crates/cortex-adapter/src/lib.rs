//! Adapter-side session: the out-of-process kernel host half of the
//! protocol. Transport-agnostic; `main.rs` wires it to an actual
//! [`cortex_core::Transport`].

pub mod kernel;
pub mod session;

pub use kernel::{load_kernel, DelayKernel, IdentityKernel, Kernel, AVAILABLE_KERNELS};
pub use session::{AdapterAction, AdapterSession, SessionState};
