//! Harness-side device session: spawning/connecting to an adapter,
//! performing the handshake, and driving window execution.

pub mod device;
pub mod error;
pub mod process;

pub use device::{
    device_execute, device_init, device_init_with_transport, device_teardown, DeviceHandle,
    DeviceInitRequest, DeviceTiming,
};
pub use error::HarnessError;
pub use process::AdapterProcess;
