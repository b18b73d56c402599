//! Transport-aware core of the CORTEX benchmarking harness: the concrete
//! transports, the framing/chunking glue that drives `cortex-proto`'s pure
//! decoders over them, calibration-state files, and the `Environment`
//! abstraction used to keep scheduling deterministic under simulation.

pub mod calibration;
pub mod environment;
pub mod error;
pub mod io;
pub mod transport;

pub use calibration::CalibrationState;
pub use environment::{Environment, SimEnvironment, SystemEnvironment};
pub use error::{CortexError, SessionError, TransportError};
pub use io::{recv_chunked, recv_frame, send_chunked, send_frame};
pub use transport::{deadline_from, recv_exact, Transport};
