//! Serial session over a pair of shared byte rings.
//!
//! The controller writes into an outbound ring and reads from an inbound ring;
//! a worker running on the tokio runtime owns the port and moves bytes between
//! the rings and the port with a drain loop and an ingest loop.

mod config;
mod doorbell;
mod drain;
mod error;
mod ingest;
mod port;
mod protocol;
mod session;
mod shutdown;
mod state;
mod worker;

pub use config::SessionConfig;
pub use doorbell::Doorbell;
pub use error::SessionError;
pub use port::{MemoryPort, PortOptions, PortProbe, SerialPort};
pub use protocol::{LoopStage, Request, Response, RingAttach};
pub use session::Session;
pub use state::SessionState;
pub use worker::{Worker, WorkerHandle};
