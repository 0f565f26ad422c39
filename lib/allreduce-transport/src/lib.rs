//! The transport and participant-set surfaces the allreduce core treats as external
//! collaborators (§6 of the specification this crate implements), plus an in-process stand-in
//! for both used by tests and the demo binary (§6.1). There is no real network code here.

pub mod envelope;
pub mod error;
pub mod local;
pub mod service;
pub mod transport;

pub use envelope::{Envelope, MessageKind};
pub use error::{Result, TransportError};
pub use local::{run_rank, LocalNetwork, LocalTransport, Shutdown, ShutdownWatcher};
pub use service::InMemoryParticipantSetService;
pub use transport::{ParticipantSetService, Transport};
