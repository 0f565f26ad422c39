//! The collective allreduce core: two message-driven reduction engines (recursive doubling and
//! Rabenseifner's reduce-scatter/allgather), selected by payload size, plus the instance
//! lifecycle (registry, state store, adapter) that lets any number of participant sets run any
//! number of concurrent reductions over this rank's single-threaded scheduler.
//!
//! Transport, serialization, and participant-set bookkeeping are consumed through the traits in
//! `allreduce_transport`; this crate never opens a socket or owns a rank list itself.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod op;
pub mod payload;
pub mod registry;
pub mod state;
pub mod store;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::{CoreError, Result};
pub use op::{MaxOp, ReduceOp, SumOp};
pub use payload::ReducePayload;
