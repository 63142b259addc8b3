//! Concurrent runtime for the ringbridge daemon.
//!
//! One SEEDLink reader task unpacks upstream records into packets and hands
//! them to the pipeline coordinator, whose fan-out task updates per-stream
//! metrics and distributes each packet to every DataLink sink. Each sink
//! owns a bounded queue and a writer task publishing re-encoded miniSEED
//! records to its ring server.
//!
//! All tasks stop cooperatively through cancellation tokens; reconnect
//! waits are interruptible so shutdown latency stays bounded.

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod metrics;
#[cfg(test)]
pub(crate) mod mock;
pub mod queue;
pub mod sink;
pub mod source;
pub mod state;

pub use coordinator::{Pipeline, PipelineOptions};
pub use error::{PipelineError, Result};
pub use metrics::{MetricsMap, StreamObservables, WriterCounters};
pub use queue::PacketQueue;
pub use sink::{DataLinkOptions, DataLinkSink};
pub use source::{PacketCallback, SeedLinkOptions, SeedLinkSource};
