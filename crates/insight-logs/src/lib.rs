//! insight-logs — log retrieval for one instance.
//!
//! An instance reference resolves either to the pods that carry it
//! (orchestrator path) or to a log index filter (cloud path). Both paths
//! produce the same `LogEntry` stream:
//!
//! - **Pods**: one line stream per matching pod, opened up front and
//!   interleaved as lines arrive. Ordering holds per pod only.
//! - **Index**: oldest-first paging by cursor. In tail mode the engine
//!   keeps polling for entries newer than the last one delivered.
//!
//! A backend failure ends the stream after a single error item.
//! Cancellation is the caller dropping the stream (or [`until_cancelled`]).

pub mod engine;
pub mod normalize;

pub use engine::{until_cancelled, InstanceRef, LogEngine, LogOptions, LogStream, DEFAULT_POLL_INTERVAL};
pub use normalize::{frame_line, from_index_record, parse_timestamp_millis};
