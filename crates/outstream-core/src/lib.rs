//! Outstream Core - Real-time PCM write pipeline for output streams
//!
//! A stream client hands audio to a dedicated write thread through three
//! bounded queues (command, data, status) coordinated by an [`EventFlag`].
//! The write thread owns the device sink and keeps a frame counter that
//! survives standby.

mod client;
pub mod error;
pub mod event_flag;
pub mod null_sink;
mod priority;
pub mod queue;
pub mod sink;
mod stream;
mod time;
pub mod types;
mod volume;
mod write_thread;

#[cfg(test)]
mod test_support;

pub use client::StreamWriter;
pub use error::{QueueError, ResultCode, SinkError, StreamError, StreamResult};
pub use event_flag::EventFlag;
pub use null_sink::{NullSink, NullSinkFactory};
pub use sink::{DataReader, DevicePortSink, SinkFactory, SinkParams};
pub use stream::{StreamCommon, StreamOut};
pub use time::monotonic_now;
pub use types::*;
pub use volume::VolumeState;
pub use write_thread::{WorkerPhase, WriteChannels};
