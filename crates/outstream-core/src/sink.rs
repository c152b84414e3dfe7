//! Device port sink capability
//!
//! A sink is the opaque hardware side of an output stream. The write thread
//! is the only caller of [`DevicePortSink::write`]; position queries may
//! arrive from other threads while a write is in flight, so implementations
//! keep their position state in atomics or behind their own short locks.
//!
//! Sinks are produced by a [`SinkFactory`] injected into the stream, which
//! also answers the device-level questions the stream asks without a sink
//! (latency estimate, device address validation).

use crate::error::{SinkError, StreamResult};
use crate::types::{AudioConfig, DeviceAddress, OutputFlag, PresentationPosition};

/// Source of PCM bytes handed to [`DevicePortSink::write`]
///
/// A read either fills `dst` completely and returns its length, or returns 0.
/// Sinks treat 0 as "no more data in this call", not as an error.
pub trait DataReader {
    fn read(&mut self, dst: &mut [u8]) -> usize;
}

/// An opened output device
pub trait DevicePortSink: Send + Sync {
    /// Frames presented so far, offset by the initial frame count the sink
    /// was created with
    fn presentation_position(&self) -> StreamResult<PresentationPosition>;

    /// Pull at most `max_bytes` from `reader`, apply `volume` and play them
    ///
    /// Returns the bytes consumed. May block to pace consumption against the
    /// device rate.
    fn write(&self, volume: f32, max_bytes: usize, reader: &mut dyn DataReader) -> usize;
}

/// Everything a factory needs to open a sink
#[derive(Debug, Clone, Copy)]
pub struct SinkParams<'a> {
    /// Size of the data queue feeding the sink, in bytes
    pub buffer_size_hint: usize,
    pub device: &'a DeviceAddress,
    pub config: &'a AudioConfig,
    pub flags: &'a [OutputFlag],
    /// Frames already written by earlier sinks of the same stream
    pub initial_frames: u64,
}

/// Creates sinks and answers static device queries
pub trait SinkFactory: Send + Sync {
    fn create(&self, params: SinkParams<'_>) -> Result<Box<dyn DevicePortSink>, SinkError>;

    /// Latency estimate in milliseconds, negative when unavailable
    fn latency_ms(&self, device: &DeviceAddress, config: &AudioConfig) -> i32;

    fn validate_device_address(&self, device: &DeviceAddress) -> bool;
}
