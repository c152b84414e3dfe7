//! Sink that discards audio at the device rate
//!
//! Used when no hardware is attached and by the host driver. Consumption is
//! paced against the wall clock so the write thread behaves as it would in
//! front of a real device: a sink never holds more than its buffer ahead of
//! real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{SinkError, StreamResult};
use crate::sink::{DataReader, DevicePortSink, SinkFactory, SinkParams};
use crate::time::monotonic_now;
use crate::types::{AudioConfig, DeviceAddress, PresentationPosition};

/// Default latency reported for null devices
pub const NULL_SINK_LATENCY_MS: i32 = 20;

pub struct NullSink {
    sample_rate: u64,
    frame_size: usize,
    /// Frames the sink may run ahead of real time
    buffer_frames: u64,
    initial_frames: u64,
    consumed_frames: AtomicU64,
    opened_at: Instant,
    pace: bool,
}

impl NullSink {
    fn elapsed_frames(&self) -> u64 {
        let elapsed = self.opened_at.elapsed();
        (elapsed.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as u64
    }

    /// Sleep until consumption is within one buffer of real time
    fn throttle(&self, consumed: u64) {
        let ahead = consumed.saturating_sub(self.elapsed_frames() + self.buffer_frames);
        if ahead > 0 {
            let nanos = ahead * 1_000_000_000 / self.sample_rate;
            std::thread::sleep(Duration::from_nanos(nanos));
        }
    }
}

impl DevicePortSink for NullSink {
    fn presentation_position(&self) -> StreamResult<PresentationPosition> {
        Ok(PresentationPosition {
            frames: self.initial_frames + self.consumed_frames.load(Ordering::Acquire),
            timestamp: monotonic_now(),
        })
    }

    fn write(&self, volume: f32, max_bytes: usize, reader: &mut dyn DataReader) -> usize {
        log::trace!("NullSink: write {} bytes at volume {:.3}", max_bytes, volume);
        let chunk_bytes = (self.buffer_frames as usize * self.frame_size).max(self.frame_size);
        let mut buf = vec![0u8; chunk_bytes];
        let mut total = 0;

        while total < max_bytes {
            let want = chunk_bytes.min(max_bytes - total);
            let n = reader.read(&mut buf[..want]);
            if n == 0 {
                break;
            }
            total += n;
            let frames = (n / self.frame_size) as u64;
            let consumed = self.consumed_frames.fetch_add(frames, Ordering::AcqRel) + frames;
            if self.pace {
                self.throttle(consumed);
            }
        }
        total
    }
}

/// Opens [`NullSink`]s for any (or an allow-listed set of) device types
#[derive(Debug, Clone)]
pub struct NullSinkFactory {
    latency_ms: i32,
    pace: bool,
    refuse: bool,
    /// Accepted device types; empty accepts everything
    device_types: Vec<String>,
}

impl Default for NullSinkFactory {
    fn default() -> Self {
        Self {
            latency_ms: NULL_SINK_LATENCY_MS,
            pace: true,
            refuse: false,
            device_types: Vec::new(),
        }
    }
}

impl NullSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume data as fast as it arrives instead of at the device rate
    pub fn unpaced(mut self) -> Self {
        self.pace = false;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: i32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Fail every `create` call as if the device had vanished
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn with_device_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.device_types = types.into_iter().map(Into::into).collect();
        self
    }
}

impl SinkFactory for NullSinkFactory {
    fn create(&self, params: SinkParams<'_>) -> Result<Box<dyn DevicePortSink>, SinkError> {
        if self.refuse || !self.validate_device_address(params.device) {
            return Err(SinkError::DeviceUnavailable(params.device.to_string()));
        }
        let frame_size = params.config.frame_size();
        if frame_size == 0 || params.config.sample_rate == 0 {
            return Err(SinkError::UnsupportedConfig(format!(
                "{} Hz, {} byte frames",
                params.config.sample_rate, frame_size
            )));
        }

        let buffer_frames = params.config.frame_count.max(1);
        log::debug!(
            "NullSink: open {} ({} frame buffer, hint {} bytes, starting at frame {})",
            params.device,
            buffer_frames,
            params.buffer_size_hint,
            params.initial_frames
        );

        Ok(Box::new(NullSink {
            sample_rate: params.config.sample_rate as u64,
            frame_size,
            buffer_frames,
            initial_frames: params.initial_frames,
            consumed_frames: AtomicU64::new(0),
            opened_at: Instant::now(),
            pace: self.pace,
        }))
    }

    fn latency_ms(&self, _device: &DeviceAddress, _config: &AudioConfig) -> i32 {
        self.latency_ms
    }

    fn validate_device_address(&self, device: &DeviceAddress) -> bool {
        self.device_types.is_empty() || self.device_types.iter().any(|t| *t == device.device_type)
    }
}
