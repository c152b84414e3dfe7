//! Recording sink used by the unit tests

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{SinkError, StreamError, StreamResult};
use crate::sink::{DataReader, DevicePortSink, SinkFactory, SinkParams};
use crate::time::monotonic_now;
use crate::types::{AudioConfig, DeviceAddress, PresentationPosition};

/// Counters shared between a test and every sink its factory creates
#[derive(Default)]
pub struct SinkProbe {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    bytes: AtomicU64,
    last_volume: AtomicU32,
    initial_frames: Mutex<Vec<u64>>,
    position_error: Mutex<Option<StreamError>>,
}

impl SinkProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn last_volume(&self) -> f32 {
        f32::from_bits(self.last_volume.load(Ordering::SeqCst))
    }

    pub fn initial_frames(&self) -> Vec<u64> {
        self.initial_frames.lock().unwrap().clone()
    }

    pub fn fail_position(&self, err: StreamError) {
        *self.position_error.lock().unwrap() = Some(err);
    }

    pub fn wait_destroyed(&self, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.destroyed() < count {
            assert!(Instant::now() < deadline, "sink was not destroyed in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// Consumes everything offered in one read and reports frames by byte count
pub struct RecordingSink {
    probe: Arc<SinkProbe>,
    frame_size: u64,
    initial_frames: u64,
    consumed: AtomicU64,
}

impl DevicePortSink for RecordingSink {
    fn presentation_position(&self) -> StreamResult<PresentationPosition> {
        if let Some(err) = *self.probe.position_error.lock().unwrap() {
            return Err(err);
        }
        Ok(PresentationPosition {
            frames: self.initial_frames + self.consumed.load(Ordering::SeqCst) / self.frame_size,
            timestamp: monotonic_now(),
        })
    }

    fn write(&self, volume: f32, max_bytes: usize, reader: &mut dyn DataReader) -> usize {
        self.probe.last_volume.store(volume.to_bits(), Ordering::SeqCst);
        let mut buf = vec![0u8; max_bytes];
        let n = reader.read(&mut buf);
        self.consumed.fetch_add(n as u64, Ordering::SeqCst);
        self.probe.bytes.fetch_add(n as u64, Ordering::SeqCst);
        n
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.probe.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct RecordingFactory {
    probe: Arc<SinkProbe>,
    latency_ms: i32,
    fail: bool,
}

impl RecordingFactory {
    pub fn new(probe: Arc<SinkProbe>) -> Self {
        Self {
            probe,
            latency_ms: 20,
            fail: false,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: i32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl SinkFactory for RecordingFactory {
    fn create(&self, params: SinkParams<'_>) -> Result<Box<dyn DevicePortSink>, SinkError> {
        if self.fail {
            return Err(SinkError::DeviceUnavailable(params.device.to_string()));
        }
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        self.probe
            .initial_frames
            .lock()
            .unwrap()
            .push(params.initial_frames);
        Ok(Box::new(RecordingSink {
            probe: self.probe.clone(),
            frame_size: params.config.frame_size().max(1) as u64,
            initial_frames: params.initial_frames,
            consumed: AtomicU64::new(0),
        }))
    }

    fn latency_ms(&self, _device: &DeviceAddress, _config: &AudioConfig) -> i32 {
        self.latency_ms
    }

    fn validate_device_address(&self, device: &DeviceAddress) -> bool {
        !device.device_type.is_empty()
    }
}

/// Fatal handler for tests: ends the write thread instead of the process
pub fn panic_on_fatal(message: &str) -> ! {
    panic!("write thread failure: {}", message)
}
