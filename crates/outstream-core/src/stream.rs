//! Output stream: configuration, volume and write thread lifecycle
//!
//! A [`StreamOut`] is created idle. `prepare_for_writing` starts its write
//! thread exactly once and hands the client ends of the transfer queues back
//! to the caller; after that all PCM traffic goes through those queues and
//! the stream itself is only used for control (volume, standby, close) and
//! for position queries.
//!
//! All methods take `&self`, so a stream can be shared behind an `Arc`
//! between control threads and position pollers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{StreamError, StreamResult};
use crate::sink::SinkFactory;
use crate::types::{
    AudioConfig, DeviceAddress, OutputFlag, PresentationPosition, MAX_FRAMES_COUNT,
    MAX_FRAME_SIZE,
};
use crate::volume::VolumeState;
use crate::write_thread::{abort_process, WorkerPhase, WriteChannels, WriteThread, WriterContext};

/// Immutable description of a stream
#[derive(Debug, Clone)]
pub struct StreamCommon {
    pub io_handle: i32,
    pub device: DeviceAddress,
    pub config: AudioConfig,
    pub flags: Vec<OutputFlag>,
}

impl StreamCommon {
    pub fn new(
        io_handle: i32,
        device: DeviceAddress,
        config: AudioConfig,
        flags: Vec<OutputFlag>,
    ) -> Self {
        Self {
            io_handle,
            device,
            config,
            flags,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size()
    }

    pub fn frame_count(&self) -> u64 {
        self.config.frame_count
    }

    pub fn buffer_size(&self) -> u64 {
        self.frame_size() as u64 * self.frame_count()
    }
}

/// One output stream routed to a device
pub struct StreamOut {
    common: Arc<StreamCommon>,
    volume: Arc<VolumeState>,
    factory: Arc<dyn SinkFactory>,
    write_thread: RwLock<Option<WriteThread>>,
    closed: AtomicBool,
    /// Highest frame count handed out by `get_presentation_position`
    reported_frames: AtomicU64,
}

impl StreamOut {
    pub fn new(
        factory: Arc<dyn SinkFactory>,
        io_handle: i32,
        device: DeviceAddress,
        config: AudioConfig,
        flags: Vec<OutputFlag>,
    ) -> Self {
        log::debug!(
            "StreamOut[{}]: {} @ {}Hz x{} {:?}",
            io_handle,
            device,
            config.sample_rate,
            config.channel_count,
            config.format
        );
        Self {
            common: Arc::new(StreamCommon::new(io_handle, device, config, flags)),
            volume: Arc::new(VolumeState::new()),
            factory,
            write_thread: RwLock::new(None),
            closed: AtomicBool::new(false),
            reported_frames: AtomicU64::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Stream description
    // ─────────────────────────────────────────────────────────────

    pub fn frame_size(&self) -> usize {
        self.common.frame_size()
    }

    pub fn frame_count(&self) -> u64 {
        self.common.frame_count()
    }

    pub fn buffer_size(&self) -> u64 {
        self.common.buffer_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.common.config.sample_rate
    }

    pub fn device(&self) -> &DeviceAddress {
        &self.common.device
    }

    pub fn config(&self) -> &AudioConfig {
        &self.common.config
    }

    pub fn flags(&self) -> &[OutputFlag] {
        &self.common.flags
    }

    pub fn validate_device_address(&self, device: &DeviceAddress) -> bool {
        self.factory.validate_device_address(device)
    }

    // ─────────────────────────────────────────────────────────────
    // Write pipeline
    // ─────────────────────────────────────────────────────────────

    /// Start the write thread and return the client ends of its queues
    ///
    /// The data queue holds `frame_size * frames_count` bytes. Fails with
    /// `InvalidArguments` for out-of-range geometry or if the queues or the
    /// thread cannot be created, and with `InvalidState` if called again.
    pub fn prepare_for_writing(
        &self,
        frame_size: u32,
        frames_count: u32,
    ) -> StreamResult<WriteChannels> {
        if frame_size == 0
            || frames_count == 0
            || frame_size > MAX_FRAME_SIZE
            || frames_count > MAX_FRAMES_COUNT
        {
            log::warn!(
                "StreamOut[{}]: prepare_for_writing rejected frame_size={} frames_count={}",
                self.common.io_handle,
                frame_size,
                frames_count
            );
            return Err(StreamError::InvalidArguments);
        }
        // `close` flips `closed` before taking this lock, so checking it
        // here keeps a thread from starting on a closed stream.
        let mut slot = self.write_thread.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.closed.load(Ordering::Acquire) {
            return Err(StreamError::InvalidState);
        }

        let ctx = WriterContext {
            common: self.common.clone(),
            volume: self.volume.clone(),
            factory: self.factory.clone(),
            on_fatal: abort_process,
        };
        let data_capacity = frame_size as usize * frames_count as usize;
        let (thread, channels) = WriteThread::spawn(ctx, data_capacity)?;
        *slot = Some(thread);

        log::info!(
            "StreamOut[{}]: write thread started ({} x {} bytes)",
            self.common.io_handle,
            frames_count,
            frame_size
        );
        Ok(channels)
    }

    /// Ask the write thread to release the sink
    pub fn standby(&self) -> StreamResult<()> {
        let slot = self.write_thread.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(thread) = slot.as_ref() {
            thread.standby();
        }
        Ok(())
    }

    /// Stop and join the write thread
    ///
    /// A second call returns `InvalidState`.
    pub fn close(&self) -> StreamResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StreamError::InvalidState);
        }
        let thread = self
            .write_thread
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(thread);
        log::info!("StreamOut[{}]: closed", self.common.io_handle);
        Ok(())
    }

    /// Current phase of the write thread, `None` before `prepare_for_writing`
    pub fn writer_phase(&self) -> Option<WorkerPhase> {
        let slot = self.write_thread.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(WriteThread::phase)
    }

    /// Presentation position from outside the write thread
    ///
    /// Frame counts never go backwards across calls on the same stream; a
    /// sink that reports fewer frames than an earlier standby answer is
    /// clamped to the earlier value.
    pub fn get_presentation_position(&self) -> StreamResult<PresentationPosition> {
        let slot = self.write_thread.read().unwrap_or_else(PoisonError::into_inner);
        let Some(thread) = slot.as_ref() else {
            return Err(StreamError::InvalidState);
        };
        let mut position = thread.presentation_position()?;
        let previous = self.reported_frames.fetch_max(position.frames, Ordering::AcqRel);
        position.frames = position.frames.max(previous);
        log::trace!(
            "StreamOut[{}]: presentation position: {} {}",
            self.common.io_handle,
            position.frames,
            position.timestamp.as_nanos()
        );
        Ok(position)
    }

    /// Device latency, falling back to the hardware buffer duration
    pub fn get_latency(&self) -> u32 {
        let latency_ms = self
            .factory
            .latency_ms(&self.common.device, &self.common.config);
        match u32::try_from(latency_ms) {
            Ok(ms) => ms,
            Err(_) => {
                let rate = u64::from(self.sample_rate().max(1));
                (self.frame_count() * 1000 / rate) as u32
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Volume
    // ─────────────────────────────────────────────────────────────

    pub fn set_volume(&self, left: f32, right: f32) -> StreamResult<()> {
        self.volume.set_stream_volume(left, right)
    }

    pub fn set_master_volume(&self, volume: f32) -> StreamResult<()> {
        self.volume.set_master_volume(volume)
    }

    pub fn effective_volume(&self) -> f32 {
        self.volume.effective()
    }

    // ─────────────────────────────────────────────────────────────
    // Capabilities this stream does not offer
    // ─────────────────────────────────────────────────────────────

    pub fn start(&self) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn stop(&self) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn supports_pause_and_resume(&self) -> (bool, bool) {
        (false, false)
    }

    pub fn pause(&self) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn resume(&self) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn supports_drain(&self) -> bool {
        false
    }

    pub fn drain(&self) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn flush(&self) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn set_hw_av_sync(&self, _hw_av_sync: u32) -> StreamResult<()> {
        Err(StreamError::NotSupported)
    }

    pub fn get_render_position(&self) -> StreamResult<u32> {
        Err(StreamError::NotSupported)
    }

    pub fn get_next_write_timestamp(&self) -> StreamResult<i64> {
        Err(StreamError::NotSupported)
    }

    pub fn add_effect(&self, _effect_id: u64) -> StreamResult<()> {
        Err(StreamError::InvalidArguments)
    }

    pub fn remove_effect(&self, _effect_id: u64) -> StreamResult<()> {
        Err(StreamError::InvalidArguments)
    }

    /// No vendor parameters are exposed; asking for any key is unsupported
    pub fn get_parameters(&self, keys: &[String]) -> StreamResult<Vec<(String, String)>> {
        if keys.is_empty() {
            Ok(Vec::new())
        } else {
            Err(StreamError::NotSupported)
        }
    }

    /// Parameters are accepted and ignored
    pub fn set_parameters(&self, _parameters: &[(String, String)]) -> StreamResult<()> {
        Ok(())
    }
}

impl Drop for StreamOut {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Joins the write thread
            self.write_thread
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }
}
