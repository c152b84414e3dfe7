//! Dedicated write thread of an output stream
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  command (1 slot)   ┌──────────────────────┐
//! │                  │────────────────────►│                      │
//! │   Stream client  │  data (bytes)       │     Write thread     │
//! │  (StreamWriter)  │────────────────────►│  (owns sink + queue  │──► DevicePortSink
//! │                  │  status (1 slot)    │   consumer halves)   │
//! │                  │◄────────────────────│                      │
//! └────────┬─────────┘                     └──────────┬───────────┘
//!          │ wake(NOT_EMPTY) / wait(NOT_FULL)         │ wait(NOT_EMPTY | STAND_BY | EXIT)
//!          └──────────────── EventFlag ───────────────┘
//! ```
//!
//! The thread sleeps on the event flag and handles one wake at a time:
//! - `EXIT_REQUEST` ends the loop, whatever else is set in the same wake
//! - `STAND_BY_REQUEST` drops the sink
//! - `NOT_EMPTY` opens a sink if there is none, then processes exactly one
//!   command and posts exactly one status reply
//!
//! The cumulative frame counter lives outside the sink so that a sink
//! reopened after standby continues from where the previous one stopped.
//! A sink that cannot be opened is fatal: the write thread hands the error to
//! its [`FatalHandler`], which aborts the process.
//! Other threads may read the position through [`WriteThread::presentation_position`],
//! which takes the sink slot lock only for the duration of the query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::error::{ResultCode, StreamError, StreamResult};
use crate::event_flag::{
    EventFlag, EXIT_REQUEST, NOT_EMPTY, NOT_FULL, STAND_BY_REQUEST, WORKER_WAIT_MASK,
};
use crate::priority::raise_current_thread_priority;
use crate::queue::{message_queue, QueueReader, QueueWriter};
use crate::sink::{DataReader, DevicePortSink, SinkFactory, SinkParams};
use crate::stream::StreamCommon;
use crate::time::monotonic_now;
use crate::types::{PresentationPosition, WriteCommand, WriteReply, WriteStatus};
use crate::volume::VolumeState;

/// Called with a description of an unrecoverable write thread failure
pub(crate) type FatalHandler = fn(&str) -> !;

/// Log the failure and abort the process
pub(crate) fn abort_process(message: &str) -> ! {
    log::error!("WriteThread: {}", message);
    std::process::abort()
}

/// Lifecycle phase of the write thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Standby or not yet written: no sink is open
    NoSink,
    /// A sink is open and receiving data
    Active,
    /// The loop has terminated
    Exiting,
}

/// Client ends of the transfer queues, handed out once by `prepare_for_writing`
pub struct WriteChannels {
    pub command: QueueWriter<u32>,
    pub data: QueueWriter<u8>,
    pub status: QueueReader<WriteStatus>,
    pub event_flag: Arc<EventFlag>,
    pub thread_id: ThreadId,
}

/// What the write thread reads from its stream
pub(crate) struct WriterContext {
    pub common: Arc<StreamCommon>,
    pub volume: Arc<VolumeState>,
    pub factory: Arc<dyn SinkFactory>,
    pub on_fatal: FatalHandler,
}

/// State shared between the write thread and external position queries
#[derive(Default)]
struct SinkSlot {
    /// Frames written through every sink of this stream
    frames: AtomicU64,
    /// Locked by the write thread only when installing or dropping a sink
    sink: Mutex<Option<Arc<dyn DevicePortSink>>>,
}

/// Handle to a running write thread
///
/// Dropping the handle requests exit and joins the thread.
pub(crate) struct WriteThread {
    slot: Arc<SinkSlot>,
    event_flag: Arc<EventFlag>,
    handle: Option<JoinHandle<()>>,
}

impl WriteThread {
    /// Build the queues and start the thread
    ///
    /// Any failure here leaves nothing running and reports `InvalidArguments`.
    pub(crate) fn spawn(
        ctx: WriterContext,
        data_capacity: usize,
    ) -> StreamResult<(Self, WriteChannels)> {
        let (command_tx, command_rx) = message_queue::<u32>(1).map_err(|e| {
            log::error!("WriteThread: command queue is invalid: {}", e);
            StreamError::InvalidArguments
        })?;
        let (data_tx, data_rx) = message_queue::<u8>(data_capacity).map_err(|e| {
            log::error!("WriteThread: data queue is invalid: {}", e);
            StreamError::InvalidArguments
        })?;
        let (status_tx, status_rx) = message_queue::<WriteStatus>(1).map_err(|e| {
            log::error!("WriteThread: status queue is invalid: {}", e);
            StreamError::InvalidArguments
        })?;

        let event_flag = Arc::new(EventFlag::new());
        let slot = Arc::new(SinkSlot::default());
        let thread_name = format!("outstream-write-{}", ctx.common.io_handle);

        let worker = Worker {
            frame_size: ctx.common.frame_size().max(1),
            ctx,
            slot: slot.clone(),
            event_flag: event_flag.clone(),
            command_rx,
            data_rx,
            status_tx,
            sink: None,
        };

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .map_err(|e| {
                log::error!("WriteThread: failed to spawn: {}", e);
                StreamError::InvalidArguments
            })?;
        let thread_id = handle.thread().id();

        let channels = WriteChannels {
            command: command_tx,
            data: data_tx,
            status: status_rx,
            event_flag: event_flag.clone(),
            thread_id,
        };

        Ok((
            Self {
                slot,
                event_flag,
                handle: Some(handle),
            },
            channels,
        ))
    }

    /// Position as seen from outside the write thread
    ///
    /// With a sink open the sink answers. In standby the last cumulative frame
    /// count is paired with the current time; this can be one request stale if
    /// standby races the query, but it is never ahead of the real position.
    pub fn presentation_position(&self) -> StreamResult<PresentationPosition> {
        let guard = self.slot.sink.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sink) => sink.presentation_position(),
            None => Ok(PresentationPosition {
                frames: self.slot.frames.load(Ordering::Acquire),
                timestamp: monotonic_now(),
            }),
        }
    }

    /// Ask the thread to release its sink
    pub fn standby(&self) {
        self.event_flag.wake(STAND_BY_REQUEST);
    }

    /// Cumulative frames written (lock-free)
    #[cfg(test)]
    fn frames(&self) -> u64 {
        self.slot.frames.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> WorkerPhase {
        if self.handle.as_ref().map_or(true, |h| h.is_finished()) {
            return WorkerPhase::Exiting;
        }
        let guard = self.slot.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            WorkerPhase::Active
        } else {
            WorkerPhase::NoSink
        }
    }
}

impl Drop for WriteThread {
    fn drop(&mut self) {
        self.event_flag.wake(EXIT_REQUEST);
        if let Some(handle) = self.handle.take() {
            log::debug!("WriteThread: waiting for write thread to exit");
            if handle.join().is_err() {
                log::error!("WriteThread: write thread panicked");
            }
        }
    }
}

/// Everything owned by the write thread itself
struct Worker {
    ctx: WriterContext,
    slot: Arc<SinkSlot>,
    event_flag: Arc<EventFlag>,
    command_rx: QueueReader<u32>,
    data_rx: QueueReader<u8>,
    status_tx: QueueWriter<WriteStatus>,
    /// Write-side reference; the slot holds the one queries see
    sink: Option<Arc<dyn DevicePortSink>>,
    frame_size: usize,
}

impl Worker {
    fn run(mut self) {
        raise_current_thread_priority();
        log::info!(
            "WriteThread: started for {} ({} byte data queue)",
            self.ctx.common.device,
            self.data_rx.capacity()
        );

        loop {
            let state = self.event_flag.wait(WORKER_WAIT_MASK);
            if state & EXIT_REQUEST != 0 {
                break;
            }

            if state & STAND_BY_REQUEST != 0 {
                self.enter_standby();
            }

            if state & NOT_EMPTY != 0 {
                if self.sink.is_none() {
                    self.open_sink();
                }
                self.process_command();
            }
        }

        self.release_sink();
        log::info!(
            "WriteThread: exiting, frames: {}",
            self.slot.frames.load(Ordering::Acquire)
        );
    }

    fn enter_standby(&mut self) {
        log::debug!(
            "WriteThread: entering standby, frames: {}",
            self.slot.frames.load(Ordering::Acquire)
        );
        self.release_sink();
    }

    fn release_sink(&mut self) {
        self.sink = None;
        // Last reference goes away under the query lock
        let mut guard = self.slot.sink.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take();
    }

    fn open_sink(&mut self) {
        let common = &self.ctx.common;
        let initial_frames = self.slot.frames.load(Ordering::Acquire);
        let params = SinkParams {
            buffer_size_hint: self.data_rx.capacity(),
            device: &common.device,
            config: &common.config,
            flags: &common.flags,
            initial_frames,
        };

        let sink: Arc<dyn DevicePortSink> = match self.ctx.factory.create(params) {
            Ok(sink) => Arc::from(sink),
            Err(e) => {
                let message = format!("cannot open sink for {}: {}", common.device, e);
                (self.ctx.on_fatal)(&message)
            }
        };
        log::debug!(
            "WriteThread: opened sink for {} at frame {}",
            common.device,
            initial_frames
        );

        let mut guard = self.slot.sink.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(sink.clone());
        self.sink = Some(sink);
    }

    fn process_command(&mut self) {
        let Some(code) = self.command_rx.read() else {
            return; // Nothing to do
        };

        let mut status = match WriteCommand::try_from(code) {
            Ok(WriteCommand::Write) => self.do_write(),
            Ok(WriteCommand::GetPresentationPosition) => self.do_get_presentation_position(),
            Ok(WriteCommand::GetLatency) => self.do_get_latency(),
            Err(unknown) => {
                log::error!("WriteThread: unknown write thread command code {}", unknown);
                WriteStatus::failure(ResultCode::NotSupported)
            }
        };
        status.reply_to = code;

        if !self.status_tx.write(status) {
            log::error!("WriteThread: status queue write failed");
        }
        self.event_flag.wake(NOT_FULL);
    }

    fn do_write(&mut self) -> WriteStatus {
        let Some(sink) = self.sink.as_ref() else {
            return WriteStatus::failure(ResultCode::InvalidState);
        };

        let max_bytes = self.data_rx.available_to_read();
        let mut reader = QueueDataReader {
            queue: &mut self.data_rx,
            total_read: 0,
        };
        sink.write(self.ctx.volume.effective(), max_bytes, &mut reader);

        // Callers align writes to the frame size; a trailing partial frame
        // is not counted.
        let total_read = reader.total_read;
        let written = (total_read / self.frame_size) as u64;
        let frames = self.slot.frames.fetch_add(written, Ordering::AcqRel) + written;
        log::trace!("WriteThread: frames: {} (+{})", frames, written);

        WriteStatus::ok(WriteReply::Written(total_read as u64))
    }

    fn do_get_presentation_position(&self) -> WriteStatus {
        let Some(sink) = self.sink.as_ref() else {
            return WriteStatus::failure(ResultCode::InvalidState);
        };
        match sink.presentation_position() {
            Ok(position) => {
                log::trace!(
                    "WriteThread: presentation position: {} {}",
                    position.frames,
                    position.timestamp.as_nanos()
                );
                WriteStatus::ok(WriteReply::PresentationPosition(position))
            }
            Err(e) => WriteStatus::failure(e.into()),
        }
    }

    fn do_get_latency(&self) -> WriteStatus {
        let common = &self.ctx.common;
        let latency_ms = self.ctx.factory.latency_ms(&common.device, &common.config);
        match u32::try_from(latency_ms) {
            Ok(ms) => WriteStatus::ok(WriteReply::LatencyMs(ms)),
            Err(_) => WriteStatus::failure(ResultCode::InvalidState),
        }
    }
}

/// Feeds the sink from the data queue and counts what it took
struct QueueDataReader<'a> {
    queue: &'a mut QueueReader<u8>,
    total_read: usize,
}

impl DataReader for QueueDataReader<'_> {
    fn read(&mut self, dst: &mut [u8]) -> usize {
        if self.queue.read_slice(dst) {
            self.total_read += dst.len();
            dst.len()
        } else {
            log::warn!("WriteThread: data queue read of {} bytes failed", dst.len());
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{panic_on_fatal, RecordingFactory, SinkProbe};
    use crate::types::{AudioConfig, DeviceAddress};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn context(factory: RecordingFactory) -> WriterContext {
        WriterContext {
            common: Arc::new(StreamCommon::new(
                1,
                DeviceAddress::new("speaker", ""),
                AudioConfig::default(),
                Vec::new(),
            )),
            volume: Arc::new(VolumeState::new()),
            factory: Arc::new(factory),
            on_fatal: panic_on_fatal,
        }
    }

    fn exchange(channels: &mut WriteChannels, code: u32) -> WriteStatus {
        assert!(channels.command.write(code));
        channels.event_flag.wake(NOT_EMPTY);
        channels
            .status
            .read_blocking(&channels.event_flag, NOT_FULL, TIMEOUT)
            .expect("status reply")
    }

    #[test]
    fn test_sink_opened_lazily_and_frames_counted() {
        let probe = SinkProbe::new();
        let (thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe.clone())), 64).unwrap();
        assert_eq!(thread.phase(), WorkerPhase::NoSink);
        assert_eq!(probe.created(), 0);

        assert!(channels.data.write_slice(&[0u8; 40]));
        let status = exchange(&mut channels, WriteCommand::Write.code());
        assert_eq!(status.retval, ResultCode::Ok);
        assert_eq!(status.reply, WriteReply::Written(40));
        assert_eq!(status.reply_to, WriteCommand::Write.code());

        assert_eq!(probe.created(), 1);
        assert_eq!(thread.frames(), 10);
        assert_eq!(thread.phase(), WorkerPhase::Active);
    }

    #[test]
    fn test_partial_frame_is_dropped() {
        let probe = SinkProbe::new();
        let (thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe)), 64).unwrap();
        assert!(channels.data.write_slice(&[0u8; 10]));
        let status = exchange(&mut channels, WriteCommand::Write.code());
        assert_eq!(status.reply, WriteReply::Written(10));
        assert_eq!(thread.frames(), 2);
    }

    #[test]
    fn test_unknown_command_replies_not_supported() {
        let probe = SinkProbe::new();
        let (_thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe)), 64).unwrap();

        let status = exchange(&mut channels, 77);
        assert_eq!(status.retval, ResultCode::NotSupported);
        assert_eq!(status.reply_to, 77);

        // Still serving commands afterwards
        let status = exchange(&mut channels, WriteCommand::GetLatency.code());
        assert_eq!(status.retval, ResultCode::Ok);
        assert_eq!(status.reply, WriteReply::LatencyMs(20));
    }

    #[test]
    fn test_negative_latency_is_invalid_state() {
        let probe = SinkProbe::new();
        let factory = RecordingFactory::new(probe).with_latency_ms(-1);
        let (_thread, mut channels) = WriteThread::spawn(context(factory), 64).unwrap();
        let status = exchange(&mut channels, WriteCommand::GetLatency.code());
        assert_eq!(status.retval, ResultCode::InvalidState);
        assert_eq!(status.reply, WriteReply::None);
    }

    #[test]
    fn test_sink_position_error_propagated() {
        let probe = SinkProbe::new();
        probe.fail_position(StreamError::NotSupported);
        let (_thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe)), 64).unwrap();
        let status = exchange(&mut channels, WriteCommand::GetPresentationPosition.code());
        assert_eq!(status.retval, ResultCode::NotSupported);
    }

    #[test]
    fn test_standby_drops_sink_and_preserves_frames() {
        let probe = SinkProbe::new();
        let (thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe.clone())), 64).unwrap();
        assert!(channels.data.write_slice(&[0u8; 16]));
        exchange(&mut channels, WriteCommand::Write.code());

        thread.standby();
        probe.wait_destroyed(1, TIMEOUT);
        assert_eq!(thread.phase(), WorkerPhase::NoSink);

        let position = thread.presentation_position().unwrap();
        assert_eq!(position.frames, 4);

        assert!(channels.data.write_slice(&[0u8; 8]));
        exchange(&mut channels, WriteCommand::Write.code());
        assert_eq!(probe.created(), 2);
        assert_eq!(probe.initial_frames(), vec![0, 4]);
        assert_eq!(thread.frames(), 6);
    }

    #[test]
    fn test_exit_wins_over_pending_work() {
        let probe = SinkProbe::new();
        let (thread, channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe.clone())), 64).unwrap();
        channels
            .event_flag
            .wake(NOT_EMPTY | STAND_BY_REQUEST | EXIT_REQUEST);
        drop(thread);
        assert_eq!(probe.created(), 0, "exit must not open a sink");
    }

    #[test]
    fn test_exit_wins_over_queued_write() {
        let probe = SinkProbe::new();
        let (thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe.clone())), 64).unwrap();
        assert!(channels.data.write_slice(&[0u8; 32]));
        assert!(channels.command.write(WriteCommand::Write.code()));
        // Data, command and exit all become visible in the same wake
        channels.event_flag.wake(NOT_EMPTY | EXIT_REQUEST);

        drop(thread);
        assert_eq!(probe.created(), 0);
        assert_eq!(probe.bytes(), 0);
        assert!(channels.status.read().is_none(), "no reply after exit");
        assert_eq!(channels.command.available_to_write(), 0, "command left unread");
    }

    #[test]
    fn test_spurious_wake_is_noop() {
        let probe = SinkProbe::new();
        let (thread, mut channels) =
            WriteThread::spawn(context(RecordingFactory::new(probe)), 64).unwrap();
        channels.event_flag.wake(NOT_EMPTY);
        // Nothing queued: no reply, the thread keeps serving
        assert!(channels
            .status
            .read_blocking(&channels.event_flag, NOT_FULL, Duration::from_millis(50))
            .is_none());
        let status = exchange(&mut channels, WriteCommand::GetLatency.code());
        assert_eq!(status.retval, ResultCode::Ok);
        assert_eq!(thread.phase(), WorkerPhase::Active);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let probe = SinkProbe::new();
        assert_eq!(
            WriteThread::spawn(context(RecordingFactory::new(probe)), 0).err(),
            Some(StreamError::InvalidArguments)
        );
    }

    #[test]
    fn test_sink_creation_failure_calls_fatal_handler() {
        let probe = SinkProbe::new();
        let factory = RecordingFactory::new(probe).failing();
        let (thread, channels) = WriteThread::spawn(context(factory), 64).unwrap();
        channels.event_flag.wake(NOT_EMPTY);
        let deadline = std::time::Instant::now() + TIMEOUT;
        while thread.phase() != WorkerPhase::Exiting && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(thread.phase(), WorkerPhase::Exiting);
    }

    #[test]
    fn test_sink_creation_failure_aborts_process() {
        const CHILD_ENV: &str = "OUTSTREAM_SINK_FAILURE_CHILD";

        if std::env::var_os(CHILD_ENV).is_some() {
            let mut ctx = context(RecordingFactory::new(SinkProbe::new()).failing());
            ctx.on_fatal = abort_process;
            let (_thread, channels) = WriteThread::spawn(ctx, 64).unwrap();
            channels.event_flag.wake(NOT_EMPTY);
            // Only reached if the process survived; the parent sees success
            std::thread::sleep(TIMEOUT);
            return;
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "write_thread::tests::test_sink_creation_failure_aborts_process",
                "--test-threads=1",
            ])
            .env(CHILD_ENV, "1")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap();
        assert!(!status.success(), "child exited normally: {:?}", status);
    }
}
