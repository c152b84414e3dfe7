//! Client side of the write pipeline
//!
//! [`StreamWriter`] drives the queues returned by
//! [`StreamOut::prepare_for_writing`](crate::StreamOut::prepare_for_writing).
//! Every call is one exchange: payload into the data queue, one command code,
//! a `NOT_EMPTY` wake, then a wait on `NOT_FULL` for the matching status.

use std::thread::ThreadId;
use std::time::Duration;

use crate::error::{StreamError, StreamResult};
use crate::event_flag::{NOT_EMPTY, NOT_FULL};
use crate::types::{PresentationPosition, WriteCommand, WriteReply, WriteStatus};
use crate::write_thread::WriteChannels;

/// Exchanges commands with a stream's write thread
pub struct StreamWriter {
    channels: WriteChannels,
}

impl StreamWriter {
    pub fn new(channels: WriteChannels) -> Self {
        Self { channels }
    }

    /// Id of the write thread serving this writer
    pub fn thread_id(&self) -> ThreadId {
        self.channels.thread_id
    }

    pub fn data_capacity(&self) -> usize {
        self.channels.data.capacity()
    }

    /// Queue `bytes` and have the write thread hand them to the sink
    ///
    /// Returns the number of bytes the sink consumed. Waits up to `timeout`
    /// for room in the data queue. A buffer larger than the whole queue is
    /// rejected with `InvalidArguments` before anything is sent.
    pub fn write(&mut self, bytes: &[u8], timeout: Duration) -> StreamResult<u64> {
        let capacity = self.channels.data.capacity();
        if bytes.len() > capacity {
            log::warn!(
                "StreamWriter: {} bytes exceed the {} byte data queue",
                bytes.len(),
                capacity
            );
            return Err(StreamError::InvalidArguments);
        }
        let queued = self.channels.data.write_slice_blocking(
            bytes,
            &self.channels.event_flag,
            timeout,
        );
        if !queued {
            log::warn!("StreamWriter: data queue stayed full for {:?}", timeout);
            return Err(StreamError::Timeout);
        }

        match self.exchange(WriteCommand::Write.code(), timeout)?.reply {
            WriteReply::Written(n) => Ok(n),
            other => {
                log::error!("StreamWriter: unexpected reply to write: {:?}", other);
                Err(StreamError::InvalidState)
            }
        }
    }

    /// Position as reported by the sink on the write thread
    pub fn presentation_position(
        &mut self,
        timeout: Duration,
    ) -> StreamResult<PresentationPosition> {
        let status = self.exchange(WriteCommand::GetPresentationPosition.code(), timeout)?;
        match status.reply {
            WriteReply::PresentationPosition(position) => Ok(position),
            other => {
                log::error!("StreamWriter: unexpected reply to position: {:?}", other);
                Err(StreamError::InvalidState)
            }
        }
    }

    /// Sink latency in milliseconds
    pub fn latency(&mut self, timeout: Duration) -> StreamResult<u32> {
        match self.exchange(WriteCommand::GetLatency.code(), timeout)?.reply {
            WriteReply::LatencyMs(ms) => Ok(ms),
            other => {
                log::error!("StreamWriter: unexpected reply to latency query: {:?}", other);
                Err(StreamError::InvalidState)
            }
        }
    }

    /// Send an arbitrary command code and return the raw status
    ///
    /// A failing result code is returned inside the status rather than as an
    /// error.
    pub fn send_raw_command(
        &mut self,
        code: u32,
        timeout: Duration,
    ) -> StreamResult<WriteStatus> {
        self.round_trip(code, timeout)
    }

    /// Round trip that turns a failing result code into an error
    fn exchange(&mut self, code: u32, timeout: Duration) -> StreamResult<WriteStatus> {
        let status = self.round_trip(code, timeout)?;
        status.retval.into_result()?;
        Ok(status)
    }

    fn round_trip(&mut self, code: u32, timeout: Duration) -> StreamResult<WriteStatus> {
        // A reply left behind by an earlier timed-out call would be mistaken
        // for this one.
        while let Some(stale) = self.channels.status.read() {
            log::warn!("StreamWriter: discarding stale reply to {}", stale.reply_to);
        }

        if !self.channels.command.write(code) {
            log::error!("StreamWriter: command queue is full");
            return Err(StreamError::InvalidState);
        }
        self.channels.event_flag.wake(NOT_EMPTY);

        let Some(status) = self
            .channels
            .status
            .read_blocking(&self.channels.event_flag, NOT_FULL, timeout)
        else {
            log::warn!("StreamWriter: no reply to command {} within {:?}", code, timeout);
            return Err(StreamError::Timeout);
        };

        if status.reply_to != code {
            log::error!(
                "StreamWriter: reply to {} received for command {}",
                status.reply_to,
                code
            );
            return Err(StreamError::InvalidState);
        }
        Ok(status)
    }
}
