//! Core value types shared by the stream, the write thread and sinks

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ResultCode;

/// Largest frame size accepted by `prepare_for_writing` (bytes)
pub const MAX_FRAME_SIZE: u32 = 256;

/// Largest frame count accepted by `prepare_for_writing`
pub const MAX_FRAMES_COUNT: u32 = 1 << 20;

/// PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    Pcm8,
    #[default]
    Pcm16,
    /// 24-bit samples packed into 3 bytes
    Pcm24Packed,
    Pcm32,
    Float,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm8 => 1,
            SampleFormat::Pcm16 => 2,
            SampleFormat::Pcm24Packed => 3,
            SampleFormat::Pcm32 | SampleFormat::Float => 4,
        }
    }
}

/// Audio configuration of an output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    /// Hardware buffer length in frames
    pub frame_count: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channel_count: 2,
            format: SampleFormat::Pcm16,
            frame_count: 960,
        }
    }
}

impl AudioConfig {
    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.channel_count as usize * self.format.bytes_per_sample()
    }
}

/// Identifies the device a stream is routed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Device kind, e.g. "speaker" or "bus"
    pub device_type: String,
    /// Device specific address (card/port name, bus id)
    #[serde(default)]
    pub address: String,
}

impl DeviceAddress {
    pub fn new(device_type: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address.is_empty() {
            write!(f, "{}", self.device_type)
        } else {
            write!(f, "{}:{}", self.device_type, self.address)
        }
    }
}

/// Output stream I/O flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFlag {
    Primary,
    Fast,
    DeepBuffer,
    Direct,
    NonBlocking,
    HwAvSync,
}

/// Monotonic timestamp split into seconds and nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TimeSpec {
    pub sec: u64,
    pub nsec: u32,
}

impl TimeSpec {
    pub fn as_nanos(&self) -> u128 {
        self.sec as u128 * 1_000_000_000 + self.nsec as u128
    }
}

impl From<Duration> for TimeSpec {
    fn from(d: Duration) -> Self {
        Self {
            sec: d.as_secs(),
            nsec: d.subsec_nanos(),
        }
    }
}

/// Frames presented to the device and the time they were observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresentationPosition {
    pub frames: u64,
    pub timestamp: TimeSpec,
}

/// Commands the client sends to the write thread
///
/// On the command queue these travel as raw `u32` codes so that a tag this
/// side does not recognise still produces a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WriteCommand {
    /// Drain the data queue into the sink
    Write = 0,
    /// Ask the sink for its presentation position
    GetPresentationPosition = 1,
    /// Estimate the device latency
    GetLatency = 2,
}

impl WriteCommand {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for WriteCommand {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(WriteCommand::Write),
            1 => Ok(WriteCommand::GetPresentationPosition),
            2 => Ok(WriteCommand::GetLatency),
            other => Err(other),
        }
    }
}

/// Payload of a status reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteReply {
    #[default]
    None,
    /// Bytes consumed by the sink
    Written(u64),
    PresentationPosition(PresentationPosition),
    LatencyMs(u32),
}

/// Reply sent by the write thread for every command it reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteStatus {
    pub retval: ResultCode,
    /// Raw code of the command this status answers
    pub reply_to: u32,
    pub reply: WriteReply,
}

impl WriteStatus {
    pub fn ok(reply: WriteReply) -> Self {
        Self {
            retval: ResultCode::Ok,
            reply_to: 0,
            reply,
        }
    }

    pub fn failure(retval: ResultCode) -> Self {
        Self {
            retval,
            reply_to: 0,
            reply: WriteReply::None,
        }
    }
}
