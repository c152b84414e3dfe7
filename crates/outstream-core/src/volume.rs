//! Master and stream volume with a lock-free effective value
//!
//! Setters serialize on one mutex so that a master change and a stream change
//! racing each other cannot lose an update when recomputing the product. The
//! write thread only ever loads the effective value from an atomic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{StreamError, StreamResult};

#[derive(Debug, Clone, Copy)]
struct Levels {
    master: f32,
    stream: f32,
}

/// Volume state of one output stream
#[derive(Debug)]
pub struct VolumeState {
    levels: Mutex<Levels>,
    /// `f32` bits of master * stream
    effective: AtomicU32,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeState {
    /// Unity master and stream volume
    pub fn new() -> Self {
        Self {
            levels: Mutex::new(Levels {
                master: 1.0,
                stream: 1.0,
            }),
            effective: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Set the stream volume from a left/right pair
    ///
    /// The stream volume becomes the midpoint of the two channels.
    pub fn set_stream_volume(&self, left: f32, right: f32) -> StreamResult<()> {
        if !is_valid_level(left) || !is_valid_level(right) {
            log::warn!("set_stream_volume: rejected ({}, {})", left, right);
            return Err(StreamError::InvalidArguments);
        }
        let mut levels = self.levels.lock().unwrap_or_else(PoisonError::into_inner);
        levels.stream = (left + right) / 2.0;
        self.update_effective_locked(&levels);
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) -> StreamResult<()> {
        if !is_valid_level(volume) {
            log::warn!("set_master_volume: rejected {}", volume);
            return Err(StreamError::InvalidArguments);
        }
        let mut levels = self.levels.lock().unwrap_or_else(PoisonError::into_inner);
        levels.master = volume;
        self.update_effective_locked(&levels);
        Ok(())
    }

    /// Effective volume (lock-free)
    #[inline]
    pub fn effective(&self) -> f32 {
        f32::from_bits(self.effective.load(Ordering::Relaxed))
    }

    fn update_effective_locked(&self, levels: &Levels) {
        let effective = levels.master * levels.stream;
        self.effective.store(effective.to_bits(), Ordering::Relaxed);
    }
}

fn is_valid_level(v: f32) -> bool {
    !v.is_nan() && (0.0..=1.0).contains(&v)
}
