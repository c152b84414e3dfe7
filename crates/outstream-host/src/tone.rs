//! Test signal for the playback driver

use std::f32::consts::TAU;

use outstream_core::{AudioConfig, SampleFormat};

/// Sine generator that keeps its phase across buffers
pub struct ToneGenerator {
    config: AudioConfig,
    step: f32,
    phase: f32,
    amplitude: f32,
}

impl ToneGenerator {
    /// `frequency_hz` of 0 produces silence
    pub fn new(config: AudioConfig, frequency_hz: f32) -> Self {
        let step = if frequency_hz > 0.0 && config.sample_rate > 0 {
            TAU * frequency_hz / config.sample_rate as f32
        } else {
            0.0
        };
        Self {
            config,
            step,
            phase: 0.0,
            amplitude: if step > 0.0 { 0.25 } else { 0.0 },
        }
    }

    /// Fill `frames` interleaved frames in the stream's sample format
    pub fn next_buffer(&mut self, frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames * self.config.frame_size());
        for _ in 0..frames {
            let sample = self.amplitude * self.phase.sin();
            self.phase = (self.phase + self.step) % TAU;
            for _ in 0..self.config.channel_count {
                encode(self.config.format, sample, &mut out);
            }
        }
        out
    }
}

fn encode(format: SampleFormat, sample: f32, out: &mut Vec<u8>) {
    let s = sample.clamp(-1.0, 1.0);
    match format {
        SampleFormat::Pcm8 => out.push((s * i8::MAX as f32) as i8 as u8 ^ 0x80),
        SampleFormat::Pcm16 => out.extend_from_slice(&((s * i16::MAX as f32) as i16).to_le_bytes()),
        SampleFormat::Pcm24Packed => {
            let v = (s * 8_388_607.0) as i32;
            out.extend_from_slice(&v.to_le_bytes()[..3]);
        }
        SampleFormat::Pcm32 => {
            let v = (f64::from(s) * f64::from(i32::MAX)) as i32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::Float => out.extend_from_slice(&s.to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_length_matches_frame_size() {
        for format in [
            SampleFormat::Pcm8,
            SampleFormat::Pcm16,
            SampleFormat::Pcm24Packed,
            SampleFormat::Pcm32,
            SampleFormat::Float,
        ] {
            let config = AudioConfig {
                format,
                ..Default::default()
            };
            let frame_size = config.frame_size();
            let mut tone = ToneGenerator::new(config, 440.0);
            assert_eq!(tone.next_buffer(100).len(), 100 * frame_size);
        }
    }

    #[test]
    fn test_zero_frequency_is_silence() {
        let mut tone = ToneGenerator::new(AudioConfig::default(), 0.0);
        assert!(tone.next_buffer(64).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_is_not_silent_and_channels_match() {
        let mut tone = ToneGenerator::new(AudioConfig::default(), 1000.0);
        let buf = tone.next_buffer(48);
        let samples: Vec<i16> = buf
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert!(samples.iter().any(|&s| s != 0));
        for frame in samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }
}
