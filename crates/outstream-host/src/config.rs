//! Host configuration
//!
//! One YAML file with three sections: stream geometry and volume, the device
//! candidates probed at startup, and what the driver plays. Every section
//! and field is optional; anything left out takes its default.

use anyhow::{Context, Result};
use outstream_core::{AudioConfig, SampleFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Stream geometry and volume
    pub stream: StreamConfig,
    /// Output devices to look for at startup
    pub devices: DevicesConfig,
    /// What the driver plays and how often it reports
    pub playback: PlaybackConfig,
}

/// Stream configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    /// Frames per data queue (and per write)
    pub frames_per_buffer: u32,
    pub master_volume: f32,
    pub volume_left: f32,
    pub volume_right: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channel_count: 2,
            format: SampleFormat::Pcm16,
            frames_per_buffer: 960, // 20ms at 48kHz
            master_volume: 1.0,
            volume_left: 1.0,
            volume_right: 1.0,
        }
    }
}

impl StreamConfig {
    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            format: self.format,
            frame_count: u64::from(self.frames_per_buffer),
        }
    }
}

/// One device the host may route to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCandidate {
    /// Entry name looked up under the probe root
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub address: String,
}

/// Device section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Directory whose entries mark present devices
    pub probe_root: PathBuf,
    /// Checked in order; the first present one is used
    pub candidates: Vec<DeviceCandidate>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            probe_root: PathBuf::from("/sys/class/sound"),
            candidates: vec![
                DeviceCandidate {
                    name: "card0".to_string(),
                    device_type: "speaker".to_string(),
                    address: String::new(),
                },
                DeviceCandidate {
                    name: "card1".to_string(),
                    device_type: "bus".to_string(),
                    address: "media".to_string(),
                },
            ],
        }
    }
}

/// Playback section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub duration_ms: u64,
    /// Sine tone frequency; 0 plays silence
    pub tone_hz: f32,
    pub report_interval_ms: u64,
    /// How long to wait for each status reply
    pub status_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            duration_ms: 2000,
            tone_hz: 440.0,
            report_interval_ms: 250,
            status_timeout_ms: 1000,
        }
    }
}

/// `outstream/config.yaml` under the platform config directory
///
/// Falls back to `./outstream.yaml` when the platform has no config directory.
pub fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("outstream").join("config.yaml"),
        None => PathBuf::from("outstream.yaml"),
    }
}

/// Parse the host config at `path`; `Ok(None)` if there is no file
pub fn read_config(path: &Path) -> Result<Option<HostConfig>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Cannot read {}", path.display())),
    };
    let config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Malformed host config {}", path.display()))?;
    Ok(Some(config))
}

/// Host config for this run
///
/// A missing or unreadable file is not fatal: playback runs on defaults.
pub fn load_config(path: &Path) -> HostConfig {
    match read_config(path) {
        Ok(Some(config)) => {
            log::info!(
                "HostConfig: {} ({} Hz x{} {:?}, {} frames per buffer, {} device candidates)",
                path.display(),
                config.stream.sample_rate,
                config.stream.channel_count,
                config.stream.format,
                config.stream.frames_per_buffer,
                config.devices.candidates.len()
            );
            config
        }
        Ok(None) => {
            log::info!("HostConfig: no file at {}, using defaults", path.display());
            HostConfig::default()
        }
        Err(e) => {
            log::warn!("HostConfig: {:#}, using defaults", e);
            HostConfig::default()
        }
    }
}

/// Write `config` as YAML, creating the config directory on first save
pub fn save_config(config: &HostConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    let yaml = serde_yaml::to_string(config).context("Cannot encode host config")?;
    std::fs::write(path, yaml).with_context(|| format!("Cannot write {}", path.display()))?;
    log::info!("HostConfig: saved to {}", path.display());
    Ok(())
}
