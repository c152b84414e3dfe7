//! Outstream Host - drives an output stream end to end
//!
//! This is the main entry point for the playback driver. It:
//! 1. Loads the YAML config and resolves the output device
//! 2. Opens a stream backed by the null sink and prepares it for writing
//! 3. Plays a test tone (or silence), entering standby once midway
//! 4. Logs presentation positions from a separate polling thread
//!
//! ## Command line flags
//!
//! - `--config <path>`: Read configuration from `path` instead of the default
//! - `--write-config`: Save the effective configuration back and exit

mod config;
mod device;
mod tone;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use outstream_core::{DeviceAddress, NullSinkFactory, OutputFlag, StreamOut, StreamWriter};

use config::HostConfig;
use device::{resolve_devices, PathProbe};
use tone::ToneGenerator;

const IO_HANDLE: i32 = 1;

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = match args.iter().position(|arg| arg == "--config") {
        Some(i) => args
            .get(i + 1)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("--config needs a path"))?,
        None => config::default_config_path(),
    };
    let config = config::load_config(&config_path);

    if args.iter().any(|arg| arg == "--write-config") {
        return config::save_config(&config, &config_path);
    }

    log::info!("outstream-host starting up");
    play(&config)
}

fn play(config: &HostConfig) -> Result<()> {
    let devices = resolve_devices(
        &config.devices.candidates,
        &PathProbe::new(&config.devices.probe_root),
    );
    let device = match devices.into_iter().next() {
        Some(device) => device,
        None => {
            log::warn!("No configured device is present, falling back to speaker");
            DeviceAddress::new("speaker", "")
        }
    };

    let audio = config.stream.audio_config();
    let factory = Arc::new(NullSinkFactory::new());
    let stream = Arc::new(StreamOut::new(
        factory,
        IO_HANDLE,
        device.clone(),
        audio.clone(),
        vec![OutputFlag::Primary],
    ));
    if !stream.validate_device_address(&device) {
        bail!("Device {} is not accepted by the sink", device);
    }

    stream
        .set_master_volume(config.stream.master_volume)
        .context("Invalid master volume")?;
    stream
        .set_volume(config.stream.volume_left, config.stream.volume_right)
        .context("Invalid stream volume")?;

    let frame_size = u32::try_from(stream.frame_size()).context("Frame size out of range")?;
    let frames_per_buffer = config.stream.frames_per_buffer;
    let channels = stream
        .prepare_for_writing(frame_size, frames_per_buffer)
        .context("Failed to prepare stream for writing")?;
    let mut writer = StreamWriter::new(channels);
    log::debug!(
        "Write thread {:?} serving a {} byte data queue",
        writer.thread_id(),
        writer.data_capacity()
    );
    let timeout = Duration::from_millis(config.playback.status_timeout_ms);

    log::info!(
        "Playing {} ms to {} ({} Hz x{}, {} frames per buffer, volume {:.2})",
        config.playback.duration_ms,
        device,
        audio.sample_rate,
        audio.channel_count,
        frames_per_buffer,
        stream.effective_volume()
    );

    let running = Arc::new(AtomicBool::new(true));
    let reporter = spawn_reporter(
        stream.clone(),
        running.clone(),
        Duration::from_millis(config.playback.report_interval_ms.max(1)),
    )?;

    let total_frames = config.playback.duration_ms * u64::from(audio.sample_rate) / 1000;
    let buffers = total_frames.div_ceil(u64::from(frames_per_buffer));
    let mut tone = ToneGenerator::new(audio, config.playback.tone_hz);
    let mut written = 0u64;

    let result = (|| -> Result<()> {
        for i in 0..buffers {
            if i == buffers / 2 && i > 0 {
                log::info!("Entering standby midway ({} bytes written)", written);
                stream.standby().context("Standby failed")?;
                thread::sleep(Duration::from_millis(50));
            }
            let buffer = tone.next_buffer(frames_per_buffer as usize);
            written += writer.write(&buffer, timeout).context("Write failed")?;
        }

        let position = writer
            .presentation_position(timeout)
            .context("Position query failed")?;
        let latency = writer.latency(timeout).context("Latency query failed")?;
        log::info!(
            "Done: {} bytes written, {} frames presented, latency {} ms",
            written,
            position.frames,
            latency
        );
        Ok(())
    })();

    running.store(false, Ordering::Release);
    if reporter.join().is_err() {
        log::error!("Position reporter panicked");
    }
    stream.close().context("Failed to close stream")?;
    result
}

/// Poll the stream's position from outside the write thread
fn spawn_reporter(
    stream: Arc<StreamOut>,
    running: Arc<AtomicBool>,
    interval: Duration,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("outstream-position".to_string())
        .spawn(move || {
            while running.load(Ordering::Acquire) {
                match stream.get_presentation_position() {
                    Ok(position) => log::info!(
                        "Position: {} frames @ {}.{:09}",
                        position.frames,
                        position.timestamp.sec,
                        position.timestamp.nsec
                    ),
                    Err(e) => log::warn!("Position query failed: {}", e),
                }
                thread::sleep(interval);
            }
        })
        .context("Failed to spawn position reporter")
}
