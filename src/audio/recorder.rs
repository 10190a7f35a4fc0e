//! Audio capture functionality
//!
//! Wraps a CPAL input stream behind a blocking "read one buffer" interface.
//! The driver callback converts whatever sample format the device delivers to
//! signed 16-bit PCM and hands it to the control loop over a bounded channel.

use super::format::StreamFormat;
use crate::error::SnoopError;
use crate::shutdown::Shutdown;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Interleaved 16-bit PCM samples
pub type Chunk = Vec<i16>;

/// How long a blocking read waits before re-checking for shutdown
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback buffers queued between the driver and the control loop
const CALLBACK_QUEUE_DEPTH: usize = 64;

/// Failure while reading from a capture source
///
/// Overruns are transient: audio was lost but the stream is still running.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("input overflow, {0} buffer(s) dropped")]
    Overrun(usize),
    #[error("{0}")]
    Stream(String),
}

impl From<SourceError> for SnoopError {
    fn from(error: SourceError) -> Self {
        SnoopError::Stream(error.to_string())
    }
}

/// Anything that produces fixed-size PCM buffers for the capture loop
pub trait AudioSource {
    fn format(&self) -> StreamFormat;

    /// Block until the next full buffer is available
    ///
    /// Returns `Ok(None)` once the source has ended or shutdown was requested.
    fn read_chunk(&mut self) -> Result<Option<Chunk>, SourceError>;
}

/// Information about an available audio input device
#[derive(Debug, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub default_channels: Option<u16>,
    pub default_sample_rate: Option<u32>,
    pub supported_formats: Vec<String>,
}

/// List all available audio input devices
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>, SnoopError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| SnoopError::Device(e.to_string()))?;
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut device_infos = Vec::new();

    for device in devices {
        let name = device.name().unwrap_or("Unknown Device".to_string());
        let is_default = default_name.as_deref() == Some(name.as_str());

        let default_config = device.default_input_config().ok();

        let mut supported_formats: Vec<String> = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.sample_format().to_string()).collect())
            .unwrap_or_default();
        supported_formats.sort();
        supported_formats.dedup();

        device_infos.push(AudioDeviceInfo {
            name,
            is_default,
            default_channels: default_config.as_ref().map(|c| c.channels()),
            default_sample_rate: default_config.as_ref().map(|c| c.sample_rate().0),
            supported_formats,
        });
    }

    Ok(device_infos)
}

fn find_input_device(preferred: Option<&str>) -> Result<Device, SnoopError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => host
            .input_devices()
            .map_err(|e| SnoopError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SnoopError::Device(format!("input device '{name}' not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| SnoopError::Device("No default input device found".to_string())),
    }
}

/// Control-loop end of the callback channel
///
/// Callback buffers arrive in whatever size the driver picks. This regroups
/// them into buffers of exactly `chunk_samples` samples and turns dropped
/// callbacks and driver errors into [`SourceError`]s.
struct ChunkAssembler {
    samples: Receiver<Chunk>,
    errors: Receiver<String>,
    dropped: Arc<AtomicUsize>,
    pending: Vec<i16>,
    chunk_samples: usize,
    shutdown: Shutdown,
}

impl ChunkAssembler {
    fn new(
        samples: Receiver<Chunk>,
        errors: Receiver<String>,
        dropped: Arc<AtomicUsize>,
        chunk_samples: usize,
        shutdown: Shutdown,
    ) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            samples,
            errors,
            dropped,
            pending: Vec::with_capacity(chunk_samples * 2),
            chunk_samples,
            shutdown,
        }
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, SourceError> {
        loop {
            if self.pending.len() >= self.chunk_samples {
                let rest = self.pending.split_off(self.chunk_samples);
                return Ok(Some(std::mem::replace(&mut self.pending, rest)));
            }

            let dropped = self.dropped.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                return Err(SourceError::Overrun(dropped));
            }

            if let Ok(message) = self.errors.try_recv() {
                return Err(SourceError::Stream(message));
            }

            if self.shutdown.requested() {
                return Ok(None);
            }

            match self.samples.recv_timeout(POLL_INTERVAL) {
                Ok(samples) => self.pending.extend_from_slice(&samples),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SourceError::Stream("input stream closed".to_string()));
                }
            }
        }
    }
}

/// Driver-callback end of the channel: convert and hand off without blocking
fn deliver<T>(data: &[T], samples: &Sender<Chunk>, dropped: &AtomicUsize)
where
    T: SizedSample,
    i16: cpal::FromSample<T>,
{
    let converted: Chunk = data.iter().map(|&s| s.to_sample::<i16>()).collect();
    match samples.try_send(converted) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Live capture from a CPAL input device
///
/// The stream is paused and released when this value is dropped.
pub struct InputStream {
    stream: cpal::Stream,
    chunks: ChunkAssembler,
    format: StreamFormat,
}

impl InputStream {
    /// Open the named (or default) input device with its default channel
    /// count and sample rate and start capturing
    pub fn open(
        device_name: Option<&str>,
        chunk_frames: usize,
        shutdown: Shutdown,
    ) -> Result<Self, SnoopError> {
        let device = find_input_device(device_name)?;
        let default_config = device
            .default_input_config()
            .map_err(|e| SnoopError::Device(e.to_string()))?;
        let sample_format = default_config.sample_format();
        let config: StreamConfig = default_config.config();
        let format = StreamFormat::pcm16(config.channels, config.sample_rate.0);

        info!(
            "Input device: {} ({}, native {})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            format,
            sample_format
        );

        let (sample_tx, sample_rx) = bounded(CALLBACK_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded(1);
        let dropped = Arc::new(AtomicUsize::new(0));

        let stream = match sample_format {
            SampleFormat::I8 => build_input::<i8>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::I16 => build_input::<i16>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::I32 => build_input::<i32>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::U8 => build_input::<u8>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::U16 => build_input::<u16>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::U32 => build_input::<u32>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::F32 => build_input::<f32>(&device, &config, sample_tx, error_tx, &dropped),
            SampleFormat::F64 => build_input::<f64>(&device, &config, sample_tx, error_tx, &dropped),
            other => {
                return Err(SnoopError::UnsupportedFormat(format!(
                    "input sample format {other}"
                )));
            }
        }
        .map_err(|e| SnoopError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SnoopError::Device(e.to_string()))?;

        let chunk_samples = format.chunk_samples(chunk_frames);
        Ok(Self {
            stream,
            chunks: ChunkAssembler::new(sample_rx, error_rx, dropped, chunk_samples, shutdown),
            format,
        })
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Sender<Chunk>,
    errors: Sender<String>,
    dropped: &Arc<AtomicUsize>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: cpal::FromSample<T>,
{
    let dropped = dropped.clone();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| deliver(data, &samples, &dropped),
        move |err| {
            // Only the first error matters, the loop stops on it
            let _ = errors.try_send(err.to_string());
        },
        None,
    )
}

impl AudioSource for InputStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read_chunk(&mut self) -> Result<Option<Chunk>, SourceError> {
        self.chunks.next_chunk()
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            debug!("Failed to pause input stream: {}", e);
        }
        debug!("Input stream released");
    }
}
