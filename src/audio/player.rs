//! Audio playback through a CPAL output stream
//!
//! Writes block while the driver is behind, so a caller streaming a file
//! chunk by chunk never holds more than a few buffers in memory.

use super::format::StreamFormat;
use super::recorder::POLL_INTERVAL;
use crate::error::SnoopError;
use crate::shutdown::Shutdown;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded};
use log::debug;
use std::collections::VecDeque;

/// Chunks queued ahead of the driver
const PLAYBACK_QUEUE_DEPTH: usize = 4;

/// Anything that accepts interleaved PCM for playback
pub trait AudioSink {
    /// Queue samples, blocking while the sink is full
    fn write(&mut self, samples: &[i16]) -> Result<(), SnoopError>;

    /// Block until everything written so far has been played
    fn drain(&mut self) -> Result<(), SnoopError>;
}

fn find_output_device(preferred: Option<&str>) -> Result<Device, SnoopError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => host
            .output_devices()
            .map_err(|e| SnoopError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SnoopError::Device(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| SnoopError::Device("No default output device found".to_string())),
    }
}

/// Live playback on a CPAL output device
///
/// The stream is paused and released when this value is dropped.
pub struct OutputStream {
    stream: cpal::Stream,
    samples: Option<Sender<Vec<i16>>>,
    finished: Receiver<()>,
    errors: Receiver<String>,
    shutdown: Shutdown,
}

impl OutputStream {
    /// Open the named (or default) output device with the channel count and
    /// sample rate of `format`
    pub fn open(
        device_name: Option<&str>,
        format: StreamFormat,
        shutdown: Shutdown,
    ) -> Result<Self, SnoopError> {
        let device = find_output_device(device_name)?;
        let sample_format = device
            .default_output_config()
            .map_err(|e| SnoopError::Device(e.to_string()))?
            .sample_format();
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!("Opening output stream: {} (device {})", format, sample_format);

        let (sample_tx, sample_rx) = bounded(PLAYBACK_QUEUE_DEPTH);
        let (finished_tx, finished_rx) = bounded(1);
        let (error_tx, error_rx) = bounded(1);

        let stream = match sample_format {
            SampleFormat::I16 => build_output::<i16>(&device, &config, sample_rx, finished_tx, error_tx),
            SampleFormat::I32 => build_output::<i32>(&device, &config, sample_rx, finished_tx, error_tx),
            SampleFormat::U16 => build_output::<u16>(&device, &config, sample_rx, finished_tx, error_tx),
            SampleFormat::F32 => build_output::<f32>(&device, &config, sample_rx, finished_tx, error_tx),
            SampleFormat::F64 => build_output::<f64>(&device, &config, sample_rx, finished_tx, error_tx),
            other => {
                return Err(SnoopError::UnsupportedFormat(format!(
                    "output sample format {other}"
                )));
            }
        }
        .map_err(|e| SnoopError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SnoopError::Device(e.to_string()))?;

        Ok(Self {
            stream,
            samples: Some(sample_tx),
            finished: finished_rx,
            errors: error_rx,
            shutdown,
        })
    }

    fn check_stream(&self) -> Result<(), SnoopError> {
        match self.errors.try_recv() {
            Ok(message) => Err(SnoopError::Stream(message)),
            Err(_) => Ok(()),
        }
    }
}

/// Driver-callback end of the playback channel
///
/// Fills each device buffer from queued chunks, padding with silence. Once the
/// writer has hung up and everything queued was handed to the device,
/// `finished` fires on the following callback, after that last buffer played.
struct PlaybackFeed {
    samples: Receiver<Vec<i16>>,
    finished: Sender<()>,
    queued: VecDeque<i16>,
    closed: bool,
}

impl PlaybackFeed {
    fn new(samples: Receiver<Vec<i16>>, finished: Sender<()>) -> Self {
        Self {
            samples,
            finished,
            queued: VecDeque::new(),
            closed: false,
        }
    }

    fn fill<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<i16>,
    {
        if self.closed && self.queued.is_empty() {
            let _ = self.finished.try_send(());
        }

        for slot in data.iter_mut() {
            if self.queued.is_empty() && !self.closed {
                match self.samples.try_recv() {
                    Ok(chunk) => self.queued.extend(chunk),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => self.closed = true,
                }
            }
            *slot = match self.queued.pop_front() {
                Some(sample) => sample.to_sample::<T>(),
                None => T::EQUILIBRIUM,
            };
        }
    }
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Receiver<Vec<i16>>,
    finished: Sender<()>,
    errors: Sender<String>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut feed = PlaybackFeed::new(samples, finished);

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| feed.fill(data),
        move |err| {
            let _ = errors.try_send(err.to_string());
        },
        None,
    )
}

impl AudioSink for OutputStream {
    fn write(&mut self, samples: &[i16]) -> Result<(), SnoopError> {
        let Some(sender) = self.samples.as_ref() else {
            return Err(SnoopError::Stream("output stream already drained".to_string()));
        };

        let mut chunk = samples.to_vec();
        loop {
            self.check_stream()?;
            if self.shutdown.requested() {
                return Ok(());
            }
            match sender.send_timeout(chunk, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(unsent)) => chunk = unsent,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(SnoopError::Stream("output stream closed".to_string()));
                }
            }
        }
    }

    fn drain(&mut self) -> Result<(), SnoopError> {
        // Closing the channel tells the callback no more audio is coming
        if self.samples.take().is_none() {
            return Ok(());
        }
        loop {
            self.check_stream()?;
            if self.shutdown.requested() {
                return Ok(());
            }
            match self.finished.recv_timeout(POLL_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            debug!("Failed to pause output stream: {}", e);
        }
        debug!("Output stream released");
    }
}
