//! Sequential playback of recorded segments

use crate::audio::{AudioSink, StreamFormat};
use crate::error::SnoopError;
use crate::shutdown::Shutdown;
use hound::WavReader;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::{Path, PathBuf};

/// Play `paths` one after another
///
/// `open_sink` is called once per file with that file's format; the sink is
/// drained and dropped before the next file is opened. Returns the number of
/// files played to completion.
pub fn play_recordings<K, F>(
    paths: &[PathBuf],
    chunk_frames: usize,
    shutdown: &Shutdown,
    mut open_sink: F,
) -> Result<usize, SnoopError>
where
    K: AudioSink,
    F: FnMut(StreamFormat) -> Result<K, SnoopError>,
{
    let mut played = 0;
    for path in paths {
        if shutdown.requested() {
            break;
        }
        println!("Playing file {}", path.display());
        if play_file(path, chunk_frames, shutdown, &mut open_sink)? {
            played += 1;
        }
    }
    Ok(played)
}

/// Stream one file into a fresh sink. Returns false if interrupted part way
fn play_file<K, F>(
    path: &Path,
    chunk_frames: usize,
    shutdown: &Shutdown,
    open_sink: &mut F,
) -> Result<bool, SnoopError>
where
    K: AudioSink,
    F: FnMut(StreamFormat) -> Result<K, SnoopError>,
{
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample > 16 {
        return Err(SnoopError::UnsupportedFormat(format!(
            "{}: {}-bit {:?} samples",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        )));
    }
    debug!("{}: {}", path.display(), StreamFormat::from_wav_spec(spec));

    // hound yields narrower samples at their stored scale, e.g. -128..=127 for
    // 8-bit files. Sinks take full-scale 16-bit PCM.
    let shift = u32::from(16 - spec.bits_per_sample);
    let format = StreamFormat::pcm16(spec.channels, spec.sample_rate);

    let mut sink = open_sink(format)?;

    let pb = ProgressBar::new(u64::from(reader.duration()));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {elapsed_precise} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .progress_chars("#>-"),
    );

    let chunk_samples = format.chunk_samples(chunk_frames.max(1));
    let channels = usize::from(format.channels.max(1));
    let mut samples = reader.samples::<i16>();

    loop {
        if shutdown.requested() {
            pb.abandon();
            return Ok(false);
        }
        let chunk = samples
            .by_ref()
            .take(chunk_samples)
            .map(|sample| sample.map(|s| s << shift))
            .collect::<Result<Vec<i16>, _>>()?;
        if chunk.is_empty() {
            break;
        }
        sink.write(&chunk)?;
        pb.inc((chunk.len() / channels) as u64);
    }

    sink.drain()?;
    pb.finish_and_clear();
    Ok(!shutdown.requested())
}
