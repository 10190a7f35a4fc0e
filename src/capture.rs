//! Loudness-gated segment capture
//!
//! Every buffer read from the input is classified as loud or quiet. While
//! idle, a loud buffer opens a new segment file which first receives the
//! pre-roll ring (the buffers just before the onset). While recording, every
//! buffer is appended until the post-roll window, the last M loudness flags,
//! holds no loud flag at all. Both windows are updated for every buffer
//! regardless of state.

use crate::audio::{AudioSource, Chunk, RingBuffer, SourceError, StreamFormat, is_loud, loudness_db};
use crate::config::{RecorderConfig, WindowSizes};
use crate::error::SnoopError;
use crate::recordings::segment_file_name;
use crate::shutdown::Shutdown;
use hound::WavWriter;
use jiff::Zoned;
use log::{debug, info, trace, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Source of segment start times
pub trait Clock {
    fn now(&self) -> Zoned;
}

/// Local wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Zoned {
        Zoned::now()
    }
}

/// An open segment file
///
/// Dropping it without [`SegmentWriter::finalize`] still writes the WAV
/// header (hound finalizes on drop) but swallows any error doing so.
pub struct SegmentWriter {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
}

impl SegmentWriter {
    pub fn create(path: &Path, format: StreamFormat) -> Result<Self, SnoopError> {
        let writer = WavWriter::create(path, format.wav_spec())?;
        debug!("Opened segment {}", path.display());
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn write_chunk(&mut self, samples: &[i16]) -> Result<(), SnoopError> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file, returning its path
    pub fn finalize(self) -> Result<PathBuf, SnoopError> {
        self.writer.finalize()?;
        debug!("Closed segment {}", self.path.display());
        Ok(self.path)
    }
}

enum CaptureState {
    Idle,
    Recording(SegmentWriter),
}

/// State change caused by one buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    None,
    Started(PathBuf),
    Stopped(PathBuf),
}

/// The capture state machine, independent of where buffers come from
pub struct SegmentCapture<C: Clock> {
    threshold_db: f64,
    output_dir: PathBuf,
    format: StreamFormat,
    pre_roll: RingBuffer<Chunk>,
    loudness: RingBuffer<bool>,
    state: CaptureState,
    clock: C,
}

impl<C: Clock> SegmentCapture<C> {
    pub fn new(config: &RecorderConfig, format: StreamFormat, windows: WindowSizes, clock: C) -> Self {
        Self {
            threshold_db: config.threshold_db,
            output_dir: config.output_dir.clone(),
            format,
            pre_roll: RingBuffer::new(windows.pre_roll),
            loudness: RingBuffer::new(windows.post_roll),
            state: CaptureState::Idle,
            clock,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, CaptureState::Recording(_))
    }

    /// Path of the segment currently being written
    pub fn current_segment(&self) -> Option<&Path> {
        match &self.state {
            CaptureState::Recording(writer) => Some(writer.path()),
            CaptureState::Idle => None,
        }
    }

    fn quiet_for_some_time(&self) -> bool {
        !self.loudness.iter().any(|&loud| loud)
    }

    /// Feed one buffer through the state machine
    pub fn process(&mut self, chunk: Chunk) -> Result<Transition, SnoopError> {
        let loud = is_loud(&chunk, self.threshold_db);
        trace!("buffer loudness {:.1} dB (loud: {})", loudness_db(&chunk), loud);

        let mut transition = Transition::None;

        if loud && !self.is_recording() {
            let path = self.output_dir.join(segment_file_name(&self.clock.now()));
            let mut writer = SegmentWriter::create(&path, self.format)?;
            if !self.pre_roll.is_empty() {
                debug!("Writing {} buffer(s) of pre-roll", self.pre_roll.len());
            }
            for earlier in self.pre_roll.iter() {
                writer.write_chunk(earlier)?;
            }
            self.state = CaptureState::Recording(writer);
            transition = Transition::Started(path);
        }

        self.loudness.push(loud);

        if let CaptureState::Recording(writer) = &mut self.state {
            writer.write_chunk(&chunk)?;
        }
        self.pre_roll.push(chunk);

        if self.is_recording() && self.quiet_for_some_time() {
            if let Some(path) = self.finish()? {
                transition = Transition::Stopped(path);
            }
        }

        Ok(transition)
    }

    /// Close the open segment, if any
    pub fn finish(&mut self) -> Result<Option<PathBuf>, SnoopError> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Recording(writer) => writer.finalize().map(Some),
            CaptureState::Idle => Ok(None),
        }
    }
}

/// What happened during a capture session
#[derive(Debug, Default)]
pub struct CaptureSummary {
    pub chunks: usize,
    pub overruns: usize,
    pub segments: Vec<PathBuf>,
}

/// Read buffers from `source` until it ends, shutdown is requested or a
/// non-transient error occurs
///
/// Any open segment is closed before returning, on every path.
pub fn run_capture<S, C>(
    source: &mut S,
    capture: &mut SegmentCapture<C>,
    shutdown: &Shutdown,
) -> Result<CaptureSummary, SnoopError>
where
    S: AudioSource,
    C: Clock,
{
    let mut summary = CaptureSummary::default();

    let outcome = loop {
        if shutdown.requested() {
            if let Some(path) = capture.current_segment() {
                info!("Interrupted while recording {}", path.display());
            }
            break Ok(());
        }

        let chunk = match source.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(SourceError::Overrun(dropped)) => {
                warn!(
                    "Problem reading from stream, probably input overflow ({} buffer(s) dropped). Ignoring...",
                    dropped
                );
                summary.overruns += 1;
                continue;
            }
            Err(e) => break Err(SnoopError::from(e)),
        };

        summary.chunks += 1;
        match capture.process(chunk) {
            Ok(Transition::Started(path)) => {
                println!("Recording...");
                info!("Started segment {}", path.display());
                summary.segments.push(path);
            }
            Ok(Transition::Stopped(path)) => {
                println!("Done recording.");
                info!("Finished segment {}", path.display());
            }
            Ok(Transition::None) => {}
            Err(e) => break Err(e),
        }
    };

    let closed = capture.finish();
    if let Ok(Some(path)) = &closed {
        info!("Closed segment {} on exit", path.display());
    }

    outcome?;
    closed?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::ToSpan;
    use jiff::civil::date;
    use std::cell::Cell;
    use std::collections::VecDeque;

    const FRAMES: usize = 4;
    const LOUD: i16 = 10_000;
    const QUIET: i16 = 0;

    /// Clock that advances one second per call so segment names never collide
    struct StepClock {
        next: Cell<i64>,
    }

    impl StepClock {
        fn new() -> Self {
            Self { next: Cell::new(0) }
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Zoned {
            let seconds = self.next.get();
            self.next.set(seconds + 1);
            date(2024, 1, 1)
                .at(12, 0, 0, 0)
                .in_tz("UTC")
                .unwrap()
                .checked_add(seconds.seconds())
                .unwrap()
        }
    }

    /// Source replaying a fixed script of reads
    struct ScriptedSource {
        reads: VecDeque<Result<Chunk, SourceError>>,
    }

    impl ScriptedSource {
        /// Buffers tagged by index: sample value encodes index, sign encodes loudness
        fn from_pattern(pattern: &str) -> Self {
            let reads = pattern
                .chars()
                .enumerate()
                .map(|(i, c)| Ok(tagged_chunk(i, c == 'L')))
                .collect();
            Self { reads }
        }
    }

    impl AudioSource for ScriptedSource {
        fn format(&self) -> StreamFormat {
            StreamFormat::pcm16(1, 8000)
        }

        fn read_chunk(&mut self) -> Result<Option<Chunk>, SourceError> {
            self.reads.pop_front().transpose()
        }
    }

    /// A buffer whose first sample identifies it. Quiet buffers stay below 1 dB.
    fn tagged_chunk(index: usize, loud: bool) -> Chunk {
        let mut chunk = vec![if loud { LOUD } else { QUIET }; FRAMES];
        if !loud {
            chunk[0] = 1;
        }
        chunk[1] = index as i16;
        chunk
    }

    fn capture_in(dir: &Path, pre_roll: usize, post_roll: usize) -> SegmentCapture<StepClock> {
        let config = RecorderConfig {
            threshold_db: 45.0,
            output_dir: dir.to_path_buf(),
            ..RecorderConfig::default()
        };
        SegmentCapture::new(
            &config,
            StreamFormat::pcm16(1, 8000),
            WindowSizes { pre_roll, post_roll },
            StepClock::new(),
        )
    }

    /// Indices of the buffers stored in a segment file, in file order
    fn buffer_indices(path: &Path) -> Vec<i16> {
        let mut reader = hound::WavReader::open(path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len() % FRAMES, 0);
        samples.chunks(FRAMES).map(|c| c[1]).collect()
    }

    fn wav_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_silence_never_opens_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 2, 3);
        let mut source = ScriptedSource::from_pattern("qqqqqqqq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert_eq!(summary.chunks, 8);
        assert!(summary.segments.is_empty());
        assert!(wav_files(dir.path()).is_empty());
    }

    #[test]
    fn test_segment_has_pre_roll_and_post_roll() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 2, 3);
        //                                        0123456789012
        let mut source = ScriptedSource::from_pattern("qqqqLLqqqqqqq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert_eq!(summary.segments.len(), 1);
        // Two buffers of pre-roll, the loud run, then three quiet buffers
        assert_eq!(buffer_indices(&summary.segments[0]), vec![2, 3, 4, 5, 6, 7, 8]);
        assert!(!capture.is_recording());
    }

    #[test]
    fn test_pre_roll_limited_by_available_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 5, 2);
        let mut source = ScriptedSource::from_pattern("qLqqq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert_eq!(buffer_indices(&summary.segments[0]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_loud_onset_on_first_buffer_has_empty_pre_roll() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 3, 1);
        let mut source = ScriptedSource::from_pattern("Lqq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert_eq!(buffer_indices(&summary.segments[0]), vec![0, 1]);
    }

    #[test]
    fn test_loud_blip_inside_post_roll_extends_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 1, 3);
        //                                        0123456789
        let mut source = ScriptedSource::from_pattern("qLqqLqqqqq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        // The second loud buffer arrives before three quiet ones, so one file
        assert_eq!(summary.segments.len(), 1);
        assert_eq!(buffer_indices(&summary.segments[0]), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_separate_episodes_make_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 1, 2);
        //                                        01234567
        let mut source = ScriptedSource::from_pattern("LqqqqLqq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert_eq!(summary.segments.len(), 2);
        assert_eq!(wav_files(dir.path()), summary.segments);
        assert_eq!(buffer_indices(&summary.segments[0]), vec![0, 1, 2]);
        assert_eq!(buffer_indices(&summary.segments[1]), vec![4, 5, 6, 7]);
        assert!(summary.segments[0].ends_with("rec_2024_01_01_12_00_00.wav"));
        assert!(summary.segments[1].ends_with("rec_2024_01_01_12_00_01.wav"));
    }

    #[test]
    fn test_second_onset_while_recording_keeps_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 0, 4);

        let first = capture.process(tagged_chunk(0, true)).unwrap();
        let Transition::Started(path) = first else {
            panic!("expected a new segment, got {:?}", first);
        };
        assert_eq!(capture.process(tagged_chunk(1, true)).unwrap(), Transition::None);
        assert_eq!(capture.process(tagged_chunk(2, false)).unwrap(), Transition::None);
        assert_eq!(capture.process(tagged_chunk(3, true)).unwrap(), Transition::None);
        assert_eq!(capture.current_segment(), Some(path.as_path()));

        assert_eq!(capture.finish().unwrap(), Some(path.clone()));
        assert_eq!(wav_files(dir.path()), vec![path.clone()]);
        assert_eq!(buffer_indices(&path), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_open_segment_closed_when_source_ends() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 1, 10);
        let mut source = ScriptedSource::from_pattern("qLLq");

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert!(!capture.is_recording());
        // Header was finalized, so the file reads back completely
        assert_eq!(buffer_indices(&summary.segments[0]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_overrun_does_not_interrupt_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 0, 2);
        let mut source = ScriptedSource {
            reads: VecDeque::from(vec![
                Ok(tagged_chunk(0, true)),
                Err(SourceError::Overrun(1)),
                Ok(tagged_chunk(1, true)),
                Ok(tagged_chunk(2, false)),
                Ok(tagged_chunk(3, false)),
            ]),
        };

        let summary = run_capture(&mut source, &mut capture, &Shutdown::manual()).unwrap();

        assert_eq!(summary.overruns, 1);
        assert_eq!(summary.segments.len(), 1);
        assert_eq!(buffer_indices(&summary.segments[0]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_stream_failure_stops_and_closes_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 0, 5);
        let mut source = ScriptedSource {
            reads: VecDeque::from(vec![
                Ok(tagged_chunk(0, true)),
                Err(SourceError::Stream("device unplugged".to_string())),
                Ok(tagged_chunk(1, true)),
            ]),
        };

        let result = run_capture(&mut source, &mut capture, &Shutdown::manual());

        assert!(matches!(result, Err(SnoopError::Stream(_))));
        assert!(!capture.is_recording());
        let files = wav_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(buffer_indices(&files[0]), vec![0]);
    }

    #[test]
    fn test_shutdown_stops_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(dir.path(), 1, 1);
        let mut source = ScriptedSource::from_pattern("LLLL");
        let shutdown = Shutdown::manual();
        shutdown.request();

        let summary = run_capture(&mut source, &mut capture, &shutdown).unwrap();

        assert_eq!(summary.chunks, 0);
        assert_eq!(source.reads.len(), 4);
    }

    #[test]
    fn test_segment_header_matches_stream_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            output_dir: dir.path().to_path_buf(),
            ..RecorderConfig::default()
        };
        let format = StreamFormat::pcm16(2, 44100);
        let mut capture = SegmentCapture::new(
            &config,
            format,
            WindowSizes { pre_roll: 1, post_roll: 1 },
            StepClock::new(),
        );

        capture.process(vec![LOUD; 8]).unwrap();
        let path = capture.finish().unwrap().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(StreamFormat::from_wav_spec(reader.spec()), format);
        assert_eq!(reader.len(), 8);
    }

    #[test]
    fn test_missing_output_dir_fails_on_onset() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture_in(&dir.path().join("gone"), 1, 1);

        assert_eq!(capture.process(tagged_chunk(0, false)).unwrap(), Transition::None);
        assert!(capture.process(tagged_chunk(1, true)).is_err());
        assert!(!capture.is_recording());
    }
}
