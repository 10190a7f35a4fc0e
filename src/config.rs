use crate::recordings::DateSelector;
use std::path::PathBuf;

/// Loudness above which a buffer counts as sound (dB of raw 16-bit RMS)
pub const DEFAULT_THRESHOLD_DB: f64 = 45.0;

pub const DEFAULT_OUTPUT_DIR: &str = "./recorded_files/";

/// Frames per buffer read from the input device
pub const DEFAULT_CHUNK_FRAMES: usize = 8192;
pub const MAX_CHUNK_FRAMES: usize = 1 << 16;

pub const DEFAULT_PRE_ROLL_SECS: u32 = 1;
pub const DEFAULT_POST_ROLL_SECS: u32 = 2;
/// Upper bound for either padding window
pub const MAX_ROLL_SECS: u32 = 60;

/// Settings for `listen`, fixed for the lifetime of a capture session
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub threshold_db: f64,
    pub output_dir: PathBuf,
    /// Preferred input device name. If None, uses the system default device
    pub device: Option<String>,
    pub chunk_frames: usize,
    /// Seconds of audio kept from before a loud onset
    pub pre_roll_secs: u32,
    /// Seconds of continuous quiet required before a segment is closed
    pub post_roll_secs: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            threshold_db: DEFAULT_THRESHOLD_DB,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            device: None,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            pre_roll_secs: DEFAULT_PRE_ROLL_SECS,
            post_roll_secs: DEFAULT_POST_ROLL_SECS,
        }
    }
}

/// Capacities of the pre-roll ring and post-roll window, in buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSizes {
    pub pre_roll: usize,
    pub post_roll: usize,
}

impl RecorderConfig {
    /// Size both windows for a stream running at `sample_rate`
    ///
    /// One second is `ceil(sample_rate / chunk_frames)` buffers. The post-roll
    /// window always holds at least one flag so a segment can be closed.
    pub fn windows(&self, sample_rate: u32) -> WindowSizes {
        let chunks_per_sec = (sample_rate as usize).div_ceil(self.chunk_frames.max(1));
        WindowSizes {
            pre_roll: chunks_per_sec * self.pre_roll_secs as usize,
            post_roll: (chunks_per_sec * self.post_roll_secs as usize).max(1),
        }
    }
}

/// Settings for `play`
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub output_dir: PathBuf,
    pub selector: DateSelector,
    /// Preferred output device name. If None, uses the system default device
    pub device: Option<String>,
    pub chunk_frames: usize,
}
