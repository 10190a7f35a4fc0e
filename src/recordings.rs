//! Naming and lookup of recorded segments
//!
//! Segments live flat in the output directory as `rec_YYYY_MM_DD_HH_MM_SS.wav`,
//! stamped with the local time the segment started. Two segments starting in
//! the same second get the same name and the later one replaces the earlier.

use crate::audio::StreamFormat;
use crate::error::SnoopError;
use jiff::Zoned;
use jiff::civil::Date;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const SEGMENT_PREFIX: &str = "rec_";
pub const SEGMENT_EXTENSION: &str = ".wav";

/// strftime layout of the date part of a segment name
const DATE_LAYOUT: &str = "%Y_%m_%d";

/// File name for a segment that started at `start`
pub fn segment_file_name(start: &Zoned) -> String {
    format!(
        "{SEGMENT_PREFIX}{}{SEGMENT_EXTENSION}",
        start.strftime("%Y_%m_%d_%H_%M_%S")
    )
}

/// Which recordings to pick by date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelector {
    Today,
    Yesterday,
    All,
    /// A date such as `2024-01-31`, or any prefix of one such as `2024-01`
    Pattern(String),
}

impl FromStr for DateSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(DateSelector::Today),
            "yesterday" => Ok(DateSelector::Yesterday),
            "all" => Ok(DateSelector::All),
            other
                if other.chars().any(|c| c.is_ascii_digit())
                    && other.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '_') =>
            {
                Ok(DateSelector::Pattern(other.to_string()))
            }
            other => Err(format!(
                "Invalid date '{}': expected today, yesterday, all or YYYY-MM-DD",
                other
            )),
        }
    }
}

impl DateSelector {
    /// Substring a matching file name must contain, relative to `today`
    pub fn substring(&self, today: Date) -> Result<String, SnoopError> {
        Ok(match self {
            DateSelector::Today => today.strftime(DATE_LAYOUT).to_string(),
            DateSelector::Yesterday => today.yesterday()?.strftime(DATE_LAYOUT).to_string(),
            DateSelector::All => String::new(),
            DateSelector::Pattern(pattern) => pattern.replace('-', "_"),
        })
    }
}

/// Fail with a configuration error unless `dir` is an existing directory
pub fn ensure_directory(dir: &Path) -> Result<(), SnoopError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(SnoopError::NoDirectory(dir.to_path_buf()))
    }
}

/// Regular `.wav` files in `dir` whose name matches `selector`, sorted by name
pub fn find_recordings(
    dir: &Path,
    selector: &DateSelector,
    today: Date,
) -> Result<Vec<PathBuf>, SnoopError> {
    ensure_directory(dir)?;
    let needle = selector.substring(today)?;

    let mut recordings = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && name.ends_with(SEGMENT_EXTENSION) && name.contains(&needle) {
            recordings.push(path);
        }
    }
    recordings.sort();

    Ok(recordings)
}

/// Header details of a recording on disk
#[derive(Debug)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub format: StreamFormat,
    pub duration: Duration,
}

pub fn inspect_recording(path: &Path) -> Result<RecordingInfo, SnoopError> {
    let reader = hound::WavReader::open(path)?;
    let format = StreamFormat::from_wav_spec(reader.spec());
    let duration = if format.sample_rate > 0 {
        Duration::from_secs_f64(f64::from(reader.duration()) / f64::from(format.sample_rate))
    } else {
        Duration::ZERO
    };

    Ok(RecordingInfo {
        path: path.to_path_buf(),
        format,
        duration,
    })
}
