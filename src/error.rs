use std::path::PathBuf;
use thiserror::Error;

/// Error types surfaced by the recorder and player
#[derive(Error, Debug)]
pub enum SnoopError {
    #[error("The directory {} does not exist", .0.display())]
    NoDirectory(PathBuf),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Date error: {0}")]
    Date(#[from] jiff::Error),
}

/// How a failure is reported to the user and which status the process exits with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad invocation, e.g. a missing output directory. Reported, exits cleanly.
    Configuration,
    /// Device or filesystem failure. Exits with status 1.
    Io,
    /// Anything else. Exits with status 2.
    Unexpected,
}

impl ErrorClass {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorClass::Configuration => 0,
            ErrorClass::Io => 1,
            ErrorClass::Unexpected => 2,
        }
    }
}

impl SnoopError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SnoopError::NoDirectory(_) => ErrorClass::Configuration,
            SnoopError::Device(_) | SnoopError::Stream(_) | SnoopError::Io(_) => ErrorClass::Io,
            SnoopError::Wav(hound::Error::IoError(_)) => ErrorClass::Io,
            SnoopError::Wav(_) | SnoopError::UnsupportedFormat(_) | SnoopError::Date(_) => {
                ErrorClass::Unexpected
            }
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.class().exit_code()
    }
}
