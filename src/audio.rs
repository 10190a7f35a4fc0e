//! Audio device access and signal measurement
//!
//! - `recorder`: blocking reads from a CPAL input stream, device listing
//! - `player`: blocking writes to a CPAL output stream
//! - `level`: RMS loudness classification
//! - `ring`: fixed-capacity windows used by the capture loop

mod format;
mod level;
mod player;
mod recorder;
mod ring;

pub use format::StreamFormat;
pub use level::{is_loud, loudness_db};
pub use player::{AudioSink, OutputStream};
pub use recorder::{AudioSource, Chunk, InputStream, SourceError, list_input_devices};
pub use ring::RingBuffer;
