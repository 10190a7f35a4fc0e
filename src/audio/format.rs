use hound::WavSpec;

/// Shape of an interleaved PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl StreamFormat {
    /// Signed 16-bit PCM, the format every capture is recorded in
    pub fn pcm16(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    /// Number of interleaved samples in `frames` frames
    pub fn chunk_samples(&self, frames: usize) -> usize {
        frames * usize::from(self.channels.max(1))
    }

    pub fn wav_spec(&self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }

    pub fn from_wav_spec(spec: WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ch, {} Hz, {}-bit",
            self.channels, self.sample_rate, self.bits_per_sample
        )
    }
}
