//! Loudness classification of PCM buffers
//!
//! Loudness is measured on raw 16-bit amplitudes (not normalized), so a
//! full-scale square wave sits at about 90 dB and typical room noise at 30-40.

/// Reported loudness of a buffer with zero RMS, in place of `log10(0)`
pub const SILENCE_DB: f64 = -1000.0;

/// Root-mean-square of the raw sample amplitudes. Empty buffers have RMS 0
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&sample| {
            let value = f64::from(sample);
            value * value
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Sound pressure level of a buffer in dB
pub fn loudness_db(samples: &[i16]) -> f64 {
    let rms = rms(samples);
    if rms > 0.0 { 20.0 * rms.log10() } else { SILENCE_DB }
}

/// True iff the buffer is strictly louder than `threshold_db`
pub fn is_loud(samples: &[i16], threshold_db: f64) -> bool {
    loudness_db(samples) > threshold_db
}
