//! Audio Test Fixtures
//!
//! Generated audio keeps the tests free of external files:
//! - Sample rate: 16kHz
//! - Bit depth: 16-bit signed PCM
//! - Channels: Mono
//!
//! WAV containers are produced with `hound`, so uploads carry a real RIFF
//! header just like a file read from disk.

use std::f32::consts::PI;
use std::io::Cursor;
use std::path::Path;

/// Standard sample rate for recognition audio
pub const SAMPLE_RATE: u32 = 16000;

/// One second at 16kHz
pub const SECOND: usize = 16000;

/// Smallest chunk produced by [`ChunkSizes`]
pub const MIN_CHUNK: usize = 1024;

/// Upper bound (exclusive) for [`ChunkSizes`] before clamping
pub const MAX_CHUNK: usize = 8192;

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Generate a tone with a slow amplitude envelope, roughly speech-shaped
pub fn generate_speech_like(duration_samples: usize) -> Vec<i16> {
    let angular = 2.0 * PI * 220.0 / SAMPLE_RATE as f32;
    (0..duration_samples)
        .map(|i| {
            let envelope = 0.5 + 0.5 * (2.0 * PI * 3.0 * i as f32 / SAMPLE_RATE as f32).sin();
            ((angular * i as f32).sin() * envelope * 0.6 * i16::MAX as f32) as i16
        })
        .collect()
}

/// Encode samples as a complete WAV file in memory
pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec()).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Write samples to a WAV file on disk
pub fn write_wav_file(path: &Path, samples: &[i16]) {
    let mut writer = hound::WavWriter::create(path, wav_spec()).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Deterministic chunk sizes in `[MIN_CHUNK, MAX_CHUNK)`
///
/// Linear congruential generator, so every run splits audio identically.
pub struct ChunkSizes {
    state: u64,
}

impl ChunkSizes {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next raw pseudo-random value
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.state >> 16) & 0x7FFF_FFFF) as u32
    }
}

impl Iterator for ChunkSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let raw = self.next_u32() as usize % MAX_CHUNK;
        Some(raw.max(MIN_CHUNK))
    }
}

/// Split `data` into chunks whose sizes follow `sizes`
pub fn split_with<'a>(data: &'a [u8], sizes: &mut ChunkSizes) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let size = sizes.next().unwrap_or(MIN_CHUNK).min(data.len() - offset);
        chunks.push(&data[offset..offset + size]);
        offset += size;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_bytes_has_riff_header() {
        let wav = wav_bytes(&generate_speech_like(SECOND / 10));
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + SECOND / 10 * 2);
    }

    #[test]
    fn test_chunk_sizes_bounded_and_deterministic() {
        let a: Vec<usize> = ChunkSizes::new(7).take(100).collect();
        let b: Vec<usize> = ChunkSizes::new(7).take(100).collect();
        assert_eq!(a, b);
        assert!(a.iter().all(|&s| (MIN_CHUNK..MAX_CHUNK).contains(&s)));
    }

    #[test]
    fn test_split_with_covers_input() {
        let data = vec![1u8; 20_000];
        let chunks = split_with(&data, &mut ChunkSizes::new(1));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), data.len());
    }
}
