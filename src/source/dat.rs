// Flat binary recording source
//
// Reads the classic electrophysiology `.dat` layout: little-endian signed
// 16-bit samples, channels interleaved, no header. Only the requested range
// is read from disk.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::{ChunkSource, Samples};
use crate::error::{ConfigError, DetectionError};

const BYTES_PER_SAMPLE: u64 = 2;

/// Random-access reader for interleaved `i16` recordings
#[derive(Debug)]
pub struct DatSource {
    file: File,
    n_channels: usize,
    n_samples: u64,
    sample_rate: f64,
    gain: f32,
}

impl DatSource {
    /// Open a `.dat` file
    ///
    /// # Arguments
    /// * `path` - Path to the recording
    /// * `n_channels` - Number of interleaved channels
    /// * `sample_rate` - Sample rate in Hz
    /// * `gain` - Factor applied to every decoded integer sample
    pub fn open<P: AsRef<Path>>(
        path: P,
        n_channels: usize,
        sample_rate: f64,
        gain: f32,
    ) -> Result<Self, ConfigError> {
        let display = path.as_ref().display().to_string();
        if n_channels == 0 {
            return Err(ConfigError::parameter("channels", "must be positive"));
        }
        let file = File::open(&path).map_err(|err| ConfigError::Unreadable {
            path: display.clone(),
            reason: err.to_string(),
        })?;
        let bytes = file
            .metadata()
            .map_err(|err| ConfigError::Unreadable {
                path: display.clone(),
                reason: err.to_string(),
            })?
            .len();

        let frame = BYTES_PER_SAMPLE * n_channels as u64;
        if bytes % frame != 0 {
            return Err(ConfigError::UnsupportedFormat {
                reason: format!(
                    "{} is {} bytes, not a multiple of {} channels x {} bytes",
                    display, bytes, n_channels, BYTES_PER_SAMPLE
                ),
            });
        }

        Ok(Self {
            file,
            n_channels,
            n_samples: bytes / frame,
            sample_rate,
            gain,
        })
    }
}

impl ChunkSource for DatSource {
    fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn n_samples(&self) -> u64 {
        self.n_samples
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn read(&mut self, start: u64, len: usize) -> Result<Samples, DetectionError> {
        if start + len as u64 > self.n_samples {
            return Err(DetectionError::Source {
                reason: format!(
                    "range [{}, {}) past end of recording ({} samples)",
                    start,
                    start + len as u64,
                    self.n_samples
                ),
            });
        }

        let frame = BYTES_PER_SAMPLE as usize * self.n_channels;
        self.file.seek(SeekFrom::Start(start * frame as u64))?;
        let mut bytes = vec![0u8; len * frame];
        self.file.read_exact(&mut bytes)?;

        let data = bytes
            .chunks_exact(BYTES_PER_SAMPLE as usize)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 * self.gain)
            .collect();
        Ok(Samples::from_interleaved(self.n_channels, data))
    }
}

/// Write samples as interleaved little-endian `i16`, dividing by `gain`
///
/// Values are rounded and saturated to the `i16` range.
pub fn write_dat<P: AsRef<Path>>(
    path: P,
    samples: &Samples,
    gain: f32,
) -> Result<(), DetectionError> {
    let bytes: Vec<u8> = samples
        .as_interleaved()
        .iter()
        .flat_map(|&v| {
            let scaled = (v / gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            scaled.to_le_bytes()
        })
        .collect();
    std::fs::write(path, bytes)?;
    Ok(())
}
