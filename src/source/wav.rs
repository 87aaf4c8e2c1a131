// Multichannel WAV recording source

use std::path::Path;

use super::{ArraySource, ChunkSource, Samples};
use crate::error::{ConfigError, DetectionError};

/// WAV recording decoded into memory
///
/// Integer formats are scaled to [-1, 1]; float formats are used as-is.
#[derive(Debug, Clone)]
pub struct WavSource {
    inner: ArraySource,
}

impl WavSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let display = path.as_ref().display().to_string();
        let unreadable = |err: hound::Error| ConfigError::Unreadable {
            path: display.clone(),
            reason: err.to_string(),
        };

        let mut reader = hound::WavReader::open(&path).map_err(unreadable)?;
        let spec = reader.spec();
        let n_channels = spec.channels as usize;
        if n_channels == 0 {
            return Err(ConfigError::UnsupportedFormat {
                reason: format!("{} declares zero channels", display),
            });
        }

        let data = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()
                .map_err(unreadable)?,
            hound::SampleFormat::Int => {
                let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                match spec.bits_per_sample {
                    16 => reader
                        .samples::<i16>()
                        .map(|sample| sample.map(|value| value as f32 / max))
                        .collect::<Result<Vec<f32>, _>>()
                        .map_err(unreadable)?,
                    24 | 32 => reader
                        .samples::<i32>()
                        .map(|sample| sample.map(|value| value as f32 / max))
                        .collect::<Result<Vec<f32>, _>>()
                        .map_err(unreadable)?,
                    other => {
                        return Err(ConfigError::UnsupportedFormat {
                            reason: format!(
                                "unsupported bits per sample {} in {}",
                                other, display
                            ),
                        })
                    }
                }
            }
        };

        // a truncated final frame is dropped
        let frames = data.len() / n_channels;
        let mut data = data;
        data.truncate(frames * n_channels);

        Ok(Self {
            inner: ArraySource::new(
                Samples::from_interleaved(n_channels, data),
                spec.sample_rate as f64,
            ),
        })
    }
}

impl ChunkSource for WavSource {
    fn n_channels(&self) -> usize {
        self.inner.n_channels()
    }

    fn n_samples(&self) -> u64 {
        self.inner.n_samples()
    }

    fn sample_rate(&self) -> f64 {
        self.inner.sample_rate()
    }

    fn read(&mut self, start: u64, len: usize) -> Result<Samples, DetectionError> {
        self.inner.read(start, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_multichannel_float() {
        let path = std::env::temp_dir().join(format!(
            "spikedetekt_wav_{}.wav",
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels: 3,
            sample_rate: 20_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for t in 0..10 {
            for c in 0..3 {
                writer.write_sample((t * 10 + c) as f32).unwrap();
            }
        }
        writer.finalize().unwrap();

        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(source.n_channels(), 3);
        assert_eq!(source.n_samples(), 10);
        assert_eq!(source.sample_rate(), 20_000.0);
        let block = source.read(4, 1).unwrap();
        assert_eq!(block.row(0), &[40.0, 41.0, 42.0]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_wav_missing_file() {
        assert!(matches!(
            WavSource::open("/nonexistent/recording.wav"),
            Err(ConfigError::Unreadable { .. })
        ));
    }
}
