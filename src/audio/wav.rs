//! WAV encoding and decoding (hound).

use std::io::Cursor;
use std::path::Path;

use super::conditioner::downmix;
use crate::error::SightSingError;

/// Encode mono samples as a 16-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SightSingError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SightSingError::Encoding(format!("Failed to create WAV writer: {}", e)))?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| SightSingError::Encoding(format!("Failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| SightSingError::Encoding(format!("Failed to finalize WAV: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

/// Decode WAV bytes to mono `f32` samples and the file's sample rate.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), SightSingError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SightSingError::Encoding(format!("Failed to parse WAV: {}", e)))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| SightSingError::Encoding(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<Result<_, _>>()
                .map_err(|e| SightSingError::Encoding(e.to_string()))?
        }
    };

    Ok((downmix(&samples, channels), spec.sample_rate))
}

pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), SightSingError> {
    let bytes = encode_wav(samples, sample_rate)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), SightSingError> {
    let bytes = std::fs::read(path)?;
    decode_wav(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_decode_keeps_shape() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0) - 0.5).collect();
        let bytes = encode_wav(&samples, 22_050).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        let (decoded, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(decoded.len(), 1000);
        assert!((decoded[250] - samples[250]).abs() < 1e-3);
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        let bytes = encode_wav(&[2.0, -2.0], 8_000).unwrap();
        let (decoded, _) = decode_wav(&bytes).unwrap();
        assert!(decoded[0] > 0.99);
        assert!(decoded[1] < -0.99);
    }

    #[test]
    fn test_stereo_float_mixes_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in [[0.2f32, 0.4], [1.0, 0.0]] {
                for sample in frame {
                    writer.write_sample(sample).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        let (mono, _) = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_garbage_is_an_encoding_error() {
        assert!(matches!(
            decode_wav(b"not a wav file"),
            Err(SightSingError::Encoding(_))
        ));
    }
}
