//! Sample format conversion, channel remixing and resampling.

use crate::error::{Error, Result};
use crate::media::{NativeAudio, SampleFormat};

const I16_TO_F32: f32 = 1.0 / 32768.0;

/// Sample rate, channel count and sample layout of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioLayout {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioLayout {
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    pub fn of(frame: &NativeAudio) -> Self {
        Self::new(frame.sample_rate, frame.channels, frame.format)
    }
}

impl std::fmt::Display for AudioLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz {}ch {}", self.sample_rate, self.channels, self.format)
    }
}

/// Stateful audio conversion context.
///
/// Resampling is linear and carries its phase and the last input sample across
/// calls, so a stream converted in chunks has no seams.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    source: AudioLayout,
    target: AudioLayout,
    /// Read position in input frames, relative to the held frame.
    position: f64,
    /// Last input frame of the previous call (target channel count).
    held: Option<Vec<f32>>,
}

impl SampleConverter {
    pub fn new(source: AudioLayout, target: AudioLayout) -> Result<Self> {
        if source.channels == 0 || target.channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "cannot convert {} to {}",
                source, target
            )));
        }
        if source.sample_rate == 0 || target.sample_rate == 0 {
            return Err(Error::InvalidConfig(format!(
                "cannot resample {} to {}",
                source, target
            )));
        }
        Ok(Self {
            source,
            target,
            position: 0.0,
            held: None,
        })
    }

    pub fn source(&self) -> AudioLayout {
        self.source
    }

    pub fn target(&self) -> AudioLayout {
        self.target
    }

    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    /// Forget the resampler history (after a seek).
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.held = None;
    }

    /// Convert one frame; the output may hold a slightly different sample count
    /// when resampling.
    pub fn convert(&mut self, input: &NativeAudio) -> Result<NativeAudio> {
        if AudioLayout::of(input) != self.source {
            return Err(Error::InvalidConfig(format!(
                "converter built for {}, got {}",
                self.source,
                AudioLayout::of(input)
            )));
        }
        if self.is_identity() {
            return Ok(input.clone());
        }

        let samples = read_samples(input);
        let mixed = remix(
            &samples,
            self.source.channels as usize,
            self.target.channels as usize,
        );
        let resampled = if self.source.sample_rate == self.target.sample_rate {
            mixed
        } else {
            self.resample(&mixed)
        };

        let channels = self.target.channels as usize;
        let frames = resampled.len() / channels;
        Ok(NativeAudio {
            sample_rate: self.target.sample_rate,
            channels: self.target.channels,
            samples: frames,
            format: self.target.format,
            planes: write_samples(&resampled, channels, self.target.format),
            pts: input.pts,
        })
    }

    fn resample(&mut self, input: &[f32]) -> Vec<f32> {
        let channels = self.target.channels as usize;
        let step = self.source.sample_rate as f64 / self.target.sample_rate as f64;

        let mut buffer = self.held.take().unwrap_or_default();
        buffer.extend_from_slice(input);
        let frames = buffer.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(((frames as f64 / step) as usize + 1) * channels);
        while self.position + 1.0 < frames as f64 {
            let i = self.position as usize;
            let frac = (self.position - i as f64) as f32;
            for c in 0..channels {
                let a = buffer[i * channels + c];
                let b = buffer[(i + 1) * channels + c];
                out.push(a + (b - a) * frac);
            }
            self.position += step;
        }

        // keep the last frame so the next call can interpolate across the seam
        self.position -= (frames - 1) as f64;
        self.held = Some(buffer[(frames - 1) * channels..frames * channels].to_vec());
        out
    }
}

/// Decode any supported layout into interleaved f32.
pub(crate) fn read_samples(frame: &NativeAudio) -> Vec<f32> {
    let channels = frame.channels as usize;
    let count = frame.samples * channels;
    let mut out = Vec::with_capacity(count);

    if frame.format.is_planar() {
        for i in 0..frame.samples {
            for plane in frame.planes.iter().take(channels) {
                out.push(sample_at(plane, i, frame.format));
            }
        }
    } else if let Some(data) = frame.planes.first() {
        for i in 0..count {
            out.push(sample_at(data, i, frame.format));
        }
    }
    out
}

#[inline]
fn sample_at(data: &[u8], index: usize, format: SampleFormat) -> f32 {
    let size = format.bytes_per_sample();
    let Some(bytes) = data.get(index * size..(index + 1) * size) else {
        return 0.0;
    };
    match format {
        SampleFormat::S16 | SampleFormat::S16p => {
            i16::from_le_bytes([bytes[0], bytes[1]]) as f32 * I16_TO_F32
        }
        SampleFormat::Flt | SampleFormat::Fltp => {
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
    }
}

/// Encode interleaved f32 into the planes of `format`.
pub(crate) fn write_samples(samples: &[f32], channels: usize, format: SampleFormat) -> Vec<Vec<u8>> {
    let encode = |dst: &mut Vec<u8>, value: f32| match format {
        SampleFormat::S16 | SampleFormat::S16p => {
            let v = (value.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            dst.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::Flt | SampleFormat::Fltp => dst.extend_from_slice(&value.to_le_bytes()),
    };

    if format.is_planar() {
        let frames = samples.len() / channels.max(1);
        let mut planes = vec![Vec::with_capacity(frames * format.bytes_per_sample()); channels];
        for frame in samples.chunks_exact(channels) {
            for (plane, &value) in planes.iter_mut().zip(frame) {
                encode(plane, value);
            }
        }
        planes
    } else {
        let mut data = Vec::with_capacity(samples.len() * format.bytes_per_sample());
        for &value in samples {
            encode(&mut data, value);
        }
        vec![data]
    }
}

fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 || to > from {
            for c in 0..to {
                out.push(frame[c % from]);
            }
        } else {
            // fold extra source channels onto the target ones
            for c in 0..to {
                let (sum, n) = frame
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % to == c)
                    .fold((0.0, 0), |(s, n), (_, v)| (s + v, n + 1));
                out.push(sum / n as f32);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_s16_stereo_to_fltp() {
        let input = NativeAudio::interleaved(
            s16(&[16384, -16384, 0, 8192]),
            48_000,
            2,
            SampleFormat::S16,
        );
        let mut converter = SampleConverter::new(
            AudioLayout::of(&input),
            AudioLayout::new(48_000, 2, SampleFormat::Fltp),
        )
        .unwrap();
        let out = converter.convert(&input).unwrap();
        assert_eq!(out.samples, 2);
        assert_eq!(out.planes.len(), 2);
        let left = read_samples(&NativeAudio {
            channels: 1,
            planes: vec![out.planes[0].clone()],
            format: SampleFormat::Fltp,
            ..out.clone()
        });
        assert_eq!(left, vec![0.5, 0.0]);
    }

    #[test]
    fn test_downmix_to_mono() {
        let input = NativeAudio::interleaved(s16(&[16384, 0, 8192, 8192]), 8_000, 2, SampleFormat::S16);
        let mut converter = SampleConverter::new(
            AudioLayout::of(&input),
            AudioLayout::new(8_000, 1, SampleFormat::S16),
        )
        .unwrap();
        let out = converter.convert(&input).unwrap();
        assert_eq!(out.planes[0], s16(&[8192, 8192]));
    }

    #[test]
    fn test_upmix_duplicates_mono() {
        let input = NativeAudio::interleaved(s16(&[100, 200]), 8_000, 1, SampleFormat::S16);
        let mut converter = SampleConverter::new(
            AudioLayout::of(&input),
            AudioLayout::new(8_000, 2, SampleFormat::S16),
        )
        .unwrap();
        let out = converter.convert(&input).unwrap();
        assert_eq!(out.planes[0], s16(&[100, 100, 200, 200]));
    }

    #[test]
    fn test_resample_keeps_rate_across_chunks() {
        let source = AudioLayout::new(44_100, 1, SampleFormat::Flt);
        let target = AudioLayout::new(48_000, 1, SampleFormat::Flt);
        let mut converter = SampleConverter::new(source, target).unwrap();

        let chunk: Vec<u8> = (0..441).flat_map(|_| 0.25f32.to_le_bytes()).collect();
        let mut produced = 0;
        for _ in 0..100 {
            let frame = NativeAudio::interleaved(chunk.clone(), 44_100, 1, SampleFormat::Flt);
            let out = converter.convert(&frame).unwrap();
            assert!(read_samples(&out).iter().all(|v| (v - 0.25).abs() < 1e-6));
            produced += out.samples;
        }
        // one second of input gives one second of output, minus the held sample
        assert!((47_990..=48_000).contains(&produced), "{produced}");
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let mut converter = SampleConverter::new(
            AudioLayout::new(48_000, 2, SampleFormat::S16),
            AudioLayout::new(48_000, 2, SampleFormat::Flt),
        )
        .unwrap();
        let wrong = NativeAudio::interleaved(vec![0; 8], 44_100, 2, SampleFormat::S16);
        assert!(converter.convert(&wrong).is_err());
        assert!(
            SampleConverter::new(
                AudioLayout::new(48_000, 0, SampleFormat::S16),
                AudioLayout::new(48_000, 2, SampleFormat::S16)
            )
            .is_err()
        );
    }
}
