//! PCM conversion helpers shared by the drivers.
//!
//! The graph always carries signed 16-bit little-endian interleaved samples;
//! devices deliver whatever their native format is. These helpers bridge the
//! two without any platform dependency.

/// Convert a float sample in `[-1.0, 1.0]` to i16, clamping out-of-range values.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Encode interleaved i16 samples as little-endian bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Decode little-endian bytes into i16 samples. A trailing odd byte is ignored.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Float samples straight to graph bytes.
pub fn f32_to_pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        data.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    data
}

/// Change the channel layout of interleaved samples.
///
/// - same count: passthrough
/// - to mono: average of all channels per frame
/// - mono to N: the single channel is duplicated
/// - otherwise: leading channels are kept, missing ones are silent
pub fn remap_channels(samples: &[i16], from: usize, to: usize) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / from;
    let mut out = Vec::with_capacity(frame_count * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for ch in 0..to {
                out.push(frame.get(ch).copied().unwrap_or(0));
            }
        }
    }
    out
}

/// Root-mean-square level of graph bytes, in `[0.0, 1.0]`.
pub fn rms_level(bytes: &[u8]) -> f32 {
    let samples = le_bytes_to_i16(bytes);
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|&s| {
            let f = i16_to_f32(s);
            f * f
        })
        .sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(f32_to_i16(1.5), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_relative_eq!(i16_to_f32(i16::MAX), 1.0);
    }

    #[test]
    fn bytes_roundtrip_is_little_endian() {
        let bytes = i16_to_le_bytes(&[1, -2]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff]);
        assert_eq!(le_bytes_to_i16(&bytes), vec![1, -2]);
        assert_eq!(le_bytes_to_i16(&[1, 0, 5]), vec![1]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let mono = remap_channels(&[100, 300, -50, 50], 2, 1);
        assert_eq!(mono, vec![200, 0]);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let stereo = remap_channels(&[1, 2], 1, 2);
        assert_eq!(stereo, vec![1, 1, 2, 2]);
    }

    #[test]
    fn surround_to_stereo_keeps_front() {
        let stereo = remap_channels(&[1, 2, 3, 4, 5, 6], 3, 2);
        assert_eq!(stereo, vec![1, 2, 4, 5]);
    }

    #[test]
    fn rms_of_full_scale_square() {
        let bytes = i16_to_le_bytes(&[i16::MAX, -i16::MAX, i16::MAX, -i16::MAX]);
        assert_relative_eq!(rms_level(&bytes), 1.0, epsilon = 1e-4);
        assert_eq!(rms_level(&[]), 0.0);
    }
}
