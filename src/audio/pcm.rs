//! PCM16 little-endian helpers shared by the mixer and the TTS router.
//!
//! Everything in the pipeline is signed 16-bit little-endian. The mixer
//! works at 48 kHz stereo; TTS arrives at 16 kHz mono and is expanded by
//! sample replication before it enters the mixer queue.

/// Decode little-endian PCM16 bytes into samples. A trailing odd byte is
/// discarded.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian PCM16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Duplicate a mono signal to interleaved stereo (L = R).
pub fn upmix_to_stereo(mono: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    for &s in mono {
        out.push(s);
        out.push(s);
    }
    out
}

/// Mix one sample pair with the clipping guard: `clip((a + b) / 2)`.
///
/// Averaging is the explicit anti-clipping policy; there is no ducking or
/// compression.
#[inline]
pub fn mix_clip(a: i16, b: i16) -> i16 {
    let mixed = (a as i32 + b as i32) / 2;
    mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Expand 16 kHz mono PCM16 bytes to 48 kHz stereo PCM16 bytes.
///
/// Each input sample is replicated three times (16 kHz → 48 kHz) and
/// duplicated to both channels, so every input sample becomes six output
/// samples.
pub fn expand_16k_mono_to_48k_stereo(input: &[u8]) -> Vec<u8> {
    let samples = bytes_to_samples(input);
    let mut out = Vec::with_capacity(samples.len() * 12);
    for &s in &samples {
        let le = s.to_le_bytes();
        for _ in 0..3 {
            out.extend_from_slice(&le); // L
            out.extend_from_slice(&le); // R
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_bytes_to_samples_odd_tail() {
        let decoded = bytes_to_samples(&[0x34, 0x12, 0xff]);
        assert_eq!(decoded, vec![0x1234]);
    }

    #[test]
    fn test_upmix() {
        assert_eq!(upmix_to_stereo(&[1, -2, 3]), vec![1, 1, -2, -2, 3, 3]);
    }

    #[test]
    fn test_mix_clip_average() {
        assert_eq!(mix_clip(100, 200), 150);
        assert_eq!(mix_clip(0, 0), 0);
        assert_eq!(mix_clip(-100, -200), -150);
        // With one side silent, the output is half the other side.
        assert_eq!(mix_clip(10_000, 0), 5_000);
    }

    #[test]
    fn test_mix_clip_extremes_stay_in_range() {
        assert_eq!(mix_clip(i16::MAX, i16::MAX), i16::MAX);
        assert_eq!(mix_clip(i16::MIN, i16::MIN), i16::MIN);
        assert_eq!(mix_clip(i16::MAX, i16::MIN), 0);
    }

    #[test]
    fn test_expand_sample_counts() {
        // 16 000 mono samples at 16 kHz become 48 000 stereo frames at
        // 48 kHz: 48 000 x 2 channels x 2 bytes = 192 000 bytes.
        let input = samples_to_bytes(&vec![7i16; 16_000]);
        let out = expand_16k_mono_to_48k_stereo(&input);
        assert_eq!(out.len(), 192_000);
        // Every output sample is the replicated input value.
        assert!(bytes_to_samples(&out).iter().all(|&s| s == 7));
    }

    #[test]
    fn test_expand_replication_order() {
        let input = samples_to_bytes(&[1i16, 2]);
        let out = bytes_to_samples(&expand_16k_mono_to_48k_stereo(&input));
        assert_eq!(out, vec![1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2]);
    }
}
