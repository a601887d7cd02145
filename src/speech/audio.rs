//! PCM helpers for the 16-bit mono little-endian audio exchanged with the
//! gateway.

/// Default energy gate: RMS below 1% of full scale is treated as silence
pub const DEFAULT_SILENCE_RMS: f32 = 0.01;

/// Root-mean-square level of 16-bit LE samples, normalised to `0.0..=1.0`
///
/// A trailing odd byte is ignored. No samples yields `0.0`.
pub fn pcm_rms(pcm: &[u8]) -> f32 {
    let mut sum = 0f64;
    let mut count = 0usize;
    for pair in pcm.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]]));
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64).sqrt() / 32768.0) as f32
}

/// Whether `pcm` is too quiet to be worth transcribing
///
/// A threshold of `0.0` disables the gate for any non-empty chunk.
pub fn is_silence(pcm: &[u8], threshold: f32) -> bool {
    if pcm.len() < 2 {
        return true;
    }
    threshold > 0.0 && pcm_rms(pcm) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_rms_levels() {
        assert_eq!(pcm_rms(&[]), 0.0);
        assert_eq!(pcm_rms(&samples(&[0; 160])), 0.0);

        let full = pcm_rms(&samples(&[i16::MIN, i16::MIN]));
        assert!((full - 1.0).abs() < 1e-6);

        let half = pcm_rms(&samples(&[16384, -16384, 16384, -16384]));
        assert!((half - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_trailing_odd_byte_ignored() {
        let mut pcm = samples(&[1000, -1000]);
        pcm.push(0x7f);
        assert_eq!(pcm_rms(&pcm), pcm_rms(&samples(&[1000, -1000])));
    }

    #[test]
    fn test_silence_gate() {
        // Low hiss around 0.3% of full scale
        let hiss = samples(&[100, -100, 80, -120].repeat(40));
        assert!(is_silence(&hiss, DEFAULT_SILENCE_RMS));

        let voice = samples(&[6000, -5000, 7000, -6500].repeat(40));
        assert!(!is_silence(&voice, DEFAULT_SILENCE_RMS));

        assert!(!is_silence(&hiss, 0.0));
        assert!(is_silence(&[0x10], 0.0));
    }
}
