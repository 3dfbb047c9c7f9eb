//! Conversion between a hardware gamma ramp and a brightness scalar plus
//! one gamma exponent per channel.
//!
//! The model is `v = brightness * x^(1/gamma)` for `x` in `[0, 1]`, with
//! values stored in the high bits of 16-bit entries.

use std::time::Duration;

use super::backend::GammaRamp;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GammaInfo {
    pub brightness: f64,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Default for GammaInfo {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            red: 1.0,
            green: 1.0,
            blue: 1.0,
        }
    }
}

impl GammaInfo {
    pub fn with_brightness(brightness: f64) -> Self {
        Self {
            brightness,
            ..Self::default()
        }
    }
}

/// How the ramp is pushed after a mode change. Some drivers drop the first
/// ramp written right after a resize, hence the delay and repeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GammaTuning {
    pub settle_delay: Duration,
    pub pushes: u32,
}

impl Default for GammaTuning {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(3000),
            pushes: 2,
        }
    }
}

/// Left shift that puts `size - 1` in the top bits of a u16.
fn shift_for(size: usize) -> u32 {
    let bits = usize::BITS - (size.saturating_sub(1)).leading_zeros();
    16u32.saturating_sub(bits)
}

fn encode_channel(brightness: f64, gamma: f64, size: usize, shift: u32) -> Vec<u16> {
    if size < 2 {
        return vec![0; size];
    }
    if gamma == 1.0 && brightness == 1.0 {
        return (0..size).map(|i| ((i as u32) << shift) as u16).collect();
    }

    let gamma = if gamma.is_finite() && gamma > 0.0 { gamma } else { 1.0 };
    let top = (size - 1) as f64;
    (0..size)
        .map(|i| {
            let value = (brightness * (i as f64 / top).powf(1.0 / gamma)).clamp(0.0, 1.0);
            (((value * top) as u32) << shift) as u16
        })
        .collect()
}

pub fn encode(info: &GammaInfo, size: usize) -> GammaRamp {
    let shift = shift_for(size);
    GammaRamp {
        red: encode_channel(info.brightness, info.red, size, shift),
        green: encode_channel(info.brightness, info.green, size, shift),
        blue: encode_channel(info.brightness, info.blue, size, shift),
    }
}

/// Estimates brightness and gammas from a ramp. `None` if the ramp is empty
/// or malformed, in which case the caller keeps its previous estimate.
pub fn decode(ramp: &GammaRamp) -> Option<GammaInfo> {
    let size = ramp.size();
    if size < 2 || ramp.green.len() != size || ramp.blue.len() != size {
        return None;
    }

    let top = (size - 1) as f64;
    let max = (((size - 1) as u32) << shift_for(size)) as f64;
    let channels = [&ramp.red, &ramp.green, &ramp.blue];

    // Highest index that is not saturated.
    let last = channels.map(|ch| {
        (1..size)
            .rev()
            .find(|&i| (ch[i] as f64) < max)
            .unwrap_or(0)
    });

    let mut best = 0;
    for c in 1..3 {
        if last[c] > last[best] {
            best = c;
        }
    }

    let last_best = last[best].max(1);
    let mid = (last_best / 2).max(1);
    let reference = channels[best];

    let x1 = mid as f64 / top;
    let v1 = reference[mid] as f64 / max;
    let x2 = last_best as f64 / top;
    let v2 = reference[last_best] as f64 / max;

    if v2 < 1e-4 {
        return Some(GammaInfo {
            brightness: 0.0,
            ..GammaInfo::default()
        });
    }

    let brightness = if last_best == size - 1 || mid == last_best {
        v2
    } else {
        ((v2.ln() * x1.ln() - v1.ln() * x2.ln()) / (x1 / x2).ln()).exp()
    };

    let channel_gamma = |c: usize| {
        let m = (last[c] / 2).max(1);
        let x = m as f64 / top;
        let v = channels[c][m] as f64 / max;
        let gamma = x.ln() / (v / brightness).ln();
        if gamma.is_finite() && gamma > 0.0 {
            gamma
        } else {
            1.0
        }
    };

    Some(GammaInfo {
        brightness,
        red: channel_gamma(0),
        green: channel_gamma(1),
        blue: channel_gamma(2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_round_trip(size: usize, tolerance: f64) {
        for brightness in [0.3, 0.5, 0.75, 1.0] {
            for gamma in [0.5, 0.8, 1.0, 1.6, 2.2, 2.5] {
                let info = GammaInfo {
                    brightness,
                    red: gamma,
                    green: 2.0,
                    blue: 1.3,
                };
                let decoded = decode(&encode(&info, size)).unwrap();
                assert_abs_diff_eq!(decoded.brightness, brightness, epsilon = tolerance);
                assert_abs_diff_eq!(decoded.red, gamma, epsilon = tolerance);
                assert_abs_diff_eq!(decoded.green, 2.0, epsilon = tolerance);
                assert_abs_diff_eq!(decoded.blue, 1.3, epsilon = tolerance);
            }
        }
    }

    #[test]
    fn test_identity_ramp_is_exact() {
        for size in [256usize, 1024, 65536] {
            let ramp = encode(&GammaInfo::default(), size);
            let shift = 16 - size.trailing_zeros();
            for (i, value) in ramp.red.iter().enumerate() {
                assert_eq!(*value as u32, (i as u32) << shift);
            }
            assert_eq!(ramp.red, ramp.green);
            assert_eq!(ramp.red, ramp.blue);
        }
    }

    #[test]
    fn test_identity_decodes_exactly() {
        let decoded = decode(&encode(&GammaInfo::default(), 256)).unwrap();
        assert_eq!(decoded, GammaInfo::default());
    }

    #[test]
    fn test_round_trip_full_precision() {
        assert_round_trip(65536, 1e-3);
    }

    #[test]
    fn test_round_trip_common_sizes() {
        assert_round_trip(1024, 0.02);
        assert_round_trip(256, 0.1);
    }

    #[test]
    fn test_black_ramp() {
        let decoded = decode(&encode(&GammaInfo::with_brightness(0.0), 256)).unwrap();
        assert_eq!(decoded.brightness, 0.0);
        assert_eq!(decoded.red, 1.0);
        assert_eq!(decoded.green, 1.0);
        assert_eq!(decoded.blue, 1.0);
    }

    #[test]
    fn test_decode_rejects_bad_ramps() {
        assert_eq!(decode(&GammaRamp::default()), None);
        let ramp = GammaRamp {
            red: vec![0, 1, 2],
            green: vec![0, 1],
            blue: vec![0, 1, 2],
        };
        assert_eq!(decode(&ramp), None);
    }

    #[test]
    fn test_shift() {
        assert_eq!(shift_for(256), 8);
        assert_eq!(shift_for(1024), 6);
        assert_eq!(shift_for(65536), 0);
        // Values of odd-sized ramps still fit in 16 bits.
        let ramp = encode(&GammaInfo::default(), 1000);
        assert!(ramp.red.windows(2).all(|w| w[0] < w[1]));
    }
}
