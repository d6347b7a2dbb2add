//! Test pattern generation for synthetic camera frames.

/// Simple pseudo-random number generator (LCG) for reproducible noise.
/// Uses the same constants as glibc for predictable cross-platform behavior.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Background level of every synthetic frame.
pub const BASE_LEVEL: u16 = 1_000;

/// Checkerboard amplitude at perfect focus.
pub const CONTRAST: u16 = 2_000;

/// Generates a checkerboard specimen blurred by defocus.
///
/// `sharpness` in [0, 1] scales the checkerboard contrast, so image
/// variance falls off as the specimen leaves focus. A small amount of
/// per-pixel noise varies with `frame_num`.
pub fn generate_specimen(width: u32, height: u32, frame_num: u64, sharpness: f64) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let mut buffer = vec![0u16; w * h];

    let checker = (width.min(height) / 8).max(1) as usize;
    let amplitude = (CONTRAST as f64 * sharpness.clamp(0.0, 1.0)) as i32;
    let frame_seed = frame_num.wrapping_mul(2654435761);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let on = ((x / checker) + (y / checker)) % 2 == 0;
            let noise = (prng(frame_seed ^ idx as u64) & 0x1F) as i32 - 16;
            let value = BASE_LEVEL as i32 + if on { amplitude } else { 0 } + noise;
            buffer[idx] = value.clamp(0, u16::MAX as i32) as u16;
        }
    }
    buffer
}

/// Gaussian focus response: 1.0 at `best`, falling with `depth_of_field`.
pub fn focus_sharpness(position: f64, best: f64, depth_of_field: f64) -> f64 {
    if depth_of_field <= 0.0 {
        return if position == best { 1.0 } else { 0.0 };
    }
    let d = (position - best) / depth_of_field;
    (-0.5 * d * d).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variance(px: &[u16]) -> f64 {
        let mean = px.iter().map(|&p| p as f64).sum::<f64>() / px.len() as f64;
        px.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / px.len() as f64
    }

    #[test]
    fn pattern_has_requested_size() {
        assert_eq!(generate_specimen(64, 32, 0, 1.0).len(), 64 * 32);
    }

    #[test]
    fn sharper_frames_have_more_variance() {
        let sharp = generate_specimen(64, 64, 1, 1.0);
        let blurred = generate_specimen(64, 64, 1, 0.1);
        assert!(variance(&sharp) > 10.0 * variance(&blurred));
    }

    #[test]
    fn focus_response_peaks_at_best() {
        assert_eq!(focus_sharpness(5.0, 5.0, 2.0), 1.0);
        assert!(focus_sharpness(7.0, 5.0, 2.0) < focus_sharpness(6.0, 5.0, 2.0));
        assert!(focus_sharpness(3.0, 5.0, 2.0) < 1.0);
    }
}
