//! Per-pixel colour operations shared by the film presets.
//!
//! Channels are carried as `f32` in the 0..=255 range between steps and only
//! quantised once, after grain.

pub type Rgb = [f32; 3];

/// Rec. 709 luma
pub fn luma([r, g, b]: Rgb) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// Multiply each channel by its own gain
pub fn channel_gain([r, g, b]: Rgb, gain: [f32; 3]) -> Rgb {
    [r * gain[0], g * gain[1], b * gain[2]]
}

/// Contrast factor for a contrast boost expressed as a fraction of full
/// range (`0.15` is a 15% boost).
pub fn contrast_factor(amount: f32) -> f32 {
    let c = 255.0 * amount;
    (259.0 * (c + 255.0)) / (255.0 * (259.0 - c))
}

/// `c' = f * (c - 128) + 128`
pub fn contrast(rgb: Rgb, factor: f32) -> Rgb {
    rgb.map(|c| factor * (c - 128.0) + 128.0)
}

/// Pull each channel toward luma; `saturation = 1.0` is a no-op
pub fn desaturate(rgb: Rgb, saturation: f32) -> Rgb {
    let y = luma(rgb);
    rgb.map(|c| y + saturation * (c - y))
}

const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

/// Full-strength sepia transform
pub fn sepia([r, g, b]: Rgb) -> Rgb {
    SEPIA.map(|row| row[0] * r + row[1] * g + row[2] * b)
}

/// Linear blend from `from` toward `to`
pub fn blend(from: Rgb, to: Rgb, strength: f32) -> Rgb {
    [
        from[0] + strength * (to[0] - from[0]),
        from[1] + strength * (to[1] - from[1]),
        from[2] + strength * (to[2] - from[2]),
    ]
}

/// Add a constant to every channel
pub fn lift(rgb: Rgb, amount: f32) -> Rgb {
    rgb.map(|c| c + amount)
}

/// Multiply every channel by one factor
pub fn scale(rgb: Rgb, factor: f32) -> Rgb {
    rgb.map(|c| c * factor)
}

pub fn clamp(rgb: Rgb) -> Rgb {
    rgb.map(|c| c.clamp(0.0, 255.0))
}

/// Round and clamp into a byte
pub fn quantize(c: f32) -> u8 {
    c.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_contrast_factor() {
        assert!(close(contrast_factor(0.0), 1.0));
        // 38.25 on the classic -255..255 contrast scale
        assert!(close(contrast_factor(0.15), 75951.75 / 56291.25));
    }

    #[test]
    fn test_contrast_pivots_on_mid_gray() {
        let out = contrast([128.0, 0.0, 255.0], 1.5);
        assert!(close(out[0], 128.0));
        assert!(close(out[1], -64.0));
        assert!(close(out[2], 318.5));
    }

    #[test]
    fn test_desaturate() {
        let gray = [90.0, 90.0, 90.0];
        assert_eq!(desaturate(gray, 0.3), gray);

        let red = [200.0, 0.0, 0.0];
        let y = luma(red);
        let out = desaturate(red, 0.0);
        assert!(out.iter().all(|c| close(*c, y)));
    }

    #[test]
    fn test_sepia_shifts_gray() {
        let out = sepia([100.0, 100.0, 100.0]);
        assert!(close(out[0], 135.1));
        assert!(close(out[1], 120.3));
        assert!(close(out[2], 93.7));
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(-3.0), 0);
        assert_eq!(quantize(127.5), 128);
        assert_eq!(quantize(300.0), 255);
    }
}
