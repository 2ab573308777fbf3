//! Named film presets and their parameter table.
//!
//! Both the full-resolution renderer and the live-preview CSS approximation
//! read from the tables in this file, so the two never drift apart in look.

use super::ops::{self, Rgb};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Filter attached to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    None,
    Vintage,
    #[serde(alias = "35mm")]
    Film35mm,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::None => "none",
            FilterKind::Vintage => "vintage",
            FilterKind::Film35mm => "film35mm",
        }
    }

    /// Parameter set for this filter; `None` has no spec (identity)
    pub fn spec(&self) -> Option<&'static FilterSpec> {
        match self {
            FilterKind::None => None,
            FilterKind::Vintage => Some(&VINTAGE),
            FilterKind::Film35mm => Some(&FILM_35MM),
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(FilterKind::None),
            "vintage" => Ok(FilterKind::Vintage),
            "film35mm" | "35mm" => Ok(FilterKind::Film35mm),
            other => Err(format!("Unknown filter type: {}", other)),
        }
    }
}

/// How contrast is expressed in a tone table
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contrast {
    /// Boost as a fraction of full range, run through the contrast-factor formula
    Boost(f32),
    /// Factor applied directly around mid-gray
    Factor(f32),
}

impl Contrast {
    pub fn factor(&self) -> f32 {
        match *self {
            Contrast::Boost(amount) => ops::contrast_factor(amount),
            Contrast::Factor(factor) => factor,
        }
    }
}

/// Colour steps of a preset, applied in field order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneParams {
    pub channel_gain: [f32; 3],
    pub contrast: Contrast,
    pub saturation: f32,
    pub sepia: f32,
    pub shadow_lift: f32,
}

impl ToneParams {
    /// Run the tone steps on one pixel, clamped to 0..=255
    pub fn apply(&self, rgb: Rgb) -> Rgb {
        let rgb = ops::channel_gain(rgb, self.channel_gain);
        let rgb = ops::contrast(rgb, self.contrast.factor());
        let rgb = ops::desaturate(rgb, self.saturation);
        let rgb = if self.sepia > 0.0 {
            ops::blend(rgb, ops::sepia(rgb), self.sepia)
        } else {
            rgb
        };
        let rgb = ops::lift(rgb, self.shadow_lift);
        ops::clamp(rgb)
    }
}

/// Radial darkening. The gradient radius is `radius_scale` times half the
/// image's longer edge; it stays clear up to `clear_stop` of that radius and
/// falls linearly to `edge_factor` at the radius and beyond.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VignetteParams {
    pub radius_scale: f32,
    pub clear_stop: f32,
    pub edge_factor: f32,
}

impl VignetteParams {
    /// Multiplier at `distance` pixels from the centre of a `width` x `height` image
    pub fn factor(&self, distance: f32, width: u32, height: u32) -> f32 {
        let outer = width.max(height) as f32 / 2.0 * self.radius_scale;
        if outer <= 0.0 {
            return 1.0;
        }
        self.factor_at_ratio(distance / outer)
    }

    /// Multiplier at `t`, the distance as a fraction of the gradient radius
    pub fn factor_at_ratio(&self, t: f32) -> f32 {
        if t <= self.clear_stop {
            1.0
        } else if t >= 1.0 {
            self.edge_factor
        } else {
            let span = (t - self.clear_stop) / (1.0 - self.clear_stop);
            1.0 - (1.0 - self.edge_factor) * span
        }
    }

    /// Overlay gradient for on-screen previews.
    ///
    /// `farthest-side` on a centred circle is half the longer edge, the same
    /// base radius `factor` uses.
    pub fn css_radial_gradient(&self) -> String {
        format!(
            "radial-gradient(circle farthest-side, rgba(0,0,0,0) {:.0}%, rgba(0,0,0,{:.2}) {:.0}%)",
            self.clear_stop * self.radius_scale * 100.0,
            1.0 - self.edge_factor,
            self.radius_scale * 100.0
        )
    }
}

/// Complete description of a film look
#[derive(Debug, Clone, Copy)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub tone: ToneParams,
    pub pixel_op: fn(Rgb) -> Rgb,
    pub vignette: VignetteParams,
    pub grain_intensity: f32,
}

impl FilterSpec {
    /// CSS filter chain approximating the tone table for a live preview.
    ///
    /// Per-channel gain and shadow lift have no CSS equivalent; they fold
    /// into brightness and a sepia hint derived from the red/blue skew.
    pub fn css_approximation(&self) -> String {
        let tone = &self.tone;
        let gain = &tone.channel_gain;
        let brightness = (gain[0] + gain[1] + gain[2]) / 3.0 + tone.shadow_lift / 255.0;
        let warmth = (gain[0] - gain[2]).max(0.0);
        let sepia = (tone.sepia + warmth).min(1.0);

        format!(
            "brightness({:.2}) contrast({:.2}) saturate({:.2}) sepia({:.2})",
            brightness,
            tone.contrast.factor(),
            tone.saturation,
            sepia
        )
    }
}

const VINTAGE_TONE: ToneParams = ToneParams {
    channel_gain: [1.05, 1.05, 1.05],
    contrast: Contrast::Boost(0.15),
    saturation: 0.75,
    sepia: 0.35,
    shadow_lift: 0.0,
};

const FILM_35MM_TONE: ToneParams = ToneParams {
    channel_gain: [1.02, 0.98, 0.94],
    contrast: Contrast::Factor(0.95),
    saturation: 0.85,
    sepia: 0.0,
    shadow_lift: 8.0,
};

fn vintage_pixel(rgb: Rgb) -> Rgb {
    VINTAGE_TONE.apply(rgb)
}

fn film_35mm_pixel(rgb: Rgb) -> Rgb {
    FILM_35MM_TONE.apply(rgb)
}

pub static VINTAGE: FilterSpec = FilterSpec {
    kind: FilterKind::Vintage,
    tone: VINTAGE_TONE,
    pixel_op: vintage_pixel,
    vignette: VignetteParams {
        radius_scale: 1.5,
        // Clear out to 0.4 of the half-edge, expressed against the 1.5x radius
        clear_stop: 0.4 / 1.5,
        edge_factor: 0.6,
    },
    grain_intensity: 0.08,
};

pub static FILM_35MM: FilterSpec = FilterSpec {
    kind: FilterKind::Film35mm,
    tone: FILM_35MM_TONE,
    pixel_op: film_35mm_pixel,
    vignette: VignetteParams {
        radius_scale: 1.3,
        clear_stop: 0.5,
        edge_factor: 0.75,
    },
    grain_intensity: 0.15,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vintage_shifts_mid_gray() {
        let out = (VINTAGE.pixel_op)([128.0, 128.0, 128.0]);
        assert!(out.iter().any(|c| (c - 128.0).abs() > 1.0));
        // Sepia pushes red above blue
        assert!(out[0] > out[2]);
    }

    #[test]
    fn test_film_35mm_lifts_blacks() {
        let out = (FILM_35MM.pixel_op)([0.0, 0.0, 0.0]);
        assert!(out.iter().all(|c| *c > 0.0));
    }

    #[test]
    fn test_35mm_grain_heavier_than_vintage() {
        assert!(FILM_35MM.grain_intensity > VINTAGE.grain_intensity);
    }

    #[test]
    fn test_filter_kind_parsing() {
        assert_eq!("vintage".parse::<FilterKind>(), Ok(FilterKind::Vintage));
        assert_eq!("35mm".parse::<FilterKind>(), Ok(FilterKind::Film35mm));
        assert_eq!("FILM35MM".parse::<FilterKind>(), Ok(FilterKind::Film35mm));
        assert_eq!("none".parse::<FilterKind>(), Ok(FilterKind::None));
        assert!("polaroid".parse::<FilterKind>().is_err());

        let json: FilterKind = serde_json::from_str("\"35mm\"").unwrap();
        assert_eq!(json, FilterKind::Film35mm);
        assert_eq!(
            serde_json::to_string(&FilterKind::Film35mm).unwrap(),
            "\"film35mm\""
        );
    }

    #[test]
    fn test_spec_lookup() {
        assert!(FilterKind::None.spec().is_none());
        assert_eq!(FilterKind::Vintage.spec().unwrap().kind, FilterKind::Vintage);
        assert_eq!(
            FilterKind::Film35mm.spec().unwrap().kind,
            FilterKind::Film35mm
        );
    }

    #[test]
    fn test_css_approximation_follows_table() {
        assert_eq!(
            VINTAGE.css_approximation(),
            "brightness(1.05) contrast(1.35) saturate(0.75) sepia(0.35)"
        );
        assert_eq!(
            FILM_35MM.css_approximation(),
            "brightness(1.01) contrast(0.95) saturate(0.85) sepia(0.08)"
        );
    }

    #[test]
    fn test_vignette_stops() {
        // 200x100 image: half the longer edge is 100px
        let v = VINTAGE.vignette;
        assert_eq!(v.factor(0.0, 200, 100), 1.0);
        assert_eq!(v.factor(39.0, 200, 100), 1.0);
        assert!(v.factor(50.0, 200, 100) < 1.0);
        assert!((v.factor(50.0, 200, 100) - 0.963_636_3).abs() < 1e-5);
        assert!(v.factor(60.0, 200, 100) < v.factor(50.0, 200, 100));
        assert!((v.factor(150.0, 200, 100) - 0.6).abs() < 1e-5);
        assert!((v.factor(300.0, 200, 100) - 0.6).abs() < 1e-6);

        let f = FILM_35MM.vignette;
        assert_eq!(f.factor(64.0, 200, 100), 1.0);
        assert!(f.factor(70.0, 200, 100) < 1.0);
        assert!((f.factor(130.0, 200, 100) - 0.75).abs() < 1e-5);
    }

    fn gradient_stops(css: &str) -> (f32, f32, f32) {
        let percents: Vec<f32> = css
            .split(|c: char| c == ' ' || c == ')' || c == ',')
            .filter_map(|token| token.strip_suffix('%'))
            .map(|n| n.parse().unwrap())
            .collect();
        let alpha: f32 = css
            .rsplit("rgba(0,0,0,")
            .next()
            .and_then(|rest| rest.split(')').next())
            .unwrap()
            .parse()
            .unwrap();
        (percents[0], percents[1], alpha)
    }

    #[test]
    fn test_css_gradient_matches_pixel_vignette() {
        for spec in [&VINTAGE, &FILM_35MM] {
            let v = spec.vignette;
            let css = v.css_radial_gradient();
            assert!(css.starts_with("radial-gradient(circle farthest-side,"));

            let (clear, edge, alpha) = gradient_stops(&css);
            // Percentages are of half the longer edge, as in `factor`
            let (w, h) = (400, 300);
            let half = 200.0;
            assert_eq!(v.factor((clear - 1.0) / 100.0 * half, w, h), 1.0);
            assert!(v.factor((clear + 2.0) / 100.0 * half, w, h) < 1.0);
            assert!((v.factor(edge / 100.0 * half, w, h) - v.edge_factor).abs() < 1e-4);
            assert!((alpha - (1.0 - v.factor_at_ratio(1.0))).abs() < 0.005);
        }
        assert_eq!(
            VINTAGE.vignette.css_radial_gradient(),
            "radial-gradient(circle farthest-side, rgba(0,0,0,0) 40%, rgba(0,0,0,0.40) 150%)"
        );
    }

    proptest! {
        #[test]
        fn prop_vignette_is_non_increasing(a in 0.0f32..4000.0, b in 0.0f32..4000.0, w in 1u32..5000, h in 1u32..5000) {
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            for spec in [&VINTAGE, &FILM_35MM] {
                let v = spec.vignette;
                prop_assert!(v.factor(near, w, h) >= v.factor(far, w, h));
                prop_assert!(v.factor(far, w, h) >= v.edge_factor);
            }
        }
    }
}
