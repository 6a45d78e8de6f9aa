//! Procedural droplet silhouettes.
//!
//! Each [`ShapeKind`] describes its outline as a union of simple primitives
//! (circles, possibly rotated or halved ellipses, and a perturbed polar curve)
//! in droplet-local coordinates, with the droplet center at the origin and `y`
//! pointing down. The outline is rasterized into a binary [`ShapeMask`] whose
//! canvas leaves room for the Gaussian feathering applied by the renderer.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mask value inside the droplet silhouette.
pub const OPAQUE: u8 = 255;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Tail length of the canonical teardrop, relative to the radius.
const TAIL_FACTOR: f64 = 1.3 * SQRT_3;

/// Largest Gaussian sigma used to feather droplet edges.
const MAX_FEATHER_SIGMA: f32 = 12.0;

/// The silhouette family of a droplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Circle with a trailing half-ellipse tail.
    Default,
    /// Perfect circle.
    Round,
    /// Ellipse with random orientation and aspect ratio.
    Oval,
    /// `Default` with randomized tail length and tilt.
    Teardrop,
    /// Circle with a randomly perturbed rim.
    Irregular,
    /// Main droplet surrounded by small satellites.
    Splash,
}

impl ShapeKind {
    /// Every shape kind, in declaration order.
    pub const ALL: [ShapeKind; 6] = [
        ShapeKind::Default,
        ShapeKind::Round,
        ShapeKind::Oval,
        ShapeKind::Teardrop,
        ShapeKind::Irregular,
        ShapeKind::Splash,
    ];

    /// Lowercase name used in configuration files and on the command line.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ShapeKind::Default => "default",
            ShapeKind::Round => "round",
            ShapeKind::Oval => "oval",
            ShapeKind::Teardrop => "teardrop",
            ShapeKind::Irregular => "irregular",
            ShapeKind::Splash => "splash",
        }
    }

    /// Rasterize this shape for a droplet of the given radius.
    ///
    /// `Default` and `Round` are deterministic; the other kinds draw their
    /// sub-parameters from `rng`, so repeated calls may differ.
    pub fn build_mask<R: Rng + ?Sized>(self, radius: u32, rng: &mut R) -> ShapeMask {
        let outline = self.outline(f64::from(radius), rng);
        rasterize(&outline, feather_padding(radius))
    }

    fn outline<R: Rng + ?Sized>(self, r: f64, rng: &mut R) -> Vec<Primitive> {
        match self {
            ShapeKind::Default => vec![
                Primitive::Circle { cx: 0.0, cy: 0.0, r },
                Primitive::Ellipse {
                    a: r,
                    b: TAIL_FACTOR * r,
                    angle: 0.0,
                    lower_half: true,
                },
            ],
            ShapeKind::Round => vec![Primitive::Circle { cx: 0.0, cy: 0.0, r }],
            ShapeKind::Oval => {
                let angle = rng.random_range(0.0..PI);
                let aspect = rng.random_range(1.2..=2.0);
                vec![Primitive::Ellipse {
                    a: r,
                    b: r * aspect,
                    angle,
                    lower_half: false,
                }]
            }
            ShapeKind::Teardrop => {
                let tail = rng.random_range(1.1..=1.5) * SQRT_3;
                let tilt = rng.random_range(-15.0_f64..=15.0).to_radians();
                vec![
                    Primitive::Circle { cx: 0.0, cy: 0.0, r },
                    Primitive::Ellipse {
                        a: r,
                        b: tail * r,
                        angle: tilt,
                        lower_half: true,
                    },
                ]
            }
            ShapeKind::Irregular => {
                let count = rng.random_range(3..=6_u32);
                let max_amplitude = 0.3 / f64::from(count);
                let terms = (0..count)
                    .map(|_| Harmonic {
                        amplitude: rng.random_range(0.02..=max_amplitude),
                        frequency: f64::from(rng.random_range(2..=5_u32)),
                        phase: rng.random_range(0.0..TAU),
                    })
                    .collect();
                vec![Primitive::Polar { r, terms }]
            }
            ShapeKind::Splash => {
                let main = (0.7 * r).round().max(1.0);
                let mut parts = vec![Primitive::Circle {
                    cx: 0.0,
                    cy: 0.0,
                    r: main,
                }];
                let satellites = rng.random_range(2..=5_u32);
                for _ in 0..satellites {
                    let angle = rng.random_range(0.0..TAU);
                    let distance = rng.random_range(main..=(1.5 * r).max(main));
                    let sat_r = rng.random_range((r / 4.0)..=(r / 2.0)).round().max(1.0);
                    parts.push(Primitive::Circle {
                        cx: (distance * angle.cos()).round(),
                        cy: (distance * angle.sin()).round(),
                        r: sat_r,
                    });
                }
                parts
            }
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown shape name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown droplet shape `{0}` (expected default, round, oval, teardrop, irregular or splash)")]
pub struct ParseShapeError(String);

impl FromStr for ShapeKind {
    type Err = ParseShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShapeKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseShapeError(s.to_string()))
    }
}

/// Upper bound of the feathering sigma for a droplet of the given radius.
///
/// The renderer draws its alpha-map blur from `[2/3, 1]` of this value, and
/// mask canvases are padded by twice this value so the blur is not clipped.
#[must_use]
pub fn feather_limit(radius: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let third = radius as f32 / 3.0;
    third.clamp(0.5, MAX_FEATHER_SIGMA)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn feather_padding(radius: u32) -> i64 {
    (2.0 * feather_limit(radius)).ceil() as i64
}

/// Farthest any procedural outline reaches from the center, in radii.
///
/// Bounded by the longest teardrop tail.
const MAX_REACH: f64 = 1.5 * SQRT_3;

/// Upper bound on the side length of any procedural mask canvas for `radius`.
///
/// Lets callers refuse a droplet before its buffers are allocated.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn max_canvas_side(radius: u32) -> u64 {
    let reach = (MAX_REACH * f64::from(radius)).ceil() as u64;
    2 * (reach + feather_padding(radius).unsigned_abs()) + 1
}

/// A binary droplet silhouette on a padded canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMask {
    image: GrayImage,
    anchor: (u32, u32),
}

impl ShapeMask {
    /// Mask pixels: [`OPAQUE`] inside the silhouette, 0 outside.
    #[must_use]
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Pixel position of the droplet center within the mask.
    #[must_use]
    pub fn anchor(&self) -> (u32, u32) {
        self.anchor
    }

    /// Canvas width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Canvas height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Number of opaque pixels.
    #[must_use]
    pub fn coverage(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == OPAQUE).count()
    }

    /// Mask covering exactly the given image pixels, anchored at the pixel
    /// nearest `center` and padded for feathering at `radius`.
    ///
    /// Used for droplets that take their outline from a label region.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_pixels(pixels: &[(u32, u32)], center: (f64, f64), radius: u32) -> Self {
        let (cx, cy) = (center.0.round() as i64, center.1.round() as i64);
        let local: Vec<(i64, i64)> = pixels
            .iter()
            .map(|&(x, y)| (i64::from(x) - cx, i64::from(y) - cy))
            .collect();
        let bounds = local.iter().fold((0, 0, 0, 0), |(x0, y0, x1, y1), &(x, y)| {
            (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
        });

        let mut mask = blank_canvas(bounds, feather_padding(radius));
        for (x, y) in local {
            let px = (x + i64::from(mask.anchor.0)) as u32;
            let py = (y + i64::from(mask.anchor.1)) as u32;
            mask.image.put_pixel(px, py, Luma([OPAQUE]));
        }
        mask
    }
}

/// Empty canvas around integer bounds `(min_x, min_y, max_x, max_y)` that
/// contain the origin, with `pad` extra pixels on every side.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blank_canvas(bounds: (i64, i64, i64, i64), pad: i64) -> ShapeMask {
    let (x0, y0, x1, y1) = bounds;
    let left = x0.min(0) - pad;
    let top = y0.min(0) - pad;
    let width = (x1.max(0) + pad - left + 1) as u32;
    let height = (y1.max(0) + pad - top + 1) as u32;
    ShapeMask {
        image: GrayImage::new(width, height),
        anchor: ((-left) as u32, (-top) as u32),
    }
}

#[derive(Debug, Clone)]
struct Harmonic {
    amplitude: f64,
    frequency: f64,
    phase: f64,
}

#[derive(Debug, Clone)]
enum Primitive {
    Circle {
        cx: f64,
        cy: f64,
        r: f64,
    },
    /// Ellipse centered on the droplet center, rotated by `angle` radians.
    /// `lower_half` keeps only the part below the rotated major axis.
    Ellipse {
        a: f64,
        b: f64,
        angle: f64,
        lower_half: bool,
    },
    Polar {
        r: f64,
        terms: Vec<Harmonic>,
    },
}

impl Primitive {
    /// Bounding box `(min_x, min_y, max_x, max_y)` enclosing the primitive.
    fn extent(&self) -> (f64, f64, f64, f64) {
        match self {
            Primitive::Circle { cx, cy, r } => (cx - r, cy - r, cx + r, cy + r),
            Primitive::Ellipse {
                a,
                b,
                angle,
                lower_half,
            } => {
                let (sin, cos) = angle.sin_cos();
                let half_w = (a * a * cos * cos + b * b * sin * sin).sqrt();
                let half_h = (a * a * sin * sin + b * b * cos * cos).sqrt();
                if *lower_half && cos >= 0.0 {
                    // the kept half lies below the rotated major axis, whose
                    // endpoints are the highest points of that half
                    (-half_w, -(a * sin.abs()), half_w, half_h)
                } else {
                    (-half_w, -half_h, half_w, half_h)
                }
            }
            Primitive::Polar { r, terms } => {
                let reach = r * (1.0 + terms.iter().map(|t| t.amplitude).sum::<f64>());
                (-reach, -reach, reach, reach)
            }
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Primitive::Circle { cx, cy, r } => {
                let (dx, dy) = (x - cx, y - cy);
                dx * dx + dy * dy <= r * r
            }
            Primitive::Ellipse {
                a,
                b,
                angle,
                lower_half,
            } => {
                if *a <= 0.0 || *b <= 0.0 {
                    return false;
                }
                let (sin, cos) = angle.sin_cos();
                let u = x * cos + y * sin;
                let v = -x * sin + y * cos;
                if *lower_half && v < 0.0 {
                    return false;
                }
                (u / a).powi(2) + (v / b).powi(2) <= 1.0
            }
            Primitive::Polar { r, terms } => {
                let t = y.atan2(x);
                let rim = r * (1.0
                    + terms
                        .iter()
                        .map(|h| h.amplitude * (h.frequency * t + h.phase).cos())
                        .sum::<f64>());
                x.hypot(y) <= rim
            }
        }
    }
}

/// Rasterize `outline` onto a canvas fitted to its opaque pixels plus `pad`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rasterize(outline: &[Primitive], pad: i64) -> ShapeMask {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0.0_f64, 0.0_f64, 0.0_f64, 0.0_f64);
    for part in outline {
        let (x0, y0, x1, y1) = part.extent();
        min_x = min_x.min(x0);
        min_y = min_y.min(y0);
        max_x = max_x.max(x1);
        max_y = max_y.max(y1);
    }

    let inside = |x: i64, y: i64| {
        #[allow(clippy::cast_precision_loss)]
        let (fx, fy) = (x as f64, y as f64);
        outline.iter().any(|part| part.contains(fx, fy))
    };

    // shrink the analytic box to the pixels actually covered
    let mut bounds = (0_i64, 0_i64, 0_i64, 0_i64);
    for y in (min_y.floor() as i64)..=(max_y.ceil() as i64) {
        for x in (min_x.floor() as i64)..=(max_x.ceil() as i64) {
            if inside(x, y) {
                bounds = (
                    bounds.0.min(x),
                    bounds.1.min(y),
                    bounds.2.max(x),
                    bounds.3.max(y),
                );
            }
        }
    }

    let mut mask = blank_canvas(bounds, pad);
    let (ax, ay) = (i64::from(mask.anchor.0), i64::from(mask.anchor.1));
    for (px, py, p) in mask.image.enumerate_pixels_mut() {
        if inside(i64::from(px) - ax, i64::from(py) - ay) {
            *p = Luma([OPAQUE]);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn is_binary(mask: &ShapeMask) -> bool {
        mask.image().pixels().all(|p| p[0] == 0 || p[0] == OPAQUE)
    }

    /// Farthest opaque pixel from the anchor in each direction: (left, up, right, down).
    fn reach(mask: &ShapeMask) -> (i64, i64, i64, i64) {
        let (ax, ay) = mask.anchor();
        let (mut l, mut u, mut r, mut d) = (0, 0, 0, 0);
        for (x, y, p) in mask.image().enumerate_pixels() {
            if p[0] == OPAQUE {
                let dx = i64::from(x) - i64::from(ax);
                let dy = i64::from(y) - i64::from(ay);
                l = l.max(-dx);
                r = r.max(dx);
                u = u.max(-dy);
                d = d.max(dy);
            }
        }
        (l, u, r, d)
    }

    #[test]
    fn shape_names_round_trip_through_from_str() {
        for kind in ShapeKind::ALL {
            assert_eq!(kind.name().parse::<ShapeKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.name());
        }
        assert_eq!(" Oval ".parse::<ShapeKind>().unwrap(), ShapeKind::Oval);
        assert!("hexagon".parse::<ShapeKind>().is_err());
    }

    #[test]
    fn round_mask_is_a_centered_disk() {
        let mut rng = StdRng::seed_from_u64(1);
        let mask = ShapeKind::Round.build_mask(20, &mut rng);
        assert!(is_binary(&mask));
        assert_eq!(reach(&mask), (20, 20, 20, 20));
        assert_eq!(mask.width(), mask.height());
        assert_eq!(mask.anchor(), (mask.width() / 2, mask.height() / 2));

        #[allow(clippy::cast_precision_loss)]
        let area = mask.coverage() as f64;
        let expected = PI * 400.0;
        assert!((area - expected).abs() / expected < 0.05, "area {area}");
    }

    #[test]
    fn deterministic_shapes_ignore_the_rng() {
        let a = ShapeKind::Default.build_mask(15, &mut StdRng::seed_from_u64(1));
        let b = ShapeKind::Default.build_mask(15, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
        let a = ShapeKind::Round.build_mask(15, &mut StdRng::seed_from_u64(1));
        let b = ShapeKind::Round.build_mask(15, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn default_drop_trails_a_tail_below_the_center() {
        let mask = ShapeKind::Default.build_mask(20, &mut StdRng::seed_from_u64(3));
        let (left, up, right, down) = reach(&mask);
        assert_eq!((left, up, right), (20, 20, 20));
        assert!((44..=46).contains(&down), "tail reach {down}");
    }

    #[test]
    fn padding_never_exceeds_the_radius() {
        for radius in [2_u32, 3, 5, 20, 36, 60, 500] {
            let pad = feather_padding(radius);
            assert!(pad <= i64::from(radius), "radius {radius}, pad {pad}");
        }
    }

    #[test]
    fn canvas_fits_the_opaque_pixels_plus_padding() {
        let mut rng = StdRng::seed_from_u64(6);
        for kind in ShapeKind::ALL {
            for radius in [1_u32, 3, 8, 20, 45] {
                for _ in 0..4 {
                    let mask = kind.build_mask(radius, &mut rng);
                    let pad = feather_padding(radius);
                    let (ax, ay) = (i64::from(mask.anchor().0), i64::from(mask.anchor().1));
                    let (w, h) = (i64::from(mask.width()), i64::from(mask.height()));
                    let (l, u, r, d) = reach(&mask);
                    let sides = (ax - l, ay - u, w - 1 - ax - r, h - 1 - ay - d);
                    assert_eq!(sides, (pad, pad, pad, pad), "{kind} at radius {radius}");
                    assert!(u64::from(mask.width()) <= max_canvas_side(radius));
                    assert!(u64::from(mask.height()) <= max_canvas_side(radius));
                }
            }
        }
    }

    #[test]
    fn default_canvas_hugs_the_tail() {
        let mask = ShapeKind::Default.build_mask(20, &mut StdRng::seed_from_u64(0));
        let pad = u32::try_from(feather_padding(20)).unwrap();
        assert_eq!(mask.width(), 41 + 2 * pad);
        assert_eq!(mask.anchor().1, 20 + pad);
        assert!(mask.height() < 41 + 2 * pad + 30, "height {}", mask.height());
    }

    #[test]
    fn region_mask_covers_exactly_its_pixels() {
        let pixels: Vec<(u32, u32)> = (10..170).flat_map(|x| (50..60).map(move |y| (x, y))).collect();
        let mask = ShapeMask::from_pixels(&pixels, (89.5, 54.5), 80);
        assert_eq!(mask.coverage(), pixels.len());
        let pad = u32::try_from(feather_padding(80)).unwrap();
        assert_eq!(mask.width(), 160 + 2 * pad);
        assert_eq!(mask.height(), 10 + 2 * pad);
        let (ax, ay) = mask.anchor();
        assert_eq!(mask.image().get_pixel(ax, ay)[0], OPAQUE);
    }

    #[test]
    fn irregular_rim_stays_near_the_base_radius() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10 {
            let mask = ShapeKind::Irregular.build_mask(30, &mut rng);
            assert!(is_binary(&mask));
            let (l, u, r, d) = reach(&mask);
            for extent in [l, u, r, d] {
                assert!((21..=39).contains(&extent), "extent {extent}");
            }
        }
    }

    #[test]
    fn oval_is_elongated() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let mask = ShapeKind::Oval.build_mask(20, &mut rng);
            #[allow(clippy::cast_precision_loss)]
            let area = mask.coverage() as f64;
            // aspect in [1.2, 2.0] scales the disk area accordingly
            assert!(area > PI * 400.0 * 1.1 && area < PI * 400.0 * 2.1, "area {area}");
        }
    }

    #[test]
    fn splash_adds_satellites_beyond_the_main_body() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..10 {
            let mask = ShapeKind::Splash.build_mask(20, &mut rng);
            let (l, u, r, d) = reach(&mask);
            assert!(l.max(u).max(r).max(d) > 14, "no satellite outside main circle");
            assert!(l.max(u).max(r).max(d) <= 40);
        }
    }

    #[test]
    fn teardrop_varies_between_calls() {
        let mut rng = StdRng::seed_from_u64(17);
        let masks: Vec<_> = (0..5)
            .map(|_| ShapeKind::Teardrop.build_mask(25, &mut rng))
            .collect();
        assert!(masks.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn zero_radius_still_produces_a_mask() {
        let mask = ShapeKind::Default.build_mask(0, &mut StdRng::seed_from_u64(0));
        assert!(mask.width() >= 1 && mask.height() >= 1);
        assert_eq!(mask.coverage(), 1);
        let (ax, ay) = mask.anchor();
        assert_eq!(mask.image().get_pixel(ax, ay)[0], OPAQUE);
    }
}
