//! Lens refraction model for droplet textures.
//!
//! A water droplet on glass behaves like a tiny wide-angle lens: the scene
//! behind it appears magnified, compressed toward the rim and upside down.
//! The model here is a zero-distortion fisheye camera whose focal lengths
//! grow with the droplet radius:
//!
//! - intrinsics: `fx = 30 R`, `fy = 20 R`, principal point at the crop center
//! - re-projection focal lengths scaled by `s = 2 * cbrt(R)`
//! - per output pixel: `x = (u - cx) / (fx s)`, `r = |(x, y)|`,
//!   source `= c + f * (x, y) * atan(r) / r`
//!
//! The remapped crop is flipped vertically, blurred to mimic the droplet's
//! shallow focal depth, and combined with a feathered copy of the shape mask
//! as alpha. When the lens cannot be evaluated the unmodified crop is used
//! instead; rendering itself never fails.

use image::{imageops, GrayImage, ImageBuffer, Luma, Rgb, Rgb32FImage, RgbImage, Rgba, RgbaImage};
use imageproc::filter::gaussian_blur_f32;

use crate::shape::ShapeMask;

/// Why the lens remap could not be computed for a droplet.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpticalError {
    /// The focal lengths or magnification are zero or not finite.
    #[error("degenerate lens for radius {radius}")]
    DegenerateLens {
        /// Droplet radius in pixels.
        radius: u32,
    },

    /// The remap produced a non-finite source coordinate.
    #[error("non-finite source coordinate for output pixel ({x}, {y})")]
    NonFiniteMapping {
        /// Output pixel column.
        x: u32,
        /// Output pixel row.
        y: u32,
    },
}

/// Fisheye lens parameters for one droplet crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LensModel {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    scale: f64,
}

impl LensModel {
    /// Build the lens for a droplet of `radius` over a `width` x `height` crop.
    ///
    /// # Errors
    ///
    /// Returns [`OpticalError::DegenerateLens`] when the radius yields zero or
    /// non-finite focal lengths (in particular for `radius == 0`).
    pub fn for_droplet(radius: u32, width: u32, height: u32) -> Result<Self, OpticalError> {
        let r = f64::from(radius);
        let fx = 30.0 * r;
        let fy = 20.0 * r;
        let scale = 2.0 * r.cbrt();

        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !(usable(fx) && usable(fy) && usable(scale)) {
            return Err(OpticalError::DegenerateLens { radius });
        }

        Ok(Self {
            fx,
            fy,
            cx: f64::from(width) / 2.0,
            cy: f64::from(height) / 2.0,
            scale,
        })
    }

    /// Zoom factor at the optical center.
    #[must_use]
    pub fn magnification(&self) -> f64 {
        self.scale
    }

    /// Source coordinate in the crop that output pixel `(u, v)` samples.
    #[must_use]
    pub fn source_of(&self, u: f64, v: f64) -> (f64, f64) {
        let x = (u - self.cx) / (self.fx * self.scale);
        let y = (v - self.cy) / (self.fy * self.scale);
        let r = x.hypot(y);
        let k = if r < 1e-12 { 1.0 } else { r.atan() / r };
        (self.cx + self.fx * x * k, self.cy + self.fy * y * k)
    }

    /// Resample `crop` through the lens.
    ///
    /// # Errors
    ///
    /// Returns [`OpticalError::NonFiniteMapping`] at the first output pixel
    /// whose source coordinate is not finite.
    pub fn remap(&self, crop: &RgbImage) -> Result<RgbImage, OpticalError> {
        let (width, height) = crop.dimensions();
        let mut out = RgbImage::new(width, height);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let (sx, sy) = self.source_of(f64::from(x), f64::from(y));
            if !(sx.is_finite() && sy.is_finite()) {
                return Err(OpticalError::NonFiniteMapping { x, y });
            }
            *px = sample_bilinear(crop, sx, sy);
        }
        Ok(out)
    }
}

/// Output of rendering one droplet.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    texture: RgbaImage,
    alpha: GrayImage,
    fallback: bool,
}

impl Rendered {
    /// Refracted color with the alpha map in the fourth channel.
    #[must_use]
    pub fn texture(&self) -> &RgbaImage {
        &self.texture
    }

    /// Feathered opacity, normalized so its maximum is 255.
    #[must_use]
    pub fn alpha_map(&self) -> &GrayImage {
        &self.alpha
    }

    /// Whether the lens failed and the unrefracted crop was used.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

/// Render a droplet texture from the background `crop` it covers.
///
/// `crop` must have the same dimensions as `mask`. Lens failures are logged
/// and replaced by the unmodified crop.
#[must_use]
pub fn render(crop: &RgbImage, mask: &ShapeMask, radius: u32, feather_sigma: f32) -> Rendered {
    debug_assert_eq!(crop.dimensions(), mask.image().dimensions());

    let alpha = alpha_map(mask.image(), feather_sigma);
    let refracted = LensModel::for_droplet(radius, crop.width(), crop.height())
        .and_then(|lens| lens.remap(crop));

    let (color, fallback) = match refracted {
        Ok(remapped) => {
            let inverted = imageops::flip_vertical(&remapped);
            (blur_rgb(&inverted, lens_blur_sigma(radius)), false)
        }
        Err(e) => {
            log::warn!("lens remap failed ({e}); using the unrefracted background");
            (crop.clone(), true)
        }
    };

    let texture = RgbaImage::from_fn(color.width(), color.height(), |x, y| {
        let Rgb([r, g, b]) = *color.get_pixel(x, y);
        Rgba([r, g, b, alpha.get_pixel(x, y)[0]])
    });

    Rendered {
        texture,
        alpha,
        fallback,
    }
}

/// Feather a binary mask with a Gaussian blur and stretch it back to 255.
#[must_use]
pub fn alpha_map(mask: &GrayImage, sigma: f32) -> GrayImage {
    let levels: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(mask.width(), mask.height(), |x, y| {
            Luma([f32::from(mask.get_pixel(x, y)[0])])
        });
    let blurred = if sigma > 0.0 {
        gaussian_blur_f32(&levels, sigma)
    } else {
        levels
    };

    let peak = blurred.pixels().map(|p| p[0]).fold(0.0_f32, f32::max);
    if peak <= 0.0 {
        return GrayImage::new(mask.width(), mask.height());
    }

    let gain = 255.0 / peak;
    GrayImage::from_fn(blurred.width(), blurred.height(), |x, y| {
        Luma([to_level(blurred.get_pixel(x, y)[0] * gain)])
    })
}

/// Gaussian blur carried out in floating point, rounded once at the end.
///
/// Blurring `u8` buffers directly truncates after each separable pass, which
/// darkens flat regions by a level or two.
fn blur_rgb(image: &RgbImage, sigma: f32) -> RgbImage {
    let levels = Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        Rgb([f32::from(r), f32::from(g), f32::from(b)])
    });
    let blurred = gaussian_blur_f32(&levels, sigma);
    RgbImage::from_fn(blurred.width(), blurred.height(), |x, y| {
        let Rgb([r, g, b]) = *blurred.get_pixel(x, y);
        Rgb([to_level(r), to_level(g), to_level(b)])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_level(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Surface blur applied after refraction.
fn lens_blur_sigma(radius: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let quarter = radius as f32 / 4.0;
    quarter.clamp(1.0, 5.0)
}

/// Bilinear sample with edge clamping.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let max_x = f64::from(img.width().saturating_sub(1));
    let max_y = f64::from(img.height().saturating_sub(1));
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let tx = x - x0;
    let ty = y - y0;

    let p00 = img.get_pixel(x0 as u32, y0 as u32);
    let p10 = img.get_pixel(x1 as u32, y0 as u32);
    let p01 = img.get_pixel(x0 as u32, y1 as u32);
    let p11 = img.get_pixel(x1 as u32, y1 as u32);

    let mut out = [0u8; 3];
    for (ch, o) in out.iter_mut().enumerate() {
        let top = f64::from(p00[ch]) * (1.0 - tx) + f64::from(p10[ch]) * tx;
        let bottom = f64::from(p01[ch]) * (1.0 - tx) + f64::from(p11[ch]) * tx;
        *o = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
