//! Alpha compositing and rim darkening.
//!
//! Droplet textures are laid over the photo with standard "over" blending:
//! `out = src * (1 - alpha) + texture * alpha`
//!
//! Rim darkening multiplies the pixels in each droplet's alpha falloff band by
//! `1 - ratio`. Bands from several droplets are merged first so that no pixel
//! is darkened twice.

use image::{GrayImage, Luma, RgbImage, RgbaImage};

/// Lower bound of the rim band, as a fraction of full opacity.
pub const EDGE_BAND_LOW: f32 = 0.2;

/// Upper bound of the rim band, as a fraction of full opacity.
pub const EDGE_BAND_HIGH: f32 = 0.5;

/// Pixel range of a `width` x `height` patch at `origin` clipped to the image.
///
/// Returns `(x0, y0, x1, y1)` in image coordinates, or `None` if the patch
/// lies entirely outside.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clip(image_w: u32, image_h: u32, origin: (i64, i64), width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = origin.0.max(0);
    let y0 = origin.1.max(0);
    let x1 = (origin.0 + i64::from(width)).min(i64::from(image_w));
    let y1 = (origin.1 + i64::from(height)).min(i64::from(image_h));
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

/// Blend `texture` over `image` with its top-left corner at `origin`.
///
/// `alpha` weights each texture pixel and must match the texture's
/// dimensions. Parts of the texture outside the image are ignored.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn composite_over(image: &mut RgbImage, texture: &RgbaImage, alpha: &GrayImage, origin: (i64, i64)) {
    debug_assert_eq!(texture.dimensions(), alpha.dimensions());
    let Some((x0, y0, x1, y1)) = clip(
        image.width(),
        image.height(),
        origin,
        texture.width(),
        texture.height(),
    ) else {
        return;
    };

    for y in y0..y1 {
        for x in x0..x1 {
            let tx = (i64::from(x) - origin.0) as u32;
            let ty = (i64::from(y) - origin.1) as u32;
            let a = f32::from(alpha.get_pixel(tx, ty)[0]) / 255.0;
            if a <= 0.0 {
                continue;
            }
            let tex = texture.get_pixel(tx, ty);
            let px = image.get_pixel_mut(x, y);
            for ch in 0..3 {
                let blended = f32::from(px[ch]) * (1.0 - a) + f32::from(tex[ch]) * a;
                px[ch] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Mark the pixels of `band` where `alpha` lies within the rim band.
///
/// `band` has the image's dimensions; `alpha` is placed at `origin`.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn mark_edge_band(band: &mut GrayImage, alpha: &GrayImage, origin: (i64, i64)) {
    let Some((x0, y0, x1, y1)) = clip(band.width(), band.height(), origin, alpha.width(), alpha.height())
    else {
        return;
    };

    let low = EDGE_BAND_LOW * 255.0;
    let high = EDGE_BAND_HIGH * 255.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let ax = (i64::from(x) - origin.0) as u32;
            let ay = (i64::from(y) - origin.1) as u32;
            let a = f32::from(alpha.get_pixel(ax, ay)[0]);
            if (low..=high).contains(&a) {
                band.put_pixel(x, y, Luma([255]));
            }
        }
    }
}

/// Multiply every pixel marked in `band` by `1 - ratio`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn darken_band(image: &mut RgbImage, band: &GrayImage, ratio: f32) {
    debug_assert_eq!(image.dimensions(), band.dimensions());
    let keep = (1.0 - ratio).clamp(0.0, 1.0);
    for (px, mark) in image.pixels_mut().zip(band.pixels()) {
        if mark[0] == 0 {
            continue;
        }
        for ch in 0..3 {
            px[ch] = (f32::from(px[ch]) * keep).round().clamp(0.0, 255.0) as u8;
        }
    }
}
