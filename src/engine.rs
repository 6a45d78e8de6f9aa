//! Scene composition: placement, collision resolution, rendering and
//! compositing for one image.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageError, ImageFormat, ImageReader, Luma, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use rand::Rng;

use crate::blending;
use crate::collision::{self, Resolution};
use crate::config::DropConfig;
use crate::droplet::{Droplet, DropletArena, DropletKey};
use crate::error::{Error, Result};
use crate::placement;
use crate::shape::{self, ShapeKind};

/// Largest image, in pixels, accepted for processing.
///
/// Larger images should be downscaled by the caller.
pub const MAX_IMAGE_PIXELS: u64 = 1 << 28;

/// Summary of one droplet painted into the output.
#[derive(Debug, Clone, PartialEq)]
pub struct DropletInfo {
    /// Key within the generation run.
    pub key: DropletKey,
    /// Center in image coordinates.
    pub center: (f64, f64),
    /// Radius in pixels.
    pub radius: u32,
    /// Silhouette family.
    pub shape: ShapeKind,
    /// Keys of the candidates merged into this droplet.
    pub merged_from: Vec<DropletKey>,
    /// Whether the lens model failed and the plain background was used.
    pub fallback: bool,
}

/// Output of one generation call.
#[derive(Debug, Clone)]
pub struct Generated {
    /// The composited image, same dimensions as the input.
    pub image: RgbImage,
    /// Droplet footprints at 255, present when labels were requested.
    pub label: Option<GrayImage>,
    /// Droplets painted into `image`, in compositing order.
    pub droplets: Vec<DropletInfo>,
    /// Statistics of the collision resolution.
    pub resolution: Resolution,
}

/// Paths for processing one image file.
#[derive(Debug, Clone)]
pub struct FileJob {
    /// Image to decorate.
    pub input: PathBuf,
    /// Where to write the decorated image.
    pub output: PathBuf,
    /// Optional label image driving droplet placement.
    pub label_input: Option<PathBuf>,
    /// Where to write the droplet label mask, if wanted.
    pub label_output: Option<PathBuf>,
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Number of droplets painted.
    pub droplets: usize,
    /// Number of droplets rendered without refraction.
    pub fallbacks: usize,
    /// Human-readable status message.
    pub message: String,
}

/// Droplet generator bound to one validated configuration.
///
/// Construction fails fast on invalid configuration, before any image is
/// decoded. The generator holds no mutable state, so one instance may serve
/// many threads as long as each call brings its own random source.
#[derive(Debug, Clone)]
pub struct DropGenerator {
    config: DropConfig,
}

impl DropGenerator {
    /// Validate `config` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if validation fails.
    pub fn new(config: DropConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &DropConfig {
        &self.config
    }

    /// Decorate `image` with droplets.
    ///
    /// With `input_label`, droplets are placed on its connected regions above
    /// the label threshold; otherwise they are placed at random.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyImage`], [`Error::ResourceExhaustion`] or
    /// [`Error::LabelSizeMismatch`] for unusable inputs.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        image: &RgbImage,
        input_label: Option<&GrayImage>,
        rng: &mut R,
    ) -> Result<Generated> {
        self.compose(image, input_label, self.config.return_label, rng)
    }

    /// Decode the image (and optional label) at the given paths and decorate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputNotFound`] or [`Error::UnsupportedFormat`] for
    /// unreadable files, and the errors of [`DropGenerator::generate`].
    pub fn generate_from_path<R: Rng + ?Sized>(
        &self,
        path: &Path,
        label_path: Option<&Path>,
        rng: &mut R,
    ) -> Result<Generated> {
        let image = load_image(path)?;
        let label = label_path.map(load_label).transpose()?;
        self.generate(&image, label.as_ref(), rng)
    }

    /// Process a single image file: load, decorate, save.
    ///
    /// A label is written whenever `job.label_output` is set, regardless of
    /// the configured `return_label`.
    #[must_use]
    pub fn process_file<R: Rng + ?Sized>(&self, job: &FileJob, rng: &mut R) -> ProcessResult {
        let mut result = ProcessResult {
            path: job.input.clone(),
            success: false,
            droplets: 0,
            fallbacks: 0,
            message: String::new(),
        };

        let loaded = load_image(&job.input).and_then(|image| {
            let label = job.label_input.as_deref().map(load_label).transpose()?;
            Ok((image, label))
        });
        let (image, label) = match loaded {
            Ok(pair) => pair,
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        let emit_label = self.config.return_label || job.label_output.is_some();
        let generated = match self.compose(&image, label.as_ref(), emit_label, rng) {
            Ok(g) => g,
            Err(e) => {
                result.message = format!("Failed to generate droplets: {e}");
                return result;
            }
        };
        result.droplets = generated.droplets.len();
        result.fallbacks = generated.droplets.iter().filter(|d| d.fallback).count();

        for target in std::iter::once(&job.output).chain(job.label_output.as_ref()) {
            if let Some(parent) = target.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        result.message = format!("Failed to create output directory: {e}");
                        return result;
                    }
                }
            }
        }

        if let Err(e) = save_image(&generated.image, &job.output) {
            result.message = format!("Failed to save: {e}");
            return result;
        }
        if let (Some(path), Some(label)) = (&job.label_output, &generated.label) {
            if let Err(e) = save_label(label, path) {
                result.message = format!("Failed to save label: {e}");
                return result;
            }
        }

        result.success = true;
        result.message = format!("Added {} droplets", result.droplets);
        result
    }

    fn compose<R: Rng + ?Sized>(
        &self,
        image: &RgbImage,
        input_label: Option<&GrayImage>,
        emit_label: bool,
        rng: &mut R,
    ) -> Result<Generated> {
        let (width, height) = image.dimensions();
        check_dimensions(width, height)?;
        if let Some(label) = input_label {
            if label.dimensions() != (width, height) {
                return Err(Error::LabelSizeMismatch {
                    width,
                    height,
                    label_width: label.width(),
                    label_height: label.height(),
                });
            }
        }

        let mut arena = DropletArena::new();
        let candidates = match input_label {
            Some(label) => placement::label_candidates(&mut arena, label, &self.config, rng),
            None => placement::random_candidates(&mut arena, width, height, &self.config, rng),
        };
        let resolution = collision::resolve(&mut arena, &candidates, self.config.max_merge_passes);
        log::debug!(
            "placed {} candidates, {} survive after {} merges in {} passes",
            candidates.len(),
            resolution.survivors.len(),
            resolution.merges,
            resolution.passes
        );
        if !resolution.converged {
            log::debug!(
                "collision resolution stopped at the {}-pass cap",
                self.config.max_merge_passes
            );
        }

        for &key in &resolution.survivors {
            if let Some(droplet) = arena.get(key) {
                check_canvas(droplet)?;
            }
        }

        let mut output = image.clone();
        let mut band = GrayImage::new(width, height);
        let mut label = emit_label.then(|| GrayImage::new(width, height));
        let mut droplets = Vec::with_capacity(resolution.survivors.len());

        for &key in &resolution.survivors {
            let Some(droplet) = arena.get_mut(key) else {
                continue;
            };
            if !droplet.intersects_image(width, height) {
                log::debug!("droplet {key} lies outside the image, skipping");
                continue;
            }

            let rendered = droplet.render(image);
            blending::composite_over(
                &mut output,
                rendered.texture(),
                rendered.alpha_map(),
                rendered.origin(),
            );
            blending::mark_edge_band(&mut band, rendered.alpha_map(), rendered.origin());
            let fallback = rendered.is_fallback();

            if let Some(label) = label.as_mut() {
                paint_footprint(label, droplet);
            }
            droplets.push(DropletInfo {
                key,
                center: droplet.center(),
                radius: droplet.radius(),
                shape: droplet.shape(),
                merged_from: droplet.merged_from().to_vec(),
                fallback,
            });
        }

        blending::darken_band(&mut output, &band, self.config.edge_dark_ratio);

        Ok(Generated {
            image: output,
            label,
            droplets,
            resolution,
        })
    }
}

/// Decorate `image` with droplets using `config`.
///
/// Equivalent to `DropGenerator::new(config.clone())?.generate(..)`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfiguration`] before doing any work if `config`
/// is invalid, and the errors of [`DropGenerator::generate`] otherwise.
pub fn generate<R: Rng + ?Sized>(
    image: &RgbImage,
    config: &DropConfig,
    input_label: Option<&GrayImage>,
    rng: &mut R,
) -> Result<Generated> {
    DropGenerator::new(config.clone())?.generate(image, input_label, rng)
}

/// Decode the image at `path` and decorate it with droplets using `config`.
///
/// The configuration is validated before the file is touched.
///
/// # Errors
///
/// See [`generate`] and [`DropGenerator::generate_from_path`].
pub fn generate_from_path<R: Rng + ?Sized>(
    path: &Path,
    config: &DropConfig,
    label_path: Option<&Path>,
    rng: &mut R,
) -> Result<Generated> {
    DropGenerator::new(config.clone())?.generate_from_path(path, label_path, rng)
}

/// Paint a droplet's footprint: its label outline if it has one, otherwise
/// its bounding circle.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn paint_footprint(label: &mut GrayImage, droplet: &Droplet) {
    let (cx, cy) = droplet.center();
    let (cx, cy) = (cx.round() as i64, cy.round() as i64);

    let Some(outline) = droplet.outline() else {
        let radius = i32::try_from(droplet.radius()).unwrap_or(i32::MAX);
        let clamp = |v: i64| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        draw_filled_circle_mut(label, (clamp(cx), clamp(cy)), radius, Luma([255]));
        return;
    };

    let (ax, ay) = outline.anchor();
    let (width, height) = (i64::from(label.width()), i64::from(label.height()));
    for (x, y, p) in outline.image().enumerate_pixels() {
        if p[0] != shape::OPAQUE {
            continue;
        }
        let lx = cx + i64::from(x) - i64::from(ax);
        let ly = cy + i64::from(y) - i64::from(ay);
        if (0..width).contains(&lx) && (0..height).contains(&ly) {
            label.put_pixel(lx as u32, ly as u32, Luma([255]));
        }
    }
}

/// Refuse droplets whose render buffers would exceed the pixel limit.
fn check_canvas(droplet: &Droplet) -> Result<()> {
    let (width, height) = match droplet.outline() {
        Some(mask) => (u64::from(mask.width()), u64::from(mask.height())),
        None => {
            let side = shape::max_canvas_side(droplet.radius());
            (side, side)
        }
    };
    if width.saturating_mul(height) > MAX_IMAGE_PIXELS {
        return Err(Error::ResourceExhaustion(format!(
            "droplet of radius {} needs a {width}x{height} canvas, over the {MAX_IMAGE_PIXELS} pixel limit",
            droplet.radius()
        )));
    }
    Ok(())
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage { width, height });
    }
    if u64::from(width) * u64::from(height) > MAX_IMAGE_PIXELS {
        return Err(Error::ResourceExhaustion(format!(
            "{width}x{height} image exceeds the {MAX_IMAGE_PIXELS} pixel limit"
        )));
    }
    Ok(())
}

fn decode_error(err: ImageError) -> Error {
    match err {
        ImageError::Unsupported(_) | ImageError::Decoding(_) => {
            Error::UnsupportedFormat(err.to_string())
        }
        ImageError::Limits(_) => Error::ResourceExhaustion(err.to_string()),
        other => Error::Image(other),
    }
}

fn decode(path: &Path) -> Result<DynamicImage> {
    if !path.is_file() {
        return Err(Error::InputNotFound(path.to_path_buf()));
    }
    let (width, height) = ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()
        .map_err(decode_error)?;
    check_dimensions(width, height)?;

    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(decode_error)
}

/// Decode an image file into an RGB buffer.
///
/// The pixel count is checked against [`MAX_IMAGE_PIXELS`] before the pixel
/// data is decoded.
///
/// # Errors
///
/// Returns [`Error::InputNotFound`], [`Error::UnsupportedFormat`],
/// [`Error::EmptyImage`] or [`Error::ResourceExhaustion`].
pub fn load_image(path: &Path) -> Result<RgbImage> {
    Ok(decode(path)?.to_rgb8())
}

/// Decode a label file into a single-channel buffer.
///
/// # Errors
///
/// See [`load_image`].
pub fn load_label(path: &Path) -> Result<GrayImage> {
    Ok(decode(path)?.to_luma8())
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

fn save_dynamic(dyn_img: &DynamicImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(dyn_img)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            dyn_img.save(path)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Save an RGB image with format-specific quality settings.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    save_dynamic(&DynamicImage::ImageRgb8(img.clone()), path)
}

/// Save a label mask. Lossless formats are recommended.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_label(label: &GrayImage, path: &Path) -> Result<()> {
    save_dynamic(&DynamicImage::ImageLuma8(label.clone()), path)
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_rain.jpg"`, or `"photo_rain_2.jpg"`
/// for variant 2.
#[must_use]
pub fn default_output_path(input: &Path, variant: Option<usize>) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    match variant {
        Some(n) => parent.join(format!("{stem}_rain_{n}.{ext}")),
        None => parent.join(format!("{stem}_rain.{ext}")),
    }
}

/// Label path next to an output image: `"photo_rain.jpg"` becomes
/// `"photo_rain_label.png"`.
#[must_use]
pub fn default_label_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().unwrap_or_default().to_string_lossy();
    let parent = output.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_label.png"))
}
