//! Error types for the raindrop-synth crate.

use std::path::PathBuf;

/// Errors that abort a droplet generation call.
///
/// Failures of the per-droplet lens model are not represented here: they are
/// recovered inside [`crate::optics`] and never surface to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input image path does not resolve to a readable file.
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// The image could not be decoded, or the output format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Out-of-range or contradictory configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The input label does not have the same dimensions as the image.
    #[error("label is {label_width}x{label_height} but image is {width}x{height}")]
    LabelSizeMismatch {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Label width in pixels.
        label_width: u32,
        /// Label height in pixels.
        label_height: u32,
    },

    /// The image has no pixels to place droplets on.
    #[error("image is empty ({width}x{height})")]
    EmptyImage {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },

    /// The image is too large to process within the working-buffer limits.
    #[error("insufficient resources: {0}")]
    ResourceExhaustion(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred while encoding or saving an image.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
