//! Synthesize realistic raindrop occlusions on images.
//!
//! Droplets are placed at random (or on the regions of a caller-supplied
//! label image), overlapping droplets are merged, and each survivor is
//! rendered as a small fisheye lens: the background under it is refracted,
//! flipped and blurred, then blended in through a feathered alpha map with a
//! darkened rim.
//!
//! # Quick Start
//!
//! ```no_run
//! use raindrop_synth::{generate, DropConfig};
//! use rand::SeedableRng;
//!
//! let img = image::open("photo.jpg").unwrap().to_rgb8();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let out = generate(&img, &DropConfig::default(), None, &mut rng).unwrap();
//! out.image.save("photo_rain.jpg").unwrap();
//! ```
//!
//! # Training pipelines
//!
//! [`RaindropAugmentation`] applies a configuration to a random fraction of
//! images and never fails; images that cannot be decorated pass through.
//!
//! ```no_run
//! use raindrop_synth::RaindropAugmentation;
//!
//! let aug = RaindropAugmentation::pose_estimation(0.4).unwrap();
//! let img = image::open("frame.png").unwrap().to_rgb8();
//! let img = aug.apply(img, &mut rand::rng());
//! ```

#![deny(missing_docs)]

pub mod augment;
pub mod blending;
pub mod collision;
pub mod config;
pub mod droplet;
mod engine;
pub mod error;
pub mod optics;
pub mod placement;
pub mod shape;

pub use augment::RaindropAugmentation;
pub use collision::Resolution;
pub use config::DropConfig;
pub use droplet::{Droplet, DropletArena, DropletKey};
pub use engine::{
    default_label_path, default_output_path, generate, generate_from_path, is_supported_image,
    load_image, load_label, save_image, save_label, DropGenerator, DropletInfo, FileJob,
    Generated, ProcessResult, MAX_IMAGE_PIXELS,
};
pub use error::{Error, Result};
pub use shape::{ShapeKind, ShapeMask};
