//! Probabilistic wrapper for use inside training-data pipelines.

use image::RgbImage;
use rand::Rng;

use crate::config::DropConfig;
use crate::engine::DropGenerator;
use crate::error::{Error, Result};

/// Probability used by the pose-estimation constructors when none is given.
pub const DEFAULT_PROBABILITY: f64 = 0.4;

/// Adds droplets to a fraction of the images passed through it.
///
/// Failures never interrupt the pipeline: an image that cannot be decorated
/// is returned unchanged and a warning is logged.
#[derive(Debug, Clone)]
pub struct RaindropAugmentation {
    probability: f64,
    generator: DropGenerator,
}

impl RaindropAugmentation {
    /// Apply `config` to each image with the given probability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `probability` is outside
    /// `[0, 1]` or `config` is invalid.
    pub fn new(probability: f64, config: DropConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(Error::InvalidConfiguration(format!(
                "probability must be within [0, 1], got {probability}"
            )));
        }
        Ok(Self {
            probability,
            generator: DropGenerator::new(config)?,
        })
    }

    /// Augmentation with [`DropConfig::pose_estimation`].
    ///
    /// # Errors
    ///
    /// See [`RaindropAugmentation::new`].
    pub fn pose_estimation(probability: f64) -> Result<Self> {
        Self::new(probability, DropConfig::pose_estimation())
    }

    /// Augmentation with [`DropConfig::pose_estimation_stage1`].
    ///
    /// # Errors
    ///
    /// See [`RaindropAugmentation::new`].
    pub fn pose_estimation_stage1(probability: f64) -> Result<Self> {
        Self::new(probability, DropConfig::pose_estimation_stage1())
    }

    /// Chance that [`RaindropAugmentation::apply`] decorates an image.
    #[must_use]
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// The underlying generator.
    #[must_use]
    pub fn generator(&self) -> &DropGenerator {
        &self.generator
    }

    /// Decorate `image` with probability [`Self::probability`].
    pub fn apply<R: Rng + ?Sized>(&self, image: RgbImage, rng: &mut R) -> RgbImage {
        if !rng.random_bool(self.probability) {
            return image;
        }
        match self.generator.generate(&image, None, rng) {
            Ok(generated) => generated.image,
            Err(e) => {
                log::warn!("raindrop augmentation skipped: {e}");
                image
            }
        }
    }
}
