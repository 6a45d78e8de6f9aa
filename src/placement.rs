//! Candidate droplet placement.
//!
//! Candidates come either from uniform random sampling within the configured
//! bounds, or from the connected regions of a caller-supplied label image.

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use rand::prelude::IndexedRandom;
use rand::Rng;

use crate::config::DropConfig;
use crate::droplet::{DropletArena, DropletKey};
use crate::shape::{ShapeKind, ShapeMask};

/// Geometry derived from one connected label region.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRegion {
    /// Centroid of the region's pixels.
    pub centroid: (f64, f64),
    /// Radius covering the region's bounding box extent.
    pub radius: u32,
    /// Number of pixels in the region.
    pub area: u64,
    /// The region's pixels in raster order.
    pub pixels: Vec<(u32, u32)>,
}

impl LabelRegion {
    /// Droplet mask with exactly this region's outline.
    #[must_use]
    pub fn mask(&self) -> ShapeMask {
        ShapeMask::from_pixels(&self.pixels, self.centroid, self.radius)
    }
}

/// Pick the shape for a new droplet.
fn pick_shape<R: Rng + ?Sized>(config: &DropConfig, rng: &mut R) -> ShapeKind {
    if config.shape_variety {
        config
            .allowed_shapes
            .choose(rng)
            .copied()
            .unwrap_or(ShapeKind::Default)
    } else {
        ShapeKind::Default
    }
}

/// Insert a random number of uniformly placed droplets into `arena`.
///
/// The caller guarantees a validated `config` and a non-empty image.
pub fn random_candidates<R: Rng + ?Sized>(
    arena: &mut DropletArena,
    width: u32,
    height: u32,
    config: &DropConfig,
    rng: &mut R,
) -> Vec<DropletKey> {
    let count = rng.random_range(config.min_drops..=config.max_drops);
    (0..count)
        .map(|_| {
            let center = (
                rng.random_range(0.0..f64::from(width)),
                rng.random_range(0.0..f64::from(height)),
            );
            let radius = rng.random_range(config.min_radius..=config.max_radius);
            let shape = pick_shape(config, rng);
            arena.insert(center, radius, shape, rng.random())
        })
        .collect()
}

/// Insert one droplet per connected region of `label` above the threshold.
///
/// Regions are visited in raster order of their first pixel. Each droplet
/// keeps the region's outline as its mask; the configured shape kind only
/// applies if the droplet is later merged.
pub fn label_candidates<R: Rng + ?Sized>(
    arena: &mut DropletArena,
    label: &GrayImage,
    config: &DropConfig,
    rng: &mut R,
) -> Vec<DropletKey> {
    label_regions(label, config.label_threshold)
        .into_iter()
        .map(|region| {
            let shape = pick_shape(config, rng);
            let mask = region.mask();
            arena.insert_outlined(region.centroid, region.radius, shape, rng.random(), mask)
        })
        .collect()
}

/// Find the 8-connected regions of pixels strictly above `threshold`.
#[must_use]
pub fn label_regions(label: &GrayImage, threshold: u8) -> Vec<LabelRegion> {
    let binary = GrayImage::from_fn(label.width(), label.height(), |x, y| {
        if label.get_pixel(x, y)[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let components = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // keyed by component id, kept in order of first appearance
    let mut slots: HashMap<u32, usize> = HashMap::new();
    let mut stats: Vec<RegionStats> = Vec::new();
    for (x, y, id) in components.enumerate_pixels() {
        if id[0] == 0 {
            continue;
        }
        let slot = *slots.entry(id[0]).or_insert_with(|| {
            stats.push(RegionStats::default());
            stats.len() - 1
        });
        stats[slot].add(x, y);
    }

    stats.into_iter().map(RegionStats::into_region).collect()
}

#[derive(Debug, Clone)]
struct RegionStats {
    count: u64,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: Vec<(u32, u32)>,
}

impl Default for RegionStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            pixels: Vec::new(),
        }
    }
}

impl RegionStats {
    fn add(&mut self, x: u32, y: u32) {
        self.count += 1;
        self.sum_x += f64::from(x);
        self.sum_y += f64::from(y);
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixels.push((x, y));
    }

    #[allow(clippy::cast_precision_loss)]
    fn into_region(self) -> LabelRegion {
        let n = self.count as f64;
        let extent = (self.max_x - self.min_x + 1).max(self.max_y - self.min_y + 1);
        LabelRegion {
            centroid: (self.sum_x / n, self.sum_y / n),
            radius: (extent / 2).max(1),
            area: self.count,
            pixels: self.pixels,
        }
    }
}
