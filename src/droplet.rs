//! Droplet geometry, merging and lazily cached rendering.

use image::{GrayImage, Rgb, RgbImage, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::optics::{self, Rendered};
use crate::shape::{self, ShapeKind, ShapeMask};

/// Stable identifier of a droplet within one generation run.
pub type DropletKey = usize;

/// Multiplier used to decorrelate merged render seeds.
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// One simulated water droplet.
///
/// Geometry is fixed at construction; the shape mask, alpha map and texture
/// are produced on the first call to [`Droplet::render`] and cached. All
/// randomness used while rendering comes from the droplet's own seed, so a
/// droplet always renders the same way over the same background.
#[derive(Debug, Clone)]
pub struct Droplet {
    key: DropletKey,
    center: (f64, f64),
    radius: u32,
    shape: ShapeKind,
    seed: u64,
    collided: bool,
    merged_from: Vec<DropletKey>,
    outline: Option<ShapeMask>,
    rendered: Option<RenderedDroplet>,
}

/// A rendered droplet together with its placement in the image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDroplet {
    optics: Rendered,
    origin: (i64, i64),
}

impl RenderedDroplet {
    /// RGBA texture; the fourth channel is the alpha map.
    #[must_use]
    pub fn texture(&self) -> &RgbaImage {
        self.optics.texture()
    }

    /// Feathered opacity of the droplet.
    #[must_use]
    pub fn alpha_map(&self) -> &GrayImage {
        self.optics.alpha_map()
    }

    /// Image coordinate of the texture's top-left pixel.
    #[must_use]
    pub fn origin(&self) -> (i64, i64) {
        self.origin
    }

    /// Whether the lens model failed and the plain crop was used.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.optics.is_fallback()
    }
}

impl Droplet {
    /// Create an unrendered droplet.
    #[must_use]
    pub fn new(key: DropletKey, center: (f64, f64), radius: u32, shape: ShapeKind, seed: u64) -> Self {
        Self {
            key,
            center,
            radius,
            shape,
            seed,
            collided: false,
            merged_from: Vec::new(),
            outline: None,
            rendered: None,
        }
    }

    /// Use `mask` as the silhouette instead of a procedural shape.
    ///
    /// The mask anchor is placed on the rounded center.
    #[must_use]
    pub fn with_outline(mut self, mask: ShapeMask) -> Self {
        self.outline = Some(mask);
        self
    }

    /// Fixed silhouette taken from a label region, if any.
    #[must_use]
    pub fn outline(&self) -> Option<&ShapeMask> {
        self.outline.as_ref()
    }

    /// Identifier within the current run.
    #[must_use]
    pub fn key(&self) -> DropletKey {
        self.key
    }

    /// Center in image pixel coordinates.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        self.center
    }

    /// Radius in pixels.
    #[must_use]
    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Silhouette family.
    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        self.shape
    }

    /// Whether this droplet took part in a merge.
    #[must_use]
    pub fn collided(&self) -> bool {
        self.collided
    }

    /// Keys of every droplet absorbed into this one.
    #[must_use]
    pub fn merged_from(&self) -> &[DropletKey] {
        &self.merged_from
    }

    pub(crate) fn mark_collided(&mut self) {
        self.collided = true;
    }

    /// Whether the bounding circles of two droplets overlap.
    #[must_use]
    pub fn collides_with(&self, other: &Droplet) -> bool {
        let dx = self.center.0 - other.center.0;
        let dy = self.center.1 - other.center.1;
        dx.hypot(dy) < f64::from(self.radius) + f64::from(other.radius)
    }

    /// Whether the bounding circle touches a `width` x `height` image.
    #[must_use]
    pub fn intersects_image(&self, width: u32, height: u32) -> bool {
        let (cx, cy) = self.center;
        let nearest_x = cx.clamp(0.0, f64::from(width));
        let nearest_y = cy.clamp(0.0, f64::from(height));
        (cx - nearest_x).hypot(cy - nearest_y) <= f64::from(self.radius)
    }

    /// Combine two droplets into a new one under `key`.
    ///
    /// The center is the radius-weighted mean of both centers and the radius
    /// preserves the summed circle area. The larger droplet's shape wins; on
    /// equal radii the receiver's shape is kept. The result is unrendered and
    /// drops any label outline in favor of the procedural shape.
    #[must_use]
    pub fn merge(&self, other: &Droplet, key: DropletKey) -> Droplet {
        let (ra, rb) = (f64::from(self.radius), f64::from(other.radius));
        let total = ra + rb;
        let center = if total > 0.0 {
            (
                (self.center.0 * ra + other.center.0 * rb) / total,
                (self.center.1 * ra + other.center.1 * rb) / total,
            )
        } else {
            self.center
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let radius = (ra * ra + rb * rb).sqrt().round() as u32;

        let (dominant, minor) = if other.radius > self.radius {
            (other, self)
        } else {
            (self, other)
        };

        let mut merged_from = Vec::with_capacity(self.merged_from.len() + other.merged_from.len() + 2);
        merged_from.extend_from_slice(&self.merged_from);
        merged_from.extend_from_slice(&other.merged_from);
        merged_from.push(self.key);
        merged_from.push(other.key);
        merged_from.sort_unstable();

        Droplet {
            key,
            center,
            radius,
            shape: dominant.shape,
            seed: dominant.seed ^ minor.seed.wrapping_mul(SEED_MIX),
            collided: true,
            merged_from,
            outline: None,
            rendered: None,
        }
    }

    /// Render over `background` on first use and return the cached result.
    pub fn render(&mut self, background: &RgbImage) -> &RenderedDroplet {
        let (center, radius, shape, seed) = (self.center, self.radius, self.shape, self.seed);
        let outline = self.outline.as_ref();
        self.rendered.get_or_insert_with(|| {
            render_droplet(background, center, radius, shape, seed, outline)
        })
    }

    /// Rendered texture, rendering over `background` if needed.
    pub fn texture(&mut self, background: &RgbImage) -> &RgbaImage {
        self.render(background).texture()
    }

    /// Alpha map, rendering over `background` if needed.
    pub fn alpha_map(&mut self, background: &RgbImage) -> &GrayImage {
        self.render(background).alpha_map()
    }

    /// The cached render, if any.
    #[must_use]
    pub fn rendered(&self) -> Option<&RenderedDroplet> {
        self.rendered.as_ref()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn render_droplet(
    background: &RgbImage,
    center: (f64, f64),
    radius: u32,
    shape: ShapeKind,
    seed: u64,
    outline: Option<&ShapeMask>,
) -> RenderedDroplet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mask = match outline {
        Some(mask) => mask.clone(),
        None => shape.build_mask(radius, &mut rng),
    };
    let limit = shape::feather_limit(radius);
    let feather = rng.random_range((limit * 2.0 / 3.0)..=limit);

    let (ax, ay) = mask.anchor();
    let origin = (
        center.0.round() as i64 - i64::from(ax),
        center.1.round() as i64 - i64::from(ay),
    );
    let crop = crop_clamped(background, origin, mask.width(), mask.height());

    RenderedDroplet {
        optics: optics::render(&crop, &mask, radius, feather),
        origin,
    }
}

/// Copy a `width` x `height` window at `origin`, replicating edge pixels
/// where the window leaves the image.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn crop_clamped(image: &RgbImage, origin: (i64, i64), width: u32, height: u32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    }
    let max_x = i64::from(image.width()) - 1;
    let max_y = i64::from(image.height()) - 1;
    RgbImage::from_fn(width, height, |x, y| {
        let sx = (origin.0 + i64::from(x)).clamp(0, max_x) as u32;
        let sy = (origin.1 + i64::from(y)).clamp(0, max_y) as u32;
        *image.get_pixel(sx, sy)
    })
}

/// Owner of every droplet created during one generation run.
///
/// Keys are indices into the arena and are never reused, so a droplet created
/// later always has a larger key than the droplets it was derived from.
#[derive(Debug, Default)]
pub struct DropletArena {
    droplets: Vec<Droplet>,
}

impl DropletArena {
    /// Empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fresh droplet and return its key.
    pub fn insert(&mut self, center: (f64, f64), radius: u32, shape: ShapeKind, seed: u64) -> DropletKey {
        let key = self.droplets.len();
        self.droplets.push(Droplet::new(key, center, radius, shape, seed));
        key
    }

    /// Add a fresh droplet with a fixed silhouette and return its key.
    pub fn insert_outlined(
        &mut self,
        center: (f64, f64),
        radius: u32,
        shape: ShapeKind,
        seed: u64,
        outline: ShapeMask,
    ) -> DropletKey {
        let key = self.droplets.len();
        self.droplets
            .push(Droplet::new(key, center, radius, shape, seed).with_outline(outline));
        key
    }

    /// Merge two droplets into a new arena entry and return its key.
    ///
    /// Both inputs are flagged as collided and stay in the arena as history.
    ///
    /// # Panics
    ///
    /// Panics if either key was not issued by this arena.
    pub fn merge(&mut self, a: DropletKey, b: DropletKey) -> DropletKey {
        let key = self.droplets.len();
        let merged = self.droplets[a].merge(&self.droplets[b], key);
        self.droplets[a].mark_collided();
        self.droplets[b].mark_collided();
        self.droplets.push(merged);
        key
    }

    /// Look up a droplet.
    #[must_use]
    pub fn get(&self, key: DropletKey) -> Option<&Droplet> {
        self.droplets.get(key)
    }

    /// Look up a droplet for rendering.
    pub fn get_mut(&mut self, key: DropletKey) -> Option<&mut Droplet> {
        self.droplets.get_mut(key)
    }

    /// Number of droplets ever created, merged ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.droplets.len()
    }

    /// Whether no droplet was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.droplets.is_empty()
    }

    /// Every key issued so far, in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = DropletKey> {
        0..self.droplets.len()
    }
}

impl std::ops::Index<DropletKey> for DropletArena {
    type Output = Droplet;

    fn index(&self, key: DropletKey) -> &Droplet {
        &self.droplets[key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([120, 120, 120]))
    }

    #[test]
    fn rendering_is_cached_and_idempotent() {
        let background = RgbImage::from_fn(200, 200, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let v = ((x + y) % 256) as u8;
            Rgb([v, 255 - v, 40])
        });
        let mut droplet = Droplet::new(0, (100.0, 100.0), 15, ShapeKind::Splash, 42);
        assert!(droplet.rendered().is_none());

        let first_texture = droplet.texture(&background).clone();
        let first_alpha = droplet.alpha_map(&background).clone();
        let cached = droplet.rendered().unwrap().clone();

        assert_eq!(droplet.texture(&background), &first_texture);
        assert_eq!(droplet.alpha_map(&background), &first_alpha);
        // a different background must not trigger a re-render
        assert_eq!(droplet.render(&gray(200, 200)), &cached);
    }

    #[test]
    fn same_seed_renders_identically() {
        let background = gray(100, 100);
        let mut a = Droplet::new(0, (50.0, 50.0), 12, ShapeKind::Irregular, 7);
        let mut b = Droplet::new(1, (50.0, 50.0), 12, ShapeKind::Irregular, 7);
        assert_eq!(a.render(&background), b.render(&background));
    }

    #[test]
    fn texture_is_placed_around_the_center() {
        let mut droplet = Droplet::new(0, (40.0, 30.0), 10, ShapeKind::Round, 1);
        let rendered = droplet.render(&gray(100, 100));
        let (ox, oy) = rendered.origin();
        let (w, h) = rendered.texture().dimensions();
        assert_eq!(ox + i64::from(w / 2), 40);
        assert_eq!(oy + i64::from(h / 2), 30);
    }

    #[test]
    fn merge_conserves_area_and_weights_the_center() {
        let a = Droplet::new(0, (0.0, 0.0), 30, ShapeKind::Round, 1);
        let b = Droplet::new(1, (40.0, 0.0), 10, ShapeKind::Oval, 2);
        let merged = a.merge(&b, 2);

        let expected = (30.0_f64 * 30.0 + 10.0 * 10.0).sqrt();
        assert!((f64::from(merged.radius()) - expected).abs() <= 0.5);

        let (cx, cy) = merged.center();
        assert!((cx - 10.0).abs() < 1e-9, "center x {cx}");
        assert!(cy.abs() < 1e-9);
        // closer to the larger droplet
        assert!(cx < 20.0);

        assert_eq!(merged.shape(), ShapeKind::Round);
        assert!(merged.collided());
        assert_eq!(merged.merged_from(), &[0, 1]);
        assert!(merged.rendered().is_none());
    }

    #[test]
    fn outlined_droplet_renders_its_own_mask() {
        let pixels: Vec<(u32, u32)> = (30..70).map(|x| (x, 50)).collect();
        let mask = ShapeMask::from_pixels(&pixels, (49.5, 50.0), 20);
        let mut droplet =
            Droplet::new(0, (49.5, 50.0), 20, ShapeKind::Round, 3).with_outline(mask.clone());
        let rendered = droplet.render(&gray(100, 100));
        assert_eq!(rendered.texture().dimensions(), mask.image().dimensions());
        let (ox, oy) = rendered.origin();
        let (ax, ay) = mask.anchor();
        assert_eq!((ox + i64::from(ax), oy + i64::from(ay)), (50, 50));

        let other = Droplet::new(1, (60.0, 50.0), 5, ShapeKind::Oval, 4);
        assert!(droplet.merge(&other, 2).outline().is_none());
    }

    #[test]
    fn merge_discards_previous_render() {
        let background = gray(100, 100);
        let mut a = Droplet::new(0, (50.0, 50.0), 10, ShapeKind::Round, 1);
        let b = Droplet::new(1, (55.0, 50.0), 10, ShapeKind::Round, 2);
        a.render(&background);
        let merged = a.merge(&b, 2);
        assert!(merged.rendered().is_none());
    }

    #[test]
    fn collision_uses_strict_radius_sum() {
        let a = Droplet::new(0, (0.0, 0.0), 10, ShapeKind::Round, 0);
        let touching = Droplet::new(1, (20.0, 0.0), 10, ShapeKind::Round, 0);
        let overlapping = Droplet::new(2, (19.0, 0.0), 10, ShapeKind::Round, 0);
        assert!(!a.collides_with(&touching));
        assert!(a.collides_with(&overlapping));
    }

    #[test]
    fn image_intersection_accounts_for_the_radius() {
        let inside = Droplet::new(0, (10.0, 10.0), 5, ShapeKind::Round, 0);
        let overhanging = Droplet::new(1, (-4.0, 50.0), 5, ShapeKind::Round, 0);
        let outside = Droplet::new(2, (-20.0, -20.0), 5, ShapeKind::Round, 0);
        assert!(inside.intersects_image(100, 100));
        assert!(overhanging.intersects_image(100, 100));
        assert!(!outside.intersects_image(100, 100));
    }

    #[test]
    fn arena_issues_increasing_keys_and_records_history() {
        let mut arena = DropletArena::new();
        let a = arena.insert((0.0, 0.0), 10, ShapeKind::Round, 1);
        let b = arena.insert((5.0, 0.0), 10, ShapeKind::Round, 2);
        let m = arena.merge(a, b);
        assert_eq!((a, b, m), (0, 1, 2));
        assert_eq!(arena.len(), 3);
        assert!(arena[a].collided() && arena[b].collided());
        assert_eq!(arena[m].merged_from(), &[0, 1]);
        assert_eq!(arena.keys().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn crop_replicates_edges_outside_the_image() {
        let image = RgbImage::from_fn(4, 4, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let v = (x * 10 + y) as u8;
            Rgb([v, v, v])
        });
        let crop = crop_clamped(&image, (-2, -2), 3, 3);
        assert_eq!(crop.get_pixel(0, 0), image.get_pixel(0, 0));
        assert_eq!(crop.get_pixel(2, 2), image.get_pixel(0, 0));
        let crop = crop_clamped(&image, (3, 1), 3, 1);
        assert_eq!(crop.get_pixel(2, 0), image.get_pixel(3, 1));
    }
}
