//! Droplet generation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shape::ShapeKind;

/// Largest droplet radius accepted in a configuration, in pixels.
pub const MAX_RADIUS: u32 = 4096;

/// Parameters for one droplet generation call.
///
/// The value is immutable once handed to a generator; derive a modified copy
/// with struct update syntax instead of mutating a shared instance:
///
/// ```
/// use raindrop_synth::DropConfig;
///
/// let cfg = DropConfig {
///     min_drops: 5,
///     max_drops: 10,
///     ..DropConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropConfig {
    /// Smallest droplet radius in pixels.
    pub min_radius: u32,
    /// Largest droplet radius in pixels.
    pub max_radius: u32,
    /// Smallest number of randomly placed droplets.
    pub min_drops: u32,
    /// Largest number of randomly placed droplets.
    pub max_drops: u32,
    /// Intensity reduction applied at droplet rims, in `[0, 1]`.
    pub edge_dark_ratio: f32,
    /// Emit a label mask alongside the composited image.
    pub return_label: bool,
    /// Input label pixels strictly above this value mark droplet area.
    pub label_threshold: u8,
    /// Draw each droplet's shape from `allowed_shapes` instead of `default`.
    pub shape_variety: bool,
    /// Shapes eligible when `shape_variety` is enabled.
    pub allowed_shapes: Vec<ShapeKind>,
    /// Upper bound on collision resolution passes.
    pub max_merge_passes: usize,
}

impl Default for DropConfig {
    fn default() -> Self {
        Self {
            min_radius: 30,
            max_radius: 50,
            min_drops: 30,
            max_drops: 30,
            edge_dark_ratio: 0.3,
            return_label: false,
            label_threshold: 128,
            shape_variety: true,
            allowed_shapes: ShapeKind::ALL.to_vec(),
            max_merge_passes: 32,
        }
    }
}

impl DropConfig {
    /// Moderate droplets suited to pose-estimation training data.
    ///
    /// Excludes the `irregular` and `splash` shapes, which tend to occlude
    /// keypoints with unrealistic blobs.
    #[must_use]
    pub fn pose_estimation() -> Self {
        Self {
            min_radius: 15,
            max_radius: 25,
            min_drops: 5,
            max_drops: 15,
            edge_dark_ratio: 0.2,
            return_label: false,
            allowed_shapes: vec![
                ShapeKind::Default,
                ShapeKind::Round,
                ShapeKind::Oval,
                ShapeKind::Teardrop,
            ],
            ..Self::default()
        }
    }

    /// Stronger rim darkening for the first stage of pose-estimation training.
    #[must_use]
    pub fn pose_estimation_stage1() -> Self {
        Self {
            edge_dark_ratio: 0.25,
            ..Self::pose_estimation()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the JSON is malformed or the
    /// resulting values fail [`DropConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfiguration(format!("malformed config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputNotFound`] if the file does not exist, and the
    /// errors of [`DropConfig::from_json_str`] otherwise.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::InputNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.min_radius == 0 {
            return Err(invalid("min_radius must be at least 1"));
        }
        if self.min_radius > self.max_radius {
            return Err(invalid(format!(
                "min_radius ({}) exceeds max_radius ({})",
                self.min_radius, self.max_radius
            )));
        }
        if self.max_radius > MAX_RADIUS {
            return Err(invalid(format!(
                "max_radius ({}) exceeds the supported maximum of {MAX_RADIUS}",
                self.max_radius
            )));
        }
        if self.min_drops > self.max_drops {
            return Err(invalid(format!(
                "min_drops ({}) exceeds max_drops ({})",
                self.min_drops, self.max_drops
            )));
        }
        if !(0.0..=1.0).contains(&self.edge_dark_ratio) {
            return Err(invalid(format!(
                "edge_dark_ratio ({}) must be within [0, 1]",
                self.edge_dark_ratio
            )));
        }
        if self.shape_variety && self.allowed_shapes.is_empty() {
            return Err(invalid("allowed_shapes is empty while shape_variety is set"));
        }
        if self.max_merge_passes == 0 {
            return Err(invalid("max_merge_passes must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfiguration(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = DropConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.allowed_shapes.len(), 6);
    }

    #[test]
    fn presets_are_valid() {
        assert!(DropConfig::pose_estimation().validate().is_ok());
        let stage1 = DropConfig::pose_estimation_stage1();
        assert!(stage1.validate().is_ok());
        assert!((stage1.edge_dark_ratio - 0.25).abs() < f32::EPSILON);
        assert!(!stage1.allowed_shapes.contains(&ShapeKind::Splash));
    }

    #[test]
    fn inverted_radius_bounds_are_rejected() {
        let cfg = DropConfig {
            min_radius: 50,
            max_radius: 10,
            ..DropConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(err.to_string().contains("min_radius"));
    }

    #[test]
    fn oversized_radius_is_rejected() {
        let cfg = DropConfig {
            min_radius: 3_000_000_000,
            max_radius: 3_000_000_000,
            ..DropConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_radius"));

        let at_limit = DropConfig {
            max_radius: MAX_RADIUS,
            ..DropConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn inverted_drop_bounds_are_rejected() {
        let cfg = DropConfig {
            min_drops: 10,
            max_drops: 2,
            ..DropConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn edge_ratio_outside_unit_range_is_rejected() {
        for ratio in [-0.1, 1.5, f32::NAN] {
            let cfg = DropConfig {
                edge_dark_ratio: ratio,
                ..DropConfig::default()
            };
            assert!(cfg.validate().is_err(), "ratio {ratio} accepted");
        }
    }

    #[test]
    fn empty_shapes_only_matter_with_variety() {
        let with_variety = DropConfig {
            allowed_shapes: Vec::new(),
            ..DropConfig::default()
        };
        assert!(with_variety.validate().is_err());

        let without_variety = DropConfig {
            allowed_shapes: Vec::new(),
            shape_variety: false,
            ..DropConfig::default()
        };
        assert!(without_variety.validate().is_ok());
    }

    #[test]
    fn zero_radius_and_zero_passes_are_rejected() {
        let zero_radius = DropConfig {
            min_radius: 0,
            ..DropConfig::default()
        };
        assert!(zero_radius.validate().is_err());

        let zero_passes = DropConfig {
            max_merge_passes: 0,
            ..DropConfig::default()
        };
        assert!(zero_passes.validate().is_err());
    }

    #[test]
    fn json_overrides_a_subset_of_fields() {
        let cfg = DropConfig::from_json_str(
            r#"{ "min_radius": 10, "max_radius": 12, "allowed_shapes": ["round", "splash"] }"#,
        )
        .unwrap();
        assert_eq!(cfg.min_radius, 10);
        assert_eq!(cfg.max_radius, 12);
        assert_eq!(cfg.allowed_shapes, vec![ShapeKind::Round, ShapeKind::Splash]);
        assert_eq!(cfg.min_drops, DropConfig::default().min_drops);
    }

    #[test]
    fn json_with_invalid_values_is_rejected() {
        let err = DropConfig::from_json_str(r#"{ "min_radius": 50, "max_radius": 10 }"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));

        let err = DropConfig::from_json_str(r#"{ "allowed_shapes": ["hexagon"] }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = DropConfig::from_json_file(Path::new("/nonexistent/raindrop.json")).unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));
    }
}
