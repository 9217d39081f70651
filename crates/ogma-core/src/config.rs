use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attributes::CategoryKey;
use crate::crs::CrsResolutionPolicy;
use crate::error::{OgmaError, Result};
use crate::geometry::GeometryValidator;

/// Required share of a target's net area for one category.
/// Fractions are in [0, 1]; either bound may be omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTarget {
    pub min_fraction: Option<f64>,
    pub max_fraction: Option<f64>,
}

impl CategoryTarget {
    pub fn at_least(fraction: f64) -> Self {
        Self {
            min_fraction: Some(fraction),
            max_fraction: None,
        }
    }

    pub fn at_most(fraction: f64) -> Self {
        Self {
            min_fraction: None,
            max_fraction: Some(fraction),
        }
    }
}

/// Parameters for one analysis run. Passed explicitly into every pipeline
/// invocation; nothing is read from process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Reference attribute, or list of attributes, whose values name the category.
    pub category_attribute: CategoryKey,
    /// Per-layer override of `category_attribute`, keyed by layer id.
    pub layer_category_attributes: BTreeMap<String, CategoryKey>,
    /// Fraction of target area tallies may exceed before `AreaOverrun`.
    pub area_tolerance: f64,
    pub crs_policy: CrsResolutionPolicy,
    /// Consecutive vertices closer than this (CRS units) are merged.
    pub vertex_epsilon: f64,
    /// Intersection parts at or below this area (CRS units²) are merged into
    /// a neighbouring category.
    pub sliver_area: f64,
    pub category_targets: BTreeMap<String, CategoryTarget>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            category_attribute: CategoryKey::default(),
            layer_category_attributes: BTreeMap::new(),
            area_tolerance: 0.0001,
            crs_policy: CrsResolutionPolicy::Fail,
            vertex_epsilon: 1e-9,
            sliver_area: 0.0,
            category_targets: BTreeMap::new(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| OgmaError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_category_attribute(mut self, name: impl Into<CategoryKey>) -> Self {
        self.category_attribute = name.into();
        self
    }

    pub fn with_area_tolerance(mut self, tolerance: f64) -> Self {
        self.area_tolerance = tolerance;
        self
    }

    pub fn with_crs_policy(mut self, policy: CrsResolutionPolicy) -> Self {
        self.crs_policy = policy;
        self
    }

    pub fn with_category_target(mut self, category: impl Into<String>, target: CategoryTarget) -> Self {
        self.category_targets.insert(category.into(), target);
        self
    }

    pub fn with_layer_category_attribute(mut self, layer_id: impl Into<String>, key: impl Into<CategoryKey>) -> Self {
        self.layer_category_attributes.insert(layer_id.into(), key.into());
        self
    }

    pub fn with_sliver_area(mut self, area: f64) -> Self {
        self.sliver_area = area;
        self
    }

    /// Category key to use for the given layer.
    pub fn category_attribute_for(&self, layer_id: &str) -> &CategoryKey {
        self.layer_category_attributes
            .get(layer_id)
            .unwrap_or(&self.category_attribute)
    }

    pub fn validator(&self) -> GeometryValidator {
        GeometryValidator::new(self.vertex_epsilon)
    }

    pub fn validate(&self) -> Result<()> {
        if self.category_attribute.is_blank() {
            return Err(OgmaError::Config("category_attribute must not be empty".into()));
        }
        if let Some((layer, _)) = self
            .layer_category_attributes
            .iter()
            .find(|(_, key)| key.is_blank())
        {
            return Err(OgmaError::Config(format!(
                "category attribute override for layer '{layer}' is empty"
            )));
        }
        for (name, value) in [
            ("area_tolerance", self.area_tolerance),
            ("vertex_epsilon", self.vertex_epsilon),
            ("sliver_area", self.sliver_area),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(OgmaError::Config(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        for (category, target) in &self.category_targets {
            for fraction in [target.min_fraction, target.max_fraction].into_iter().flatten() {
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(OgmaError::Config(format!(
                        "target fraction {fraction} for '{category}' is outside [0, 1]"
                    )));
                }
            }
            if let (Some(min), Some(max)) = (target.min_fraction, target.max_fraction) {
                if min > max {
                    return Err(OgmaError::Config(format!(
                        "target for '{category}' has min {min} above max {max}"
                    )));
                }
            }
        }
        Ok(())
    }
}
