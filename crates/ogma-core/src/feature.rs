//! Input records: targets and reference layers.
//!
//! Geometry is kept raw here; validation happens inside the pipeline so that
//! a bad shape fails only the target (or feature) that carries it.
use geo::Geometry;
use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::crs::Crs;

/// Descriptive metadata carried through to the output record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetadata {
    pub name: String,
    /// Designation type, e.g. "legal OGMA" or "planning cell".
    pub designation: String,
}

/// A management unit whose composition is being summarised.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: String,
    pub metadata: TargetMetadata,
    pub crs: Crs,
    pub geometry: Geometry<f64>,
}

impl Target {
    pub fn new(id: impl Into<String>, crs: Crs, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: id.into(),
            metadata: TargetMetadata::default(),
            crs,
            geometry: geometry.into(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, designation: impl Into<String>) -> Self {
        self.metadata = TargetMetadata {
            name: name.into(),
            designation: designation.into(),
        };
        self
    }
}

/// One polygon of a reference layer. Belongs to exactly one [`ReferenceLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFeature {
    pub id: String,
    pub attributes: Attributes,
    pub geometry: Geometry<f64>,
}

impl ReferenceFeature {
    pub fn new(id: impl Into<String>, attributes: Attributes, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: id.into(),
            attributes,
            geometry: geometry.into(),
        }
    }
}

/// A named collection of reference features sharing one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLayer {
    pub id: String,
    pub crs: Crs,
    pub features: Vec<ReferenceFeature>,
}

impl ReferenceLayer {
    pub fn new(id: impl Into<String>, crs: Crs) -> Self {
        Self {
            id: id.into(),
            crs,
            features: Vec::new(),
        }
    }

    pub fn with_feature(mut self, feature: ReferenceFeature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn push(&mut self, feature: ReferenceFeature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
