//! Reference-layer preparation: validate once per run, then reproject and
//! index once per working frame.
use serde::{Deserialize, Serialize};

use crate::crs::{reconcile, Crs, CrsResolutionPolicy, Reconciliation};
use crate::error::Result;
use crate::feature::ReferenceLayer;
use crate::geometry::{GeometryValidator, ValidGeometry};
use crate::overlay::{PreparedFeature, PreparedLayer};

/// A reference feature left out of the run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureExclusion {
    pub layer_id: String,
    pub feature_id: String,
    pub reason: String,
}

/// A layer whose features passed validation, still in its own CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLayer {
    pub id: String,
    pub crs: Crs,
    pub features: Vec<PreparedFeature>,
    pub excluded: Vec<FeatureExclusion>,
}

impl ValidatedLayer {
    pub fn validate(layer: &ReferenceLayer, validator: &GeometryValidator) -> Self {
        let mut features = Vec::with_capacity(layer.features.len());
        let mut excluded = Vec::new();

        for feature in &layer.features {
            match validator.validate(&feature.geometry) {
                Ok(geometry) => {
                    if geometry.was_repaired() {
                        tracing::debug!(layer = %layer.id, feature = %feature.id, "reference geometry repaired");
                    }
                    features.push(PreparedFeature {
                        id: feature.id.clone(),
                        attributes: feature.attributes.clone(),
                        geometry,
                    });
                }
                Err(e) => {
                    tracing::warn!(layer = %layer.id, feature = %feature.id, error = %e, "reference feature excluded");
                    excluded.push(FeatureExclusion {
                        layer_id: layer.id.clone(),
                        feature_id: feature.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Self {
            id: layer.id.clone(),
            crs: layer.crs,
            features,
            excluded,
        }
    }

    /// Bring the layer into `target_crs` and index it.
    ///
    /// Fails when the frames cannot be reconciled. Features whose reprojection
    /// fails are dropped and returned as exclusions.
    pub fn prepare_for(
        &self,
        target_crs: Crs,
        policy: CrsResolutionPolicy,
    ) -> Result<(PreparedLayer, Vec<FeatureExclusion>)> {
        let reconciliation = reconcile(target_crs, self.crs, policy)?;
        let mut excluded = Vec::new();

        let features = match reconciliation {
            Reconciliation::Shared(_) => self.features.clone(),
            Reconciliation::Reproject { .. } => self
                .features
                .iter()
                .filter_map(|feature| {
                    let projected = reconciliation
                        .apply(feature.geometry.geometry())
                        .and_then(ValidGeometry::from_resolved);
                    match projected {
                        Ok(geometry) => Some(PreparedFeature {
                            id: feature.id.clone(),
                            attributes: feature.attributes.clone(),
                            geometry,
                        }),
                        Err(e) => {
                            tracing::warn!(layer = %self.id, feature = %feature.id, error = %e, "reprojection failed; feature excluded");
                            excluded.push(FeatureExclusion {
                                layer_id: self.id.clone(),
                                feature_id: feature.id.clone(),
                                reason: e.to_string(),
                            });
                            None
                        }
                    }
                })
                .collect(),
        };

        tracing::debug!(
            layer = %self.id,
            from = %self.crs,
            to = %reconciliation.shared_crs(),
            features = features.len(),
            "layer prepared"
        );
        Ok((PreparedLayer::new(self.id.clone(), reconciliation.shared_crs(), features), excluded))
    }
}
