//! Erase step: remove exclusion-layer area (private land, parks, ...) from a
//! target before its composition is measured.
use geo::{Area, BooleanOps, MultiPolygon};

use crate::error::{OgmaError, Result};
use crate::geometry::ValidGeometry;
use crate::overlay::PreparedLayer;

/// Net target geometry plus the area that was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionOutcome {
    pub net: ValidGeometry,
    pub excluded_area: f64,
}

/// Subtract every exclusion feature overlapping `target`.
///
/// The target is returned untouched when no exclusion bounding box meets it.
/// Fails with `InvalidGeometry` when nothing of the target remains.
pub fn apply_exclusions(target: &ValidGeometry, layers: &[&PreparedLayer]) -> Result<ExclusionOutcome> {
    let mut net: Option<MultiPolygon<f64>> = None;

    for layer in layers {
        for index in layer.candidates(&target.bounds()) {
            let feature = &layer.features()[index];
            let current = net.as_ref().unwrap_or(target.geometry());
            let remaining = current.difference(feature.geometry.geometry());
            if remaining.unsigned_area() < current.unsigned_area() {
                tracing::debug!(layer = layer.id(), feature = %feature.id, "exclusion feature applied");
                net = Some(remaining);
            }
        }
    }

    let Some(net) = net else {
        return Ok(ExclusionOutcome {
            net: target.clone(),
            excluded_area: 0.0,
        });
    };

    let net = ValidGeometry::from_resolved(net)
        .map_err(|_| OgmaError::invalid_geometry("no area remains after exclusions"))?;
    let excluded_area = (target.area() - net.area()).max(0.0);
    Ok(ExclusionOutcome { net, excluded_area })
}
