//! Overlay engine: target × reference layer → intersection fragments.
//!
//! Candidate features are found through an R-tree of bounding boxes, then
//! intersected exactly. Fragments are produced lazily, one candidate at a
//! time, and carry only the area and a borrow of the source attributes; the
//! intersection polygon itself is dropped as soon as it has been measured.
//!
//! Overlapping features within one layer are not deduplicated: each overlap
//! is measured independently and the aggregator's overrun check is the only
//! signal when that inflates coverage.
use std::fmt;

use geo::{Area, BooleanOps, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::attributes::Attributes;
use crate::crs::Crs;
use crate::geometry::ValidGeometry;

/// Fragments smaller than this fraction of the target area are treated as zero.
pub const ZERO_AREA_RELATIVE: f64 = 1e-12;

type IndexEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// A validated reference feature in a layer's working frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFeature {
    pub id: String,
    pub attributes: Attributes,
    pub geometry: ValidGeometry,
}

/// A reference layer ready for overlay: validated, in the target's frame, indexed.
pub struct PreparedLayer {
    id: String,
    crs: Crs,
    features: Vec<PreparedFeature>,
    index: RTree<IndexEntry>,
}

impl PreparedLayer {
    pub fn new(id: impl Into<String>, crs: Crs, features: Vec<PreparedFeature>) -> Self {
        let entries = features
            .iter()
            .enumerate()
            .map(|(i, f)| GeomWithData::new(rect_to_rectangle(&f.geometry.bounds()), i))
            .collect();
        Self {
            id: id.into(),
            crs,
            features,
            index: RTree::bulk_load(entries),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The frame every feature geometry is expressed in.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn features(&self) -> &[PreparedFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Indices of features whose bounding box meets `bounds`, in layer order.
    pub fn candidates(&self, bounds: &Rect<f64>) -> Vec<usize> {
        let envelope = AABB::from_corners([bounds.min().x, bounds.min().y], [bounds.max().x, bounds.max().y]);
        let mut hits: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        hits.sort_unstable();
        hits
    }
}

impl fmt::Debug for PreparedLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedLayer")
            .field("id", &self.id)
            .field("crs", &self.crs)
            .field("features", &self.features.len())
            .finish()
    }
}

fn rect_to_rectangle(r: &Rect<f64>) -> Rectangle<[f64; 2]> {
    Rectangle::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y])
}

/// Area of one target ∩ reference feature. Ephemeral.
///
/// The intersection is measured per single part. Parts at or below the sliver
/// threshold are reported in `sliver_area` rather than `area`; the aggregator
/// merges them into a neighbouring category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionFragment<'a> {
    pub feature_id: &'a str,
    pub attributes: &'a Attributes,
    pub area: f64,
    pub sliver_area: f64,
    pub slivers: usize,
}

impl<'a> IntersectionFragment<'a> {
    pub fn new(feature_id: &'a str, attributes: &'a Attributes, area: f64) -> Self {
        Self {
            feature_id,
            attributes,
            area,
            sliver_area: 0.0,
            slivers: 0,
        }
    }

    /// Kept plus sliver area.
    pub fn total_area(&self) -> f64 {
        self.area + self.sliver_area
    }
}

/// Computes intersections between a target and a prepared layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayEngine {
    sliver_area: f64,
}

impl OverlayEngine {
    /// Intersection parts at or below `sliver_area` are reported as slivers.
    pub fn new(sliver_area: f64) -> Self {
        Self {
            sliver_area: sliver_area.max(0.0),
        }
    }

    pub fn intersect<'a>(&self, target: &'a ValidGeometry, layer: &'a PreparedLayer) -> Fragments<'a> {
        let zero_area = ZERO_AREA_RELATIVE * target.area();
        Fragments {
            target,
            layer,
            candidates: layer.candidates(&target.bounds()).into_iter(),
            zero_area,
            sliver_area: self.sliver_area.max(zero_area),
        }
    }
}

/// Lazy stream of non-empty fragments, in layer order.
pub struct Fragments<'a> {
    target: &'a ValidGeometry,
    layer: &'a PreparedLayer,
    candidates: std::vec::IntoIter<usize>,
    zero_area: f64,
    sliver_area: f64,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = IntersectionFragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for index in self.candidates.by_ref() {
            let feature = &self.layer.features[index];
            let intersection = self.target.geometry().intersection(feature.geometry.geometry());

            let mut fragment = IntersectionFragment::new(&feature.id, &feature.attributes, 0.0);
            for part in &intersection.0 {
                let area = part.unsigned_area();
                if area <= self.zero_area {
                    continue;
                }
                if area <= self.sliver_area {
                    fragment.sliver_area += area;
                    fragment.slivers += 1;
                } else {
                    fragment.area += area;
                }
            }

            let total = fragment.total_area();
            debug_assert!(
                total <= self.target.area().min(feature.geometry.area()) * (1.0 + 1e-9) + 1e-9,
                "fragment area {total} exceeds its inputs"
            );
            if total > self.zero_area {
                return Some(fragment);
            }
        }
        None
    }
}
