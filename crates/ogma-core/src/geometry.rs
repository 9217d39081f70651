//! Geometry validation and light repair.
//!
//! Raw target and reference shapes arrive from arbitrary loaders. Before any
//! overlay they are reduced to a [`ValidGeometry`]:
//!   1. accept only areal geometry (polygon, multi-polygon, rect, triangle);
//!   2. drop near-duplicate consecutive vertices and close every ring;
//!   3. discard degenerate rings (fewer than 3 distinct vertices, collinear);
//!   4. resolve self-intersections, overlapping parts and holes that sit
//!      outside their shell or inside another hole through boolean
//!      difference and union, the equivalent of the usual buffer-by-zero fix;
//!   5. reject anything left with zero area.
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BooleanOps, BoundingRect, Coord, Geometry, Line, LineString, MultiPolygon, Polygon, Rect};

use crate::error::{OgmaError, Result};

/// Relative area slack when deciding whether one ring contains another.
const HOLE_CONTAINMENT_SLACK: f64 = 1e-9;

/// An areal geometry that passed validation. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidGeometry {
    geometry: MultiPolygon<f64>,
    area: f64,
    bounds: Rect<f64>,
    repaired: bool,
}

impl ValidGeometry {
    /// Wrap the output of a boolean overlay, which is valid by construction.
    /// Fails if nothing with positive area remains.
    pub(crate) fn from_resolved(geometry: MultiPolygon<f64>) -> Result<Self> {
        let area = geometry.unsigned_area();
        if !(area > 0.0) {
            return Err(OgmaError::invalid_geometry("geometry has no area"));
        }
        let bounds = geometry
            .bounding_rect()
            .ok_or_else(|| OgmaError::invalid_geometry("geometry has no extent"))?;
        Ok(Self {
            geometry,
            area,
            bounds,
            repaired: false,
        })
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn into_inner(self) -> MultiPolygon<f64> {
        self.geometry
    }

    /// Planar area in CRS units squared.
    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    /// Whether the self-intersection repair had to run.
    pub fn was_repaired(&self) -> bool {
        self.repaired
    }
}

/// Validates raw geometry.
#[derive(Debug, Clone, Copy)]
pub struct GeometryValidator {
    vertex_epsilon: f64,
}

impl Default for GeometryValidator {
    fn default() -> Self {
        Self::new(1e-9)
    }
}

impl GeometryValidator {
    /// `vertex_epsilon`: consecutive vertices closer than this are merged.
    pub fn new(vertex_epsilon: f64) -> Self {
        Self {
            vertex_epsilon: vertex_epsilon.max(0.0),
        }
    }

    pub fn validate(&self, raw: &Geometry<f64>) -> Result<ValidGeometry> {
        let parts = areal_parts(raw)?;
        self.validate_parts(parts)
    }

    pub fn validate_multi_polygon(&self, raw: &MultiPolygon<f64>) -> Result<ValidGeometry> {
        self.validate_parts(raw.0.clone())
    }

    fn validate_parts(&self, parts: Vec<Polygon<f64>>) -> Result<ValidGeometry> {
        for polygon in &parts {
            if polygon.exterior().coords().chain(polygon.interiors().iter().flat_map(|r| r.coords())).any(
                |c| !c.x.is_finite() || !c.y.is_finite(),
            ) {
                return Err(OgmaError::invalid_geometry("geometry contains non-finite coordinates"));
            }
        }

        let cleaned = self.clean(parts);
        if cleaned.0.is_empty() {
            return Err(OgmaError::invalid_geometry(
                "geometry is empty after removing degenerate rings",
            ));
        }

        let (geometry, repaired) = if has_defects(&cleaned) {
            let resolved = self.clean(union_parts(&cleaned).0);
            if resolved.0.is_empty() {
                return Err(OgmaError::invalid_geometry(
                    "self-intersection repair left no area",
                ));
            }
            if has_defects(&resolved) {
                return Err(OgmaError::invalid_geometry(
                    "self-intersection could not be resolved",
                ));
            }
            (resolved, true)
        } else {
            (cleaned, false)
        };

        let geometry = geometry.orient(Direction::Default);
        let mut valid = ValidGeometry::from_resolved(geometry)
            .map_err(|_| OgmaError::invalid_geometry("area is zero after repair"))?;
        valid.repaired = repaired;
        Ok(valid)
    }

    fn clean(&self, parts: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
        let polygons = parts
            .into_iter()
            .filter_map(|polygon| {
                let (exterior, interiors) = polygon.into_inner();
                let exterior = self.clean_ring(&exterior)?;
                let interiors = interiors
                    .iter()
                    .filter_map(|ring| self.clean_ring(ring))
                    .collect();
                Some(Polygon::new(exterior, interiors))
            })
            .collect();
        MultiPolygon::new(polygons)
    }

    /// Remove near-duplicate consecutive vertices; `None` if the ring collapses.
    fn clean_ring(&self, ring: &LineString<f64>) -> Option<LineString<f64>> {
        let mut kept: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
        for &c in &ring.0 {
            match kept.last() {
                Some(&last) if distance(last, c) <= self.vertex_epsilon => {}
                _ => kept.push(c),
            }
        }
        while kept.len() > 1 && distance(kept[0], kept[kept.len() - 1]) <= self.vertex_epsilon {
            kept.pop();
        }
        if kept.len() < 3 || self.collinear(&kept) {
            return None;
        }
        // Polygon::new closes the ring.
        Some(LineString::from(kept))
    }

    /// All vertices lie within epsilon of one line. Signed area is not used
    /// here: a figure-eight has zero net area yet two repairable lobes.
    fn collinear(&self, coords: &[Coord<f64>]) -> bool {
        let origin = coords[0];
        let Some(&far) = coords.iter().max_by(|a, b| {
            distance(origin, **a).total_cmp(&distance(origin, **b))
        }) else {
            return true;
        };
        let length = distance(origin, far);
        if length <= self.vertex_epsilon {
            return true;
        }
        coords.iter().all(|&c| {
            let cross = (far.x - origin.x) * (c.y - origin.y) - (far.y - origin.y) * (c.x - origin.x);
            cross.abs() / length <= self.vertex_epsilon
        })
    }
}

/// Validate with the default vertex epsilon.
pub fn validate(raw: &Geometry<f64>) -> Result<ValidGeometry> {
    GeometryValidator::default().validate(raw)
}

fn areal_parts(raw: &Geometry<f64>) -> Result<Vec<Polygon<f64>>> {
    match raw {
        Geometry::Polygon(p) => Ok(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => Ok(mp.0.clone()),
        Geometry::Rect(r) => Ok(vec![r.to_polygon()]),
        Geometry::Triangle(t) => Ok(vec![t.to_polygon()]),
        Geometry::GeometryCollection(gc) => {
            let mut parts = Vec::new();
            for g in gc.iter() {
                parts.extend(areal_parts(g)?);
            }
            Ok(parts)
        }
        other => Err(OgmaError::invalid_geometry(format!(
            "expected an areal geometry, found {}",
            geometry_name(other)
        ))),
    }
}

fn geometry_name(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "a point",
        Geometry::Line(_) => "a line",
        Geometry::LineString(_) => "a line string",
        Geometry::MultiPoint(_) => "a multi-point",
        Geometry::MultiLineString(_) => "a multi-line string",
        _ => "a non-areal geometry",
    }
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Union the parts one by one so that each part's own self-intersections are
/// resolved and overlapping parts merge rather than cancel.
fn union_parts(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    geometry
        .0
        .iter()
        .fold(MultiPolygon::new(vec![]), |acc, part| acc.union(&resolve_holes(part)))
}

/// A part as its shell minus the union of its holes. Holes outside the shell
/// then remove nothing and a hole nested in another hole merges into it.
fn resolve_holes(part: &Polygon<f64>) -> MultiPolygon<f64> {
    let shell = MultiPolygon::new(vec![Polygon::new(part.exterior().clone(), vec![])]);
    if part.interiors().is_empty() {
        return shell;
    }
    let holes = part
        .interiors()
        .iter()
        .fold(MultiPolygon::new(vec![]), |acc, ring| {
            acc.union(&MultiPolygon::new(vec![Polygon::new(ring.clone(), vec![])]))
        });
    shell.difference(&holes)
}

fn has_defects(geometry: &MultiPolygon<f64>) -> bool {
    geometry.0.iter().any(|p| polygon_self_intersects(p) || holes_misplaced(p)) || parts_overlap(geometry)
}

/// Every hole must lie inside the shell and outside every other hole.
///
/// Edge crossings are caught by [`polygon_self_intersects`], so here a hole is
/// either wholly inside or wholly outside each other ring; overlap area
/// decides which.
fn holes_misplaced(polygon: &Polygon<f64>) -> bool {
    let ring_area = |ring: &LineString<f64>| MultiPolygon::new(vec![Polygon::new(ring.clone(), vec![])]);
    let shell = ring_area(polygon.exterior());
    let holes: Vec<MultiPolygon<f64>> = polygon.interiors().iter().map(ring_area).collect();

    for (i, hole) in holes.iter().enumerate() {
        let area = hole.unsigned_area();
        let inside = shell.intersection(hole).unsigned_area();
        if inside < area * (1.0 - HOLE_CONTAINMENT_SLACK) {
            return true;
        }
        for other in &holes[i + 1..] {
            let shared = hole.intersection(other).unsigned_area();
            if shared > area.min(other.unsigned_area()) * HOLE_CONTAINMENT_SLACK {
                return true;
            }
        }
    }
    false
}

fn parts_overlap(geometry: &MultiPolygon<f64>) -> bool {
    let parts = &geometry.0;
    for (i, a) in parts.iter().enumerate() {
        let Some(ra) = a.bounding_rect() else { continue };
        for b in &parts[i + 1..] {
            let Some(rb) = b.bounding_rect() else { continue };
            if !rects_overlap(&ra, &rb) {
                continue;
            }
            let shared = MultiPolygon::new(vec![a.clone()])
                .intersection(&MultiPolygon::new(vec![b.clone()]))
                .unsigned_area();
            if shared > 0.0 {
                return true;
            }
        }
    }
    false
}

pub(crate) fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

struct Segment {
    line: Line<f64>,
    ring: usize,
    index: usize,
    ring_len: usize,
    min_x: f64,
    max_x: f64,
}

impl Segment {
    fn adjacent(&self, other: &Segment) -> bool {
        if self.ring != other.ring {
            return false;
        }
        let (lo, hi) = if self.index < other.index {
            (self.index, other.index)
        } else {
            (other.index, self.index)
        };
        hi - lo == 1 || (lo == 0 && hi == self.ring_len - 1)
    }
}

/// Detect crossings or collinear overlaps between the edges of one polygon.
///
/// Touching at a single vertex is tolerated (self-touching rings, holes
/// touching the shell). Uses an x-sorted sweep to skip distant segment pairs.
fn polygon_self_intersects(polygon: &Polygon<f64>) -> bool {
    let mut segments: Vec<Segment> = Vec::new();
    for (ring_idx, ring) in std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .enumerate()
    {
        let lines: Vec<Line<f64>> = ring.lines().collect();
        let ring_len = lines.len();
        segments.extend(lines.into_iter().enumerate().map(|(index, line)| Segment {
            line,
            ring: ring_idx,
            index,
            ring_len,
            min_x: line.start.x.min(line.end.x),
            max_x: line.start.x.max(line.end.x),
        }));
    }
    segments.sort_by(|a, b| a.min_x.total_cmp(&b.min_x));

    for (i, a) in segments.iter().enumerate() {
        for b in &segments[i + 1..] {
            if b.min_x > a.max_x {
                break;
            }
            let crossing = match line_intersection(a.line, b.line) {
                None => false,
                Some(LineIntersection::Collinear { .. }) => true,
                Some(LineIntersection::SinglePoint { is_proper, .. }) => is_proper && !a.adjacent(b),
            };
            if crossing {
                return true;
            }
        }
    }
    false
}
