//! Coordinate reference systems and the frame reconciler.
//!
//! All areas are reported in the target's planar frame, so the target CRS is
//! authoritative and reference geometry is reprojected into it. Projections
//! are evaluated on the GRS80 ellipsoid; the NAD83/WGS84 datum shift is below
//! a metre and is ignored.
//!
//! Supported EPSG codes:
//!   4326, 4269          geographic lon/lat (never a working frame)
//!   3005                NAD83 / BC Albers
//!   3857                WGS84 / Pseudo-Mercator
//!   26907–26911         NAD83 / UTM zones 7N–11N
//!   32601–32660         WGS84 / UTM north
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;

use geo::{Coord, MapCoords, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::error::{OgmaError, Result};

// ── Ellipsoid ─────────────────────────────────────────────────────────────────

/// GRS80 semi-major axis (m).
const SEMI_MAJOR: f64 = 6_378_137.0;
/// GRS80 flattening.
const FLATTENING: f64 = 1.0 / 298.257_222_101;
const E2: f64 = FLATTENING * (2.0 - FLATTENING);

const MAX_ITERATIONS: usize = 20;
const CONVERGENCE: f64 = 1e-12;

// ── Public types ──────────────────────────────────────────────────────────────

/// A coordinate reference system identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Crs {
    /// No CRS was recorded with the data.
    Undefined,
    Epsg(u32),
}

impl Crs {
    pub const BC_ALBERS: Crs = Crs::Epsg(3005);
    pub const WGS84: Crs = Crs::Epsg(4326);
    pub const WEB_MERCATOR: Crs = Crs::Epsg(3857);

    pub fn is_defined(&self) -> bool {
        matches!(self, Crs::Epsg(_))
    }

    /// Resolve to a projection, if the code is supported.
    pub fn projection(&self) -> Option<Projection> {
        match *self {
            Crs::Undefined => None,
            Crs::Epsg(code) => Projection::from_epsg(code),
        }
    }

    /// Whether the CRS is a known planar frame with a metre linear unit.
    pub fn is_metric(&self) -> bool {
        self.projection().is_some_and(|p| p.is_planar())
    }
}

impl From<Option<u32>> for Crs {
    fn from(code: Option<u32>) -> Self {
        code.map_or(Crs::Undefined, Crs::Epsg)
    }
}

impl From<Crs> for Option<u32> {
    fn from(crs: Crs) -> Self {
        match crs {
            Crs::Undefined => None,
            Crs::Epsg(code) => Some(code),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Undefined => write!(f, "undefined"),
            Crs::Epsg(code) => write!(f, "EPSG:{code}"),
        }
    }
}

/// How to treat a CRS that is undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrsResolutionPolicy {
    /// An undefined CRS halts the target's pipeline.
    #[default]
    Fail,
    /// An undefined reference CRS is taken to be the target's CRS.
    AssumeTargetCrs,
}

/// Albers equal-area conic parameters, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlbersParams {
    pub lat_origin: f64,
    pub lon_origin: f64,
    pub std_parallel_1: f64,
    pub std_parallel_2: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

/// Transverse Mercator parameters for a UTM north zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercatorParams {
    pub central_meridian: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercatorParams {
    pub fn utm_north(zone: u32) -> Self {
        Self {
            central_meridian: zone as f64 * 6.0 - 183.0,
            scale: 0.9996,
            false_easting: 500_000.0,
            false_northing: 0.0,
        }
    }
}

/// A resolved projection that maps between planar and geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in degrees.
    Geographic,
    Albers(AlbersParams),
    /// Spherical Pseudo-Mercator on the semi-major axis.
    WebMercator,
    TransverseMercator(TransverseMercatorParams),
}

impl Projection {
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 | 4269 => Some(Self::Geographic),
            3005 => Some(Self::Albers(AlbersParams {
                lat_origin: 45.0,
                lon_origin: -126.0,
                std_parallel_1: 50.0,
                std_parallel_2: 58.5,
                false_easting: 1_000_000.0,
                false_northing: 0.0,
            })),
            3857 => Some(Self::WebMercator),
            26907..=26911 => Some(Self::TransverseMercator(TransverseMercatorParams::utm_north(
                code - 26900,
            ))),
            32601..=32660 => Some(Self::TransverseMercator(TransverseMercatorParams::utm_north(
                code - 32600,
            ))),
            _ => None,
        }
    }

    pub fn is_planar(&self) -> bool {
        !matches!(self, Self::Geographic)
    }

    /// Planar (or lon/lat) coordinate → lon/lat degrees.
    pub fn to_geographic(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        require_finite(c)?;
        let g = match self {
            Self::Geographic => c,
            Self::Albers(p) => albers_inverse(p, c),
            Self::WebMercator => Coord {
                x: (c.x / SEMI_MAJOR).to_degrees(),
                y: (2.0 * (c.y / SEMI_MAJOR).exp().atan() - FRAC_PI_2).to_degrees(),
            },
            Self::TransverseMercator(p) => tm_inverse(p, c),
        };
        check_latitude(g)
    }

    /// Lon/lat degrees → planar (or lon/lat) coordinate.
    pub fn from_geographic(&self, g: Coord<f64>) -> Result<Coord<f64>> {
        require_finite(g)?;
        check_latitude(g)?;
        let c = match self {
            Self::Geographic => g,
            Self::Albers(p) => albers_forward(p, g),
            Self::WebMercator => {
                if g.y.abs() >= 90.0 {
                    return Err(OgmaError::incompatible_crs(format!(
                        "latitude {} cannot be represented in Pseudo-Mercator",
                        g.y
                    )));
                }
                let phi = g.y.to_radians();
                Coord {
                    x: SEMI_MAJOR * g.x.to_radians(),
                    y: SEMI_MAJOR * (FRAC_PI_4 + phi / 2.0).tan().ln(),
                }
            }
            Self::TransverseMercator(p) => tm_forward(p, g),
        };
        require_finite(c)?;
        Ok(c)
    }
}

/// Point transform between two projections via geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub from: Projection,
    pub to: Projection,
}

impl Transform {
    pub fn apply(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        self.to.from_geographic(self.from.to_geographic(c)?)
    }

    pub fn apply_multi_polygon(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        geometry.try_map_coords(|c| self.apply(c))
    }
}

/// Outcome of reconciling a reference CRS against a target CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// Both sides already share this frame.
    Shared(Crs),
    /// Reference geometry must be transformed into `shared`.
    Reproject { shared: Crs, transform: Transform },
}

impl Reconciliation {
    pub fn shared_crs(&self) -> Crs {
        match *self {
            Self::Shared(crs) | Self::Reproject { shared: crs, .. } => crs,
        }
    }

    /// Bring reference geometry into the shared frame.
    pub fn apply(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        match self {
            Self::Shared(_) => Ok(geometry.clone()),
            Self::Reproject { transform, .. } => transform.apply_multi_polygon(geometry),
        }
    }
}

/// Resolve the shared planar frame for a target and a reference layer.
///
/// The target CRS must be a supported planar CRS. An undefined target CRS is
/// only accepted when the reference is also undefined and the policy allows
/// assumption, in which case both sides are taken to share an unnamed frame.
pub fn reconcile(target: Crs, reference: Crs, policy: CrsResolutionPolicy) -> Result<Reconciliation> {
    let assume = policy == CrsResolutionPolicy::AssumeTargetCrs;

    if !target.is_defined() {
        if !reference.is_defined() && assume {
            tracing::warn!("target and reference CRS both undefined; assuming a shared planar frame");
            return Ok(Reconciliation::Shared(Crs::Undefined));
        }
        return Err(OgmaError::incompatible_crs(format!(
            "target CRS is undefined (reference is {reference})"
        )));
    }

    let target_projection = target
        .projection()
        .ok_or_else(|| OgmaError::incompatible_crs(format!("target {target} is not a supported CRS")))?;
    if !target_projection.is_planar() {
        return Err(OgmaError::incompatible_crs(format!(
            "target {target} is geographic; areas require a planar frame"
        )));
    }

    if !reference.is_defined() {
        if assume {
            tracing::warn!(%target, "reference CRS undefined; assuming target CRS");
            return Ok(Reconciliation::Shared(target));
        }
        return Err(OgmaError::incompatible_crs(format!(
            "reference CRS is undefined (target is {target})"
        )));
    }

    if reference == target {
        return Ok(Reconciliation::Shared(target));
    }

    let reference_projection = reference.projection().ok_or_else(|| {
        OgmaError::incompatible_crs(format!("reference {reference} is not a supported CRS"))
    })?;
    if reference_projection == target_projection {
        return Ok(Reconciliation::Shared(target));
    }

    Ok(Reconciliation::Reproject {
        shared: target,
        transform: Transform {
            from: reference_projection,
            to: target_projection,
        },
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_finite(c: Coord<f64>) -> Result<()> {
    if c.x.is_finite() && c.y.is_finite() {
        Ok(())
    } else {
        Err(OgmaError::incompatible_crs(format!(
            "non-finite coordinate ({}, {})",
            c.x, c.y
        )))
    }
}

fn check_latitude(g: Coord<f64>) -> Result<Coord<f64>> {
    if g.y.abs() > 90.0 + 1e-9 || !g.y.is_finite() {
        return Err(OgmaError::incompatible_crs(format!(
            "latitude {} is outside [-90, 90]",
            g.y
        )));
    }
    Ok(g)
}

fn eccentricity() -> f64 {
    E2.sqrt()
}

// ── Albers equal-area conic (Snyder §14) ──────────────────────────────────────

fn albers_m(phi: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - E2 * s * s).sqrt()
}

fn albers_q(phi: f64) -> f64 {
    let e = eccentricity();
    let s = phi.sin();
    (1.0 - E2) * (s / (1.0 - E2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

/// Cone constants (n, C, ρ0).
fn albers_constants(p: &AlbersParams) -> (f64, f64, f64) {
    let phi1 = p.std_parallel_1.to_radians();
    let phi2 = p.std_parallel_2.to_radians();
    let phi0 = p.lat_origin.to_radians();
    let m1 = albers_m(phi1);
    let m2 = albers_m(phi2);
    let q1 = albers_q(phi1);
    let q2 = albers_q(phi2);
    let n = (m1 * m1 - m2 * m2) / (q2 - q1);
    let c = m1 * m1 + n * q1;
    let rho0 = SEMI_MAJOR * (c - n * albers_q(phi0)).sqrt() / n;
    (n, c, rho0)
}

fn albers_forward(p: &AlbersParams, g: Coord<f64>) -> Coord<f64> {
    let (n, c, rho0) = albers_constants(p);
    let rho = SEMI_MAJOR * (c - n * albers_q(g.y.to_radians())).sqrt() / n;
    let theta = n * (g.x - p.lon_origin).to_radians();
    Coord {
        x: p.false_easting + rho * theta.sin(),
        y: p.false_northing + rho0 - rho * theta.cos(),
    }
}

fn albers_inverse(p: &AlbersParams, c: Coord<f64>) -> Coord<f64> {
    let (n, cone, rho0) = albers_constants(p);
    let x = c.x - p.false_easting;
    let y = rho0 - (c.y - p.false_northing);
    let rho = (x * x + y * y).sqrt();
    let theta = x.atan2(y);
    let q = (cone - rho * rho * n * n / (SEMI_MAJOR * SEMI_MAJOR)) / n;

    let e = eccentricity();
    let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
    for _ in 0..MAX_ITERATIONS {
        let s = phi.sin();
        let one_minus = 1.0 - E2 * s * s;
        let delta = one_minus * one_minus / (2.0 * phi.cos())
            * (q / (1.0 - E2) - s / one_minus
                + (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln());
        phi += delta;
        if delta.abs() < CONVERGENCE {
            break;
        }
    }

    Coord {
        x: p.lon_origin + (theta / n).to_degrees(),
        y: phi.to_degrees(),
    }
}

// ── Transverse Mercator (Snyder §8) ───────────────────────────────────────────

fn meridian_arc(phi: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    SEMI_MAJOR
        * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn tm_forward(p: &TransverseMercatorParams, g: Coord<f64>) -> Coord<f64> {
    let ep2 = E2 / (1.0 - E2);
    let phi = g.y.to_radians();
    let (s, cos) = phi.sin_cos();
    let n = SEMI_MAJOR / (1.0 - E2 * s * s).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos * cos;
    let a = (g.x - p.central_meridian).to_radians() * cos;
    let m = meridian_arc(phi);

    let x = p.scale
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
    let y = p.scale
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

    Coord {
        x: x + p.false_easting,
        y: y + p.false_northing,
    }
}

fn tm_inverse(p: &TransverseMercatorParams, c: Coord<f64>) -> Coord<f64> {
    let ep2 = E2 / (1.0 - E2);
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let x = c.x - p.false_easting;
    let m = (c.y - p.false_northing) / p.scale;

    let mu = m / (SEMI_MAJOR * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let root = (1.0 - E2).sqrt();
    let e1 = (1.0 - root) / (1.0 + root);
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (s1, cos1) = phi1.sin_cos();
    let c1 = ep2 * cos1 * cos1;
    let t1 = phi1.tan().powi(2);
    let n1 = SEMI_MAJOR / (1.0 - E2 * s1 * s1).sqrt();
    let r1 = SEMI_MAJOR * (1.0 - E2) / (1.0 - E2 * s1 * s1).powf(1.5);
    let d = x / (n1 * p.scale);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos1;

    Coord {
        x: p.central_meridian + lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bc_albers() -> Projection {
        Crs::BC_ALBERS.projection().unwrap()
    }

    #[test]
    fn albers_origin_maps_to_false_easting() {
        let c = bc_albers().from_geographic(Coord { x: -126.0, y: 45.0 }).unwrap();
        assert_abs_diff_eq!(c.x, 1_000_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn albers_roundtrip_across_british_columbia() {
        let p = bc_albers();
        for &(lon, lat) in &[(-123.37, 48.42), (-117.0, 51.3), (-130.5, 58.9), (-120.0, 60.0)] {
            let planar = p.from_geographic(Coord { x: lon, y: lat }).unwrap();
            let back = p.to_geographic(planar).unwrap();
            assert_abs_diff_eq!(back.x, lon, epsilon = 1e-9);
            assert_abs_diff_eq!(back.y, lat, epsilon = 1e-9);
        }
    }

    #[test]
    fn utm_central_meridian_on_equator() {
        let p = Crs::Epsg(26910).projection().unwrap();
        let c = p.from_geographic(Coord { x: -123.0, y: 0.0 }).unwrap();
        assert_abs_diff_eq!(c.x, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn utm_roundtrip_inside_zone() {
        let p = Crs::Epsg(32611).projection().unwrap();
        for &(lon, lat) in &[(-117.0, 49.5), (-115.2, 52.1), (-119.8, 50.0)] {
            let planar = p.from_geographic(Coord { x: lon, y: lat }).unwrap();
            let back = p.to_geographic(planar).unwrap();
            assert_abs_diff_eq!(back.x, lon, epsilon = 1e-6);
            assert_abs_diff_eq!(back.y, lat, epsilon = 1e-6);
        }
    }

    #[test]
    fn web_mercator_antimeridian_x() {
        let c = Projection::WebMercator
            .from_geographic(Coord { x: 180.0, y: 0.0 })
            .unwrap();
        assert_abs_diff_eq!(c.x, 20_037_508.342_789_244, epsilon = 1e-6);
        assert!(Projection::WebMercator
            .from_geographic(Coord { x: 0.0, y: 90.0 })
            .is_err());
    }

    #[test]
    fn reconcile_same_crs_is_shared() {
        let r = reconcile(Crs::BC_ALBERS, Crs::BC_ALBERS, CrsResolutionPolicy::Fail).unwrap();
        assert_eq!(r, Reconciliation::Shared(Crs::BC_ALBERS));
    }

    #[test]
    fn reconcile_reprojects_into_target_frame() {
        let r = reconcile(Crs::BC_ALBERS, Crs::WGS84, CrsResolutionPolicy::Fail).unwrap();
        assert_eq!(r.shared_crs(), Crs::BC_ALBERS);
        assert!(matches!(r, Reconciliation::Reproject { .. }));
    }

    #[test]
    fn undefined_reference_depends_on_policy() {
        let err = reconcile(Crs::BC_ALBERS, Crs::Undefined, CrsResolutionPolicy::Fail).unwrap_err();
        assert_eq!(err.kind(), "incompatible_crs");
        let r = reconcile(Crs::BC_ALBERS, Crs::Undefined, CrsResolutionPolicy::AssumeTargetCrs).unwrap();
        assert_eq!(r, Reconciliation::Shared(Crs::BC_ALBERS));
    }

    #[test]
    fn undefined_target_only_passes_when_both_undefined_and_assumed() {
        assert!(reconcile(Crs::Undefined, Crs::BC_ALBERS, CrsResolutionPolicy::AssumeTargetCrs).is_err());
        assert!(reconcile(Crs::Undefined, Crs::Undefined, CrsResolutionPolicy::Fail).is_err());
        let r = reconcile(Crs::Undefined, Crs::Undefined, CrsResolutionPolicy::AssumeTargetCrs).unwrap();
        assert_eq!(r, Reconciliation::Shared(Crs::Undefined));
    }

    #[test]
    fn geographic_or_unknown_target_is_rejected() {
        assert!(reconcile(Crs::WGS84, Crs::WGS84, CrsResolutionPolicy::Fail).is_err());
        assert!(reconcile(Crs::Epsg(999_999), Crs::BC_ALBERS, CrsResolutionPolicy::Fail).is_err());
        assert!(reconcile(Crs::BC_ALBERS, Crs::Epsg(999_999), CrsResolutionPolicy::Fail).is_err());
    }

    #[test]
    fn crs_serializes_as_optional_code() {
        assert_eq!(serde_json::to_string(&Crs::BC_ALBERS).unwrap(), "3005");
        assert_eq!(serde_json::to_string(&Crs::Undefined).unwrap(), "null");
        let crs: Crs = serde_json::from_str("26910").unwrap();
        assert_eq!(crs, Crs::Epsg(26910));
    }
}
