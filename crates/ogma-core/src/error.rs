/// Errors raised while computing statistics for a target.
///
/// Every variant is scoped to a single target pipeline; the batch runner turns
/// them into per-target failure records instead of aborting the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OgmaError {
    /// A geometry was empty, degenerate, or could not be repaired.
    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    /// Target and reference frames could not be brought into a shared planar CRS.
    #[error("incompatible coordinate reference systems: {reason}")]
    IncompatibleCrs { reason: String },

    /// Tallied coverage exceeded the target area by more than the tolerance.
    #[error(
        "area overrun: reference coverage {covered:.4} exceeds target area {target_area:.4} \
         beyond tolerance {tolerance}"
    )]
    AreaOverrun {
        covered: f64,
        target_area: f64,
        tolerance: f64,
    },

    /// The analysis configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl OgmaError {
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }

    pub fn incompatible_crs(reason: impl Into<String>) -> Self {
        Self::IncompatibleCrs {
            reason: reason.into(),
        }
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidGeometry { .. } => "invalid_geometry",
            Self::IncompatibleCrs { .. } => "incompatible_crs",
            Self::AreaOverrun { .. } => "area_overrun",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, OgmaError>;
