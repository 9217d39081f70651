//! OGMA overlay statistics.
//!
//! Measures how the area of each target polygon (an old growth management
//! area, or any other planning unit) breaks down across the categories of one
//! or more reference layers. Geometry is validated and repaired, layers are
//! brought into each target's projected CRS, exclusion layers are erased, and
//! every (target, layer) pair produces a [`TargetStatisticsRecord`].
//!
//! ```no_run
//! use ogma_core::{AnalysisConfig, Attributes, Crs, OgmaAnalyzer, ReferenceFeature, ReferenceLayer, Target};
//! use geo::{Geometry, Rect};
//!
//! let cover = ReferenceLayer::new("cover", Crs::BC_ALBERS).with_feature(ReferenceFeature::new(
//!     "f1",
//!     Attributes::new().with("category", "old_growth"),
//!     Geometry::Rect(Rect::new((0.0, 0.0), (6.0, 10.0))),
//! ));
//! let target = Target::new("ogma-1", Crs::BC_ALBERS, Geometry::Rect(Rect::new((0.0, 0.0), (10.0, 10.0))));
//!
//! let analyzer = OgmaAnalyzer::new(AnalysisConfig::default())?;
//! let report = analyzer.run(&[target], &[cover], &[]);
//! assert_eq!(report.records.len(), 1);
//! # Ok::<(), ogma_core::OgmaError>(())
//! ```

pub mod aggregate;
pub mod attributes;
pub mod config;
pub mod crs;
pub mod error;
pub mod exclusion;
pub mod feature;
pub mod geometry;
pub mod layer;
pub mod overlay;
pub mod pipeline;
pub mod record;

pub use aggregate::{Aggregator, CategoryTally, CompensatedSum};
pub use attributes::{AttributeValue, Attributes, CategoryKey, COMPOSITE_SEPARATOR, UNKNOWN_CATEGORY};
pub use config::{AnalysisConfig, CategoryTarget};
pub use crs::{reconcile, Crs, CrsResolutionPolicy, Projection, Reconciliation};
pub use error::{OgmaError, Result};
pub use exclusion::{apply_exclusions, ExclusionOutcome};
pub use feature::{ReferenceFeature, ReferenceLayer, Target, TargetMetadata};
pub use geometry::{GeometryValidator, ValidGeometry};
pub use layer::{FeatureExclusion, ValidatedLayer};
pub use overlay::{Fragments, IntersectionFragment, OverlayEngine, PreparedFeature, PreparedLayer};
pub use pipeline::{AnalysisReport, OgmaAnalyzer, TargetFailure};
pub use record::{
    round_for_display, AssessmentStatus, CategoryStatistic, RecordBuilder, TargetAreas, TargetAssessment,
    TargetStatisticsRecord,
};
