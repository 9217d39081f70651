//! Batch orchestration.
//!
//! Per target, in order:
//!   1. validate the target geometry
//!   2. reconcile every layer into the target's CRS (prepared once per CRS)
//!   3. erase exclusion layers
//!   4. overlay each reference layer and aggregate its fragments
//!   5. build one record per (target, layer)
//!
//! Targets are independent. Prepared layers are shared read-only, every tally
//! is local to its target, and a failure only removes the target it belongs to.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregator;
use crate::config::AnalysisConfig;
use crate::crs::{reconcile, Crs};
use crate::error::{OgmaError, Result};
use crate::exclusion::apply_exclusions;
use crate::feature::{ReferenceLayer, Target};
use crate::layer::{FeatureExclusion, ValidatedLayer};
use crate::overlay::{OverlayEngine, PreparedLayer};
use crate::record::{RecordBuilder, TargetAreas, TargetStatisticsRecord};

/// A target that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target_id: String,
    /// Layer being processed when the failure happened, if any.
    pub layer_id: Option<String>,
    /// Machine-readable error kind, see [`OgmaError::kind`].
    pub kind: String,
    pub message: String,
}

impl TargetFailure {
    fn new(target: &Target, layer_id: Option<&str>, error: &OgmaError) -> Self {
        Self {
            target_id: target.id.clone(),
            layer_id: layer_id.map(str::to_string),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layer_id {
            Some(layer) => write!(f, "{} [{}]: {}", self.target_id, layer, self.message),
            None => write!(f, "{}: {}", self.target_id, self.message),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// One per (successful target, layer), in target then layer input order.
    pub records: Vec<TargetStatisticsRecord>,
    pub failures: Vec<TargetFailure>,
    /// Reference or exclusion features left out of the run.
    pub excluded_features: Vec<FeatureExclusion>,
}

impl AnalysisReport {
    pub fn records_for<'a>(&'a self, target_id: &'a str) -> impl Iterator<Item = &'a TargetStatisticsRecord> + 'a {
        self.records.iter().filter(move |r| r.target_id() == target_id)
    }

    pub fn record(&self, target_id: &str, layer_id: &str) -> Option<&TargetStatisticsRecord> {
        self.records
            .iter()
            .find(|r| r.target_id() == target_id && r.layer_id() == layer_id)
    }

    pub fn failure_for(&self, target_id: &str) -> Option<&TargetFailure> {
        self.failures.iter().find(|f| f.target_id == target_id)
    }
}

/// Layers reconciled into one target CRS.
struct Frame {
    /// Whether the CRS is usable as a working frame at all.
    usable: Result<()>,
    layers: Vec<(String, Result<PreparedLayer>)>,
    exclusions: Vec<(String, Result<PreparedLayer>)>,
}

/// Runs the overlay statistics pipeline over a batch of targets.
#[derive(Debug, Clone)]
pub struct OgmaAnalyzer {
    config: AnalysisConfig,
}

impl OgmaAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Process every target against every reference layer.
    ///
    /// `exclusions` are erased from each target first. Never fails as a
    /// whole: per-target errors are collected in [`AnalysisReport::failures`].
    pub fn run(&self, targets: &[Target], layers: &[ReferenceLayer], exclusions: &[ReferenceLayer]) -> AnalysisReport {
        let validator = self.config.validator();
        let validated_layers: Vec<ValidatedLayer> =
            layers.iter().map(|l| ValidatedLayer::validate(l, &validator)).collect();
        let validated_exclusions: Vec<ValidatedLayer> =
            exclusions.iter().map(|l| ValidatedLayer::validate(l, &validator)).collect();

        let mut excluded_features: BTreeSet<FeatureExclusion> = validated_layers
            .iter()
            .chain(&validated_exclusions)
            .flat_map(|l| l.excluded.iter().cloned())
            .collect();

        let frames = self.prepare_frames(targets, &validated_layers, &validated_exclusions, &mut excluded_features);

        #[cfg(feature = "threading")]
        let outcomes: Vec<std::result::Result<Vec<TargetStatisticsRecord>, TargetFailure>> = {
            use rayon::prelude::*;
            targets
                .par_iter()
                .map(|target| self.analyze_target(target, frames.get(&target.crs)))
                .collect()
        };
        #[cfg(not(feature = "threading"))]
        let outcomes: Vec<std::result::Result<Vec<TargetStatisticsRecord>, TargetFailure>> = targets
            .iter()
            .map(|target| self.analyze_target(target, frames.get(&target.crs)))
            .collect();

        let mut report = AnalysisReport {
            excluded_features: excluded_features.into_iter().collect(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(records) => report.records.extend(records),
                Err(failure) => {
                    tracing::warn!(target_id = %failure.target_id, kind = %failure.kind, "{}", failure.message);
                    report.failures.push(failure);
                }
            }
        }

        tracing::info!(
            targets = targets.len(),
            layers = layers.len(),
            records = report.records.len(),
            failed = report.failures.len(),
            excluded_features = report.excluded_features.len(),
            "analysis complete"
        );
        report
    }

    /// One frame per distinct target CRS, each checked and prepared once.
    fn prepare_frames(
        &self,
        targets: &[Target],
        validated_layers: &[ValidatedLayer],
        validated_exclusions: &[ValidatedLayer],
        excluded_features: &mut BTreeSet<FeatureExclusion>,
    ) -> BTreeMap<Crs, Frame> {
        let target_crs: BTreeSet<Crs> = targets.iter().map(|t| t.crs).collect();
        let mut frames: BTreeMap<Crs, Frame> = BTreeMap::new();
        for crs in target_crs {
            let mut prepare = |validated: &[ValidatedLayer]| -> Vec<(String, Result<PreparedLayer>)> {
                validated
                    .iter()
                    .map(|layer| {
                        let prepared = layer
                            .prepare_for(crs, self.config.crs_policy)
                            .map(|(prepared, dropped)| {
                                excluded_features.extend(dropped);
                                prepared
                            });
                        (layer.id.clone(), prepared)
                    })
                    .collect()
            };
            let frame = Frame {
                usable: reconcile(crs, crs, self.config.crs_policy).map(|_| ()),
                layers: prepare(validated_layers),
                exclusions: prepare(validated_exclusions),
            };
            frames.insert(crs, frame);
        }
        frames
    }

    fn analyze_target(
        &self,
        target: &Target,
        frame: Option<&Frame>,
    ) -> std::result::Result<Vec<TargetStatisticsRecord>, TargetFailure> {
        let fail = |layer_id: Option<&str>, error: &OgmaError| TargetFailure::new(target, layer_id, error);
        let config = &self.config;

        let frame = frame.ok_or_else(|| {
            fail(
                None,
                &OgmaError::incompatible_crs(format!("no working frame prepared for {}", target.crs)),
            )
        })?;
        // The target frame must be usable on its own, even with no layers.
        frame.usable.as_ref().map_err(|e| fail(None, e))?;

        let gross = config
            .validator()
            .validate(&target.geometry)
            .map_err(|e| fail(None, &e))?;
        if gross.was_repaired() {
            tracing::debug!(target_id = %target.id, "target geometry repaired");
        }

        let exclusion_layers = frame
            .exclusions
            .iter()
            .map(|(id, prepared)| prepared.as_ref().map_err(|e| fail(Some(id.as_str()), e)))
            .collect::<std::result::Result<Vec<&PreparedLayer>, _>>()?;
        let outcome = apply_exclusions(&gross, &exclusion_layers).map_err(|e| fail(None, &e))?;
        let net = outcome.net;
        let areas = TargetAreas {
            gross: gross.area(),
            excluded: outcome.excluded_area,
        };

        let engine = OverlayEngine::new(config.sliver_area);
        let aggregator = Aggregator::new(config.area_tolerance);
        let builder = RecordBuilder::new(&config.category_targets);

        let mut records = Vec::with_capacity(frame.layers.len());
        for (layer_id, prepared) in &frame.layers {
            let layer = prepared.as_ref().map_err(|e| fail(Some(layer_id.as_str()), e))?;
            let mut fragments = engine.intersect(&net, layer);
            let tally = aggregator
                .aggregate(&net, &mut fragments, config.category_attribute_for(layer_id))
                .map_err(|e| fail(Some(layer_id.as_str()), &e))?;

            tracing::debug!(
                target_id = %target.id,
                layer = %layer_id,
                categories = tally.areas().len(),
                fragments = tally.fragment_count(),
                eliminated_slivers = tally.eliminated_slivers(),
                unclassified = tally.unclassified(),
                "target tallied"
            );
            records.push(builder.build(target, layer_id, areas, &tally));
        }
        Ok(records)
    }
}
