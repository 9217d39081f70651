//! Target statistics records: the immutable per-(target, layer) output.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::CategoryTally;
use crate::config::CategoryTarget;
use crate::crs::Crs;
use crate::feature::{Target, TargetMetadata};

const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;
/// Relative slack when comparing tallied areas against category targets.
const TARGET_COMPARISON_EPSILON: f64 = 1e-9;

/// One row of the composition breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStatistic {
    pub category: String,
    pub area: f64,
    /// Percentage of the target's net area, 0–100.
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Met,
    /// Below the minimum share.
    Deficit,
    /// Above the maximum share.
    Exceeded,
}

/// Achieved area for one configured category target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAssessment {
    pub category: String,
    pub actual_area: f64,
    pub actual_fraction: f64,
    pub required_area: Option<f64>,
    pub maximum_area: Option<f64>,
    /// Actual minus required, or maximum minus actual when only a maximum is set.
    pub surplus: f64,
    pub status: AssessmentStatus,
}

/// Area bookkeeping for a target before overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetAreas {
    /// Validated target area before exclusions.
    pub gross: f64,
    /// Area removed by exclusion layers.
    pub excluded: f64,
}

/// Final statistics for one target against one reference layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatisticsRecord {
    target_id: String,
    metadata: TargetMetadata,
    layer_id: String,
    crs: Crs,
    gross_area: f64,
    excluded_area: f64,
    total_area: f64,
    categories: Vec<CategoryStatistic>,
    unclassified_area: f64,
    unclassified_percent: f64,
    eliminated_slivers: usize,
    assessments: Vec<TargetAssessment>,
}

impl TargetStatisticsRecord {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn metadata(&self) -> &TargetMetadata {
        &self.metadata
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    /// Frame all areas are measured in.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn gross_area(&self) -> f64 {
        self.gross_area
    }

    pub fn excluded_area(&self) -> f64 {
        self.excluded_area
    }

    /// Net target area the statistics are computed over.
    pub fn total_area(&self) -> f64 {
        self.total_area
    }

    /// Categories by descending area, ties by name.
    pub fn categories(&self) -> &[CategoryStatistic] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&CategoryStatistic> {
        self.categories.iter().find(|c| c.category == name)
    }

    pub fn unclassified_area(&self) -> f64 {
        self.unclassified_area
    }

    pub fn unclassified_percent(&self) -> f64 {
        self.unclassified_percent
    }

    /// Sliver parts whose area was merged into a neighbouring category.
    pub fn eliminated_slivers(&self) -> usize {
        self.eliminated_slivers
    }

    pub fn assessments(&self) -> &[TargetAssessment] {
        &self.assessments
    }

    /// Convert an area in this record's frame to hectares, if the frame is metric.
    pub fn hectares(&self, area: f64) -> Option<f64> {
        self.crs.is_metric().then(|| area / SQUARE_METRES_PER_HECTARE)
    }
}

/// Turns a finished tally into a record.
#[derive(Debug, Clone, Copy)]
pub struct RecordBuilder<'a> {
    category_targets: &'a BTreeMap<String, CategoryTarget>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(category_targets: &'a BTreeMap<String, CategoryTarget>) -> Self {
        Self { category_targets }
    }

    /// Pure: identical inputs always give identical records.
    ///
    /// Percentages are taken against the larger of the net area and the
    /// tallied coverage, so they close to 100 even when coverage overshoots
    /// within tolerance.
    pub fn build(
        &self,
        target: &Target,
        layer_id: &str,
        areas: TargetAreas,
        tally: &CategoryTally,
    ) -> TargetStatisticsRecord {
        let total_area = tally.target_area();
        let denominator = total_area.max(tally.covered());
        let percent = |area: f64| area / denominator * 100.0;

        let mut categories: Vec<CategoryStatistic> = tally
            .areas()
            .iter()
            .map(|(category, &area)| CategoryStatistic {
                category: category.clone(),
                area,
                percent: percent(area),
            })
            .collect();
        categories.sort_by(|a, b| {
            b.area
                .total_cmp(&a.area)
                .then_with(|| a.category.cmp(&b.category))
        });

        let assessments = self
            .category_targets
            .iter()
            .map(|(category, goal)| assess(category, goal, tally, total_area, denominator))
            .collect();

        TargetStatisticsRecord {
            target_id: target.id.clone(),
            metadata: target.metadata.clone(),
            layer_id: layer_id.to_string(),
            crs: target.crs,
            gross_area: areas.gross,
            excluded_area: areas.excluded,
            total_area,
            categories,
            unclassified_area: tally.unclassified(),
            unclassified_percent: percent(tally.unclassified()),
            eliminated_slivers: tally.eliminated_slivers(),
            assessments,
        }
    }
}

/// `share_denominator` is the same base the record's percentages use.
fn assess(
    category: &str,
    goal: &CategoryTarget,
    tally: &CategoryTally,
    total_area: f64,
    share_denominator: f64,
) -> TargetAssessment {
    let actual_area = tally.area_of(category).unwrap_or(0.0);
    let required_area = goal.min_fraction.map(|f| f * total_area);
    let maximum_area = goal.max_fraction.map(|f| f * total_area);
    let slack = TARGET_COMPARISON_EPSILON * total_area;

    let status = if required_area.is_some_and(|r| actual_area < r - slack) {
        AssessmentStatus::Deficit
    } else if maximum_area.is_some_and(|m| actual_area > m + slack) {
        AssessmentStatus::Exceeded
    } else {
        AssessmentStatus::Met
    };
    let surplus = match (required_area, maximum_area) {
        (Some(r), _) => actual_area - r,
        (None, Some(m)) => m - actual_area,
        (None, None) => 0.0,
    };

    TargetAssessment {
        category: category.to_string(),
        actual_area,
        actual_fraction: actual_area / share_denominator,
        required_area,
        maximum_area,
        surplus,
        status,
    }
}

/// Round for presentation: two decimals, or enough decimals to show the
/// first significant digit of a small fractional part.
pub fn round_for_display(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let fraction = value.abs().fract();
    let decimals = if fraction > 0.0 {
        (1 + (-fraction.log10()).floor() as i32).clamp(2, 15)
    } else {
        2
    };
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
