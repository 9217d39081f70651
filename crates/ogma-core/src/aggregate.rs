//! Statistics aggregator: folds fragments into a per-category area tally.
//!
//! Sums use Neumaier compensation so that the tally does not depend on how
//! many small fragments a category is split into, and categories are kept in a
//! `BTreeMap` so iteration order never varies between runs.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attributes::CategoryKey;
use crate::error::{OgmaError, Result};
use crate::geometry::ValidGeometry;
use crate::overlay::IntersectionFragment;

/// Neumaier compensated summation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

impl Extend<f64> for CompensatedSum {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for v in iter {
            self.add(v);
        }
    }
}

/// Finalised category → area tally for one (target, layer) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTally {
    target_area: f64,
    areas: BTreeMap<String, f64>,
    covered: f64,
    unclassified: f64,
    fragment_count: usize,
    eliminated_slivers: usize,
    eliminated_sliver_area: f64,
}

impl CategoryTally {
    pub fn target_area(&self) -> f64 {
        self.target_area
    }

    /// Category → accumulated area, ordered by category name.
    pub fn areas(&self) -> &BTreeMap<String, f64> {
        &self.areas
    }

    pub fn area_of(&self, category: &str) -> Option<f64> {
        self.areas.get(category).copied()
    }

    /// Total tallied area (may exceed the target area by up to the tolerance).
    pub fn covered(&self) -> f64 {
        self.covered
    }

    /// Target area not covered by any fragment, clamped at zero.
    pub fn unclassified(&self) -> f64 {
        self.unclassified
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Sliver parts merged into a neighbouring category.
    pub fn eliminated_slivers(&self) -> usize {
        self.eliminated_slivers
    }

    pub fn eliminated_sliver_area(&self) -> f64 {
        self.eliminated_sliver_area
    }
}

/// Accumulates fragments for a single target.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    area_tolerance: f64,
}

impl Aggregator {
    /// `area_tolerance`: fraction of target area that coverage may exceed.
    pub fn new(area_tolerance: f64) -> Self {
        Self { area_tolerance }
    }

    /// Consume `fragments` once, bucketing each by its category key. Features
    /// without the attribute land in `"unknown"`.
    ///
    /// Sliver area is eliminated into the category of the largest kept
    /// fragment, so it stays in the composition. It is left unclassified only
    /// when every fragment is a sliver.
    pub fn aggregate<'a, I>(&self, target: &ValidGeometry, fragments: I, key: &CategoryKey) -> Result<CategoryTally>
    where
        I: IntoIterator<Item = IntersectionFragment<'a>>,
    {
        self.aggregate_area(target.area(), fragments, key)
    }

    pub fn aggregate_area<'a, I>(&self, target_area: f64, fragments: I, key: &CategoryKey) -> Result<CategoryTally>
    where
        I: IntoIterator<Item = IntersectionFragment<'a>>,
    {
        let mut sums: BTreeMap<String, CompensatedSum> = BTreeMap::new();
        let mut covered = CompensatedSum::default();
        let mut slivers = CompensatedSum::default();
        let mut eliminated_slivers = 0usize;
        let mut fragment_count = 0usize;
        let mut largest: Option<(f64, String)> = None;

        for fragment in fragments {
            covered.add(fragment.total_area());
            fragment_count += 1;
            if fragment.slivers > 0 {
                slivers.add(fragment.sliver_area);
                eliminated_slivers += fragment.slivers;
            }
            if fragment.area > 0.0 {
                let category = fragment.attributes.category_for(key);
                if largest.as_ref().map_or(true, |(area, _)| fragment.area > *area) {
                    largest = Some((fragment.area, category.clone()));
                }
                sums.entry(category).or_default().add(fragment.area);
            }
        }

        let sliver_area = slivers.value();
        match largest {
            Some((_, category)) if sliver_area > 0.0 => {
                sums.entry(category).or_default().add(sliver_area);
            }
            _ => {}
        }

        let areas: BTreeMap<String, f64> = sums.into_iter().map(|(k, s)| (k, s.value())).collect();
        let covered = covered.value();
        let mut classified = CompensatedSum::default();
        classified.extend(areas.values().copied());
        let classified = classified.value();
        let remainder = target_area - covered;
        if remainder < 0.0 && -remainder > self.area_tolerance * target_area {
            return Err(OgmaError::AreaOverrun {
                covered,
                target_area,
                tolerance: self.area_tolerance,
            });
        }
        let unclassified = (target_area - classified).max(0.0);

        Ok(CategoryTally {
            target_area,
            areas,
            covered: classified,
            unclassified,
            fragment_count,
            eliminated_slivers,
            eliminated_sliver_area: sliver_area,
        })
    }
}
