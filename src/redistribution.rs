// 🔁 Redistribution Engine - Cap the Top group, hand the surplus to the Bottom group
//
// Per period, independently:
//   surplus_i       = max(value_i - max_efficiency, 0)       for i in Top
//   top_i'          = min(value_i, max_efficiency)
//   bottom_j'       = bottom_j + sum(surplus) / |Bottom|      (uncapped)
//
// Zero-sum whenever Bottom is non-empty. With an empty Bottom the surplus has
// no recipient and is discarded; the report says how much.

use crate::config::{RedistributionConfig, DEFAULT_CONSERVATION_TOLERANCE, DEFAULT_MAX_EFFICIENCY};
use crate::error::{RedistributionError, RedistributionResult};
use crate::records::{Dataset, EfficiencyRecord, Group, Period};
use crate::schema::DatasetValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// PERIOD SUMMARY
// ============================================================================

/// What happened to one period during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period: Period,
    pub top_count: usize,
    pub bottom_count: usize,
    pub unranked_count: usize,

    /// Sum of Top values above the ceiling
    pub total_surplus: f64,

    /// Amount added to each Bottom record (0 when nothing was transferred)
    pub gain_per_entity: f64,

    /// Surplus with no recipient (Bottom empty)
    pub discarded_surplus: f64,

    /// Top + Bottom sum before the transform
    pub sum_before: f64,

    /// Top + Bottom sum after the transform
    pub sum_after: f64,
}

impl PeriodSummary {
    pub fn has_discarded_surplus(&self) -> bool {
        self.discarded_surplus > 0.0
    }

    /// Mass balance: sum_after == sum_before - discarded_surplus (relative tolerance)
    pub fn is_balanced(&self, tolerance: f64) -> bool {
        let expected = self.sum_before - self.discarded_surplus;
        (self.sum_after - expected).abs() <= tolerance * expected.abs().max(1.0)
    }
}

// ============================================================================
// REDISTRIBUTION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedistributionReport {
    pub run_id: Uuid,
    pub redistributed_at: DateTime<Utc>,
    pub max_efficiency: f64,

    /// Negative ceiling accepted in lenient mode
    pub degenerate_ceiling: bool,

    pub record_count: usize,
    pub periods: Vec<PeriodSummary>,
}

impl RedistributionReport {
    pub fn total_surplus(&self) -> f64 {
        self.periods.iter().map(|p| p.total_surplus).sum()
    }

    pub fn total_discarded_surplus(&self) -> f64 {
        self.periods.iter().map(|p| p.discarded_surplus).sum()
    }

    pub fn has_discarded_surplus(&self) -> bool {
        self.periods.iter().any(|p| p.has_discarded_surplus())
    }

    pub fn periods_with_discarded_surplus(&self) -> Vec<Period> {
        self.periods
            .iter()
            .filter(|p| p.has_discarded_surplus())
            .map(|p| p.period)
            .collect()
    }

    pub fn period(&self, period: Period) -> Option<&PeriodSummary> {
        self.periods.iter().find(|p| p.period == period)
    }

    pub fn summary(&self) -> String {
        format!(
            "Redistribution {}: {} records over {} periods, ceiling {:.3}, surplus {:.4} moved, {:.4} discarded",
            self.run_id,
            self.record_count,
            self.periods.len(),
            self.max_efficiency,
            self.total_surplus() - self.total_discarded_surplus(),
            self.total_discarded_surplus()
        )
    }
}

/// New dataset plus the diagnostics of the run that produced it
#[derive(Debug, Clone)]
pub struct RedistributionOutcome {
    pub dataset: Dataset,
    pub report: RedistributionReport,
}

// ============================================================================
// REDISTRIBUTION ENGINE
// ============================================================================

pub struct RedistributionEngine {
    /// Admissible ceiling for Top values (default: 1.0)
    pub max_efficiency: f64,

    /// Reject a negative ceiling (default: true)
    pub strict: bool,

    /// Relative tolerance used when logging mass balance (default: 1e-9)
    pub conservation_tolerance: f64,
}

/// Per-period result before it is folded into the output dataset
struct PeriodPlan {
    summary: PeriodSummary,
    updates: Vec<(usize, f64)>,
}

impl RedistributionEngine {
    pub fn new() -> Self {
        RedistributionEngine {
            max_efficiency: DEFAULT_MAX_EFFICIENCY,
            strict: true,
            conservation_tolerance: DEFAULT_CONSERVATION_TOLERANCE,
        }
    }

    pub fn with_max_efficiency(max_efficiency: f64) -> Self {
        RedistributionEngine {
            max_efficiency,
            ..Self::new()
        }
    }

    /// Accepts a negative ceiling, flagging it on the report instead of failing
    pub fn lenient(max_efficiency: f64) -> Self {
        RedistributionEngine {
            max_efficiency,
            strict: false,
            ..Self::new()
        }
    }

    pub fn from_config(config: &RedistributionConfig) -> Self {
        RedistributionEngine {
            max_efficiency: config.max_efficiency,
            strict: config.strict,
            conservation_tolerance: config.conservation_tolerance,
        }
    }

    /// Redistribute surplus within every period of `dataset`
    ///
    /// The input is left untouched; the output has the same keys, order and
    /// groups, with new values. A malformed dataset fails the whole call.
    ///
    /// Example:
    /// ```
    /// use efficiency_redistribution::{Dataset, EfficiencyRecord, Entity, Group, Period, RedistributionEngine};
    ///
    /// let dataset = Dataset::new(vec![
    ///     EfficiencyRecord::new(Entity::new("A", "City A"), Period(1), 1.3, Group::Top),
    ///     EfficiencyRecord::new(Entity::new("C", "City C"), Period(1), 0.6, Group::Bottom),
    /// ]);
    ///
    /// let outcome = RedistributionEngine::new().redistribute(&dataset).unwrap();
    /// assert_eq!(outcome.dataset.records()[0].value, 1.0);
    /// assert!((outcome.dataset.records()[1].value - 0.9).abs() < 1e-12);
    /// ```
    pub fn redistribute(&self, dataset: &Dataset) -> RedistributionResult<RedistributionOutcome> {
        let degenerate_ceiling = self.check_ceiling()?;
        DatasetValidator::new().validate(dataset)?;

        let run_id = Uuid::new_v4();
        let buckets = bucket_by_period(dataset.records());

        info!(
            %run_id,
            records = dataset.len(),
            periods = buckets.len(),
            max_efficiency = self.max_efficiency,
            "Redistributing efficiency surplus"
        );

        let plans = self.plan_periods(dataset.records(), &buckets);

        let mut values: Vec<f64> = dataset.iter().map(|r| r.value).collect();
        for plan in &plans {
            for &(index, value) in &plan.updates {
                values[index] = value;
            }
        }

        let output: Dataset = dataset
            .iter()
            .zip(values)
            .map(|(record, value)| record.with_value(value))
            .collect();

        let periods: Vec<PeriodSummary> = plans.into_iter().map(|plan| plan.summary).collect();

        for summary in &periods {
            if summary.has_discarded_surplus() {
                warn!(
                    %run_id,
                    period = summary.period.index(),
                    discarded = summary.discarded_surplus,
                    "Top surplus has no Bottom recipient, discarding"
                );
            }
            if !summary.is_balanced(self.conservation_tolerance) {
                warn!(
                    %run_id,
                    period = summary.period.index(),
                    before = summary.sum_before,
                    after = summary.sum_after,
                    "Period mass balance outside tolerance"
                );
            }
        }

        let report = RedistributionReport {
            run_id,
            redistributed_at: Utc::now(),
            max_efficiency: self.max_efficiency,
            degenerate_ceiling,
            record_count: output.len(),
            periods,
        };

        debug!("{}", report.summary());

        Ok(RedistributionOutcome {
            dataset: output,
            report,
        })
    }

    /// Validate the ceiling; `Ok(true)` means accepted but degenerate
    fn check_ceiling(&self) -> RedistributionResult<bool> {
        if !self.max_efficiency.is_finite() {
            return Err(RedistributionError::invalid_parameter(
                "max_efficiency",
                self.max_efficiency,
                "must be finite",
            ));
        }

        if self.max_efficiency < 0.0 {
            if self.strict {
                return Err(RedistributionError::invalid_parameter(
                    "max_efficiency",
                    self.max_efficiency,
                    "must not be negative",
                ));
            }
            warn!(
                max_efficiency = self.max_efficiency,
                "Negative ceiling: every Top value counts as surplus"
            );
            return Ok(true);
        }

        Ok(false)
    }

    #[cfg(feature = "parallel")]
    fn plan_periods(
        &self,
        records: &[EfficiencyRecord],
        buckets: &[(Period, Vec<usize>)],
    ) -> Vec<PeriodPlan> {
        use rayon::prelude::*;

        buckets
            .par_iter()
            .map(|(period, indices)| self.plan_period(*period, indices, records))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn plan_periods(
        &self,
        records: &[EfficiencyRecord],
        buckets: &[(Period, Vec<usize>)],
    ) -> Vec<PeriodPlan> {
        buckets
            .iter()
            .map(|(period, indices)| self.plan_period(*period, indices, records))
            .collect()
    }

    /// Cap, collect and transfer for a single period
    fn plan_period(&self, period: Period, indices: &[usize], records: &[EfficiencyRecord]) -> PeriodPlan {
        let ceiling = self.max_efficiency;

        let mut top = Vec::new();
        let mut bottom = Vec::new();
        let mut unranked_count = 0;

        for &index in indices {
            match records[index].group {
                Group::Top => top.push(index),
                Group::Bottom => bottom.push(index),
                Group::Unranked => unranked_count += 1,
            }
        }

        let sum_before: f64 = top
            .iter()
            .chain(bottom.iter())
            .map(|&index| records[index].value)
            .sum();

        let total_surplus: f64 = top
            .iter()
            .map(|&index| (records[index].value - ceiling).max(0.0))
            .sum();

        let mut updates = Vec::with_capacity(top.len() + bottom.len());
        for &index in &top {
            updates.push((index, records[index].value.min(ceiling)));
        }

        let mut gain_per_entity = 0.0;
        let mut discarded_surplus = 0.0;

        if total_surplus > 0.0 {
            if bottom.is_empty() {
                discarded_surplus = total_surplus;
            } else {
                gain_per_entity = total_surplus / bottom.len() as f64;
                for &index in &bottom {
                    updates.push((index, records[index].value + gain_per_entity));
                }
            }
        }

        let sum_after: f64 = top
            .iter()
            .map(|&index| records[index].value.min(ceiling))
            .chain(bottom.iter().map(|&index| records[index].value + gain_per_entity))
            .sum();

        debug!(
            period = period.index(),
            top = top.len(),
            bottom = bottom.len(),
            total_surplus,
            gain_per_entity,
            "Period planned"
        );

        PeriodPlan {
            summary: PeriodSummary {
                period,
                top_count: top.len(),
                bottom_count: bottom.len(),
                unranked_count,
                total_surplus,
                gain_per_entity,
                discarded_surplus,
                sum_before,
                sum_after,
            },
            updates,
        }
    }
}

impl Default for RedistributionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Record indices grouped by period, ascending
fn bucket_by_period(records: &[EfficiencyRecord]) -> Vec<(Period, Vec<usize>)> {
    let mut buckets: BTreeMap<Period, Vec<usize>> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        buckets.entry(record.period).or_default().push(index);
    }
    buckets.into_iter().collect()
}

/// `redistribute(dataset, max_efficiency) -> dataset'` in strict mode
pub fn redistribute(dataset: &Dataset, max_efficiency: f64) -> RedistributionResult<Dataset> {
    RedistributionEngine::with_max_efficiency(max_efficiency)
        .redistribute(dataset)
        .map(|outcome| outcome.dataset)
}

// ============================================================================
// TESTS
// ============================================================================
