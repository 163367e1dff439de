// ⚖️ Comparison Engine - Real vs redistributed, period by period
//
// Joins the two datasets on (entity, period) and audits mass balance:
//   sum(real Top+Bottom) = sum(redistributed Top+Bottom)
// except where the Bottom group is empty, where the difference is the
// discarded surplus.

use crate::config::DEFAULT_MAX_EFFICIENCY;
use crate::error::RedistributionResult;
use crate::provider::GroupedPayload;
use crate::schema::DatasetValidator;
use crate::records::{Dataset, Entity, Group, Period, RecordKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// CONSERVATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConservationResult {
    /// Sums match within tolerance
    Balanced {
        sum_real: f64,
        sum_redistributed: f64,
    },

    /// Mass lost in a period with no Bottom group (surplus had no recipient)
    SurplusDiscarded {
        sum_real: f64,
        sum_redistributed: f64,
        lost: f64,
    },

    /// Mass changed where it should have been conserved
    Imbalanced {
        sum_real: f64,
        sum_redistributed: f64,
        difference: f64,
    },
}

impl ConservationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ConservationResult::Balanced { .. })
    }

    /// Balanced or explained by the discard policy
    pub fn is_consistent(&self) -> bool {
        !matches!(self, ConservationResult::Imbalanced { .. })
    }

    /// redistributed - real
    pub fn difference(&self) -> f64 {
        match self {
            ConservationResult::Balanced { .. } => 0.0,
            ConservationResult::SurplusDiscarded { lost, .. } => -*lost,
            ConservationResult::Imbalanced { difference, .. } => *difference,
        }
    }
}

// ============================================================================
// COMPARISON REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub entity: Entity,
    pub period: Period,
    pub group: Group,
    pub real: f64,
    pub redistributed: f64,
}

impl ComparisonRow {
    pub fn delta(&self) -> f64 {
        self.redistributed - self.real
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodAudit {
    pub period: Period,
    pub top_count: usize,
    pub bottom_count: usize,
    pub result: ConservationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Inner join of both datasets, in real-dataset order
    pub rows: Vec<ComparisonRow>,
    pub periods: Vec<PeriodAudit>,

    /// Keys present on one side only
    pub unmatched_real: usize,
    pub unmatched_redistributed: usize,

    pub compared_at: DateTime<Utc>,
}

impl ComparisonReport {
    pub fn is_consistent(&self) -> bool {
        self.periods.iter().all(|p| p.result.is_consistent())
    }

    pub fn total_discarded(&self) -> f64 {
        self.periods
            .iter()
            .map(|p| match p.result {
                ConservationResult::SurplusDiscarded { lost, .. } => lost,
                _ => 0.0,
            })
            .sum()
    }

    /// Rows of one entity ordered by period, for per-city series
    pub fn series(&self, entity_id: &str) -> Vec<&ComparisonRow> {
        let mut rows: Vec<&ComparisonRow> = self
            .rows
            .iter()
            .filter(|row| row.entity.id == entity_id)
            .collect();
        rows.sort_by_key(|row| row.period);
        rows
    }

    pub fn summary(&self) -> String {
        let imbalanced = self
            .periods
            .iter()
            .filter(|p| !p.result.is_consistent())
            .count();

        format!(
            "Comparison: {} rows over {} periods, {} imbalanced, {:.4} discarded, {} unmatched",
            self.rows.len(),
            self.periods.len(),
            imbalanced,
            self.total_discarded(),
            self.unmatched_real + self.unmatched_redistributed
        )
    }
}

/// `{ "real": {top, down}, "redistributed": {top, down} }` for the presenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPayload {
    pub real: GroupedPayload,
    pub redistributed: GroupedPayload,
}

impl ComparisonPayload {
    pub fn new(real: &Dataset, redistributed: &Dataset) -> Self {
        ComparisonPayload {
            real: GroupedPayload::from_dataset(real),
            redistributed: GroupedPayload::from_dataset(redistributed),
        }
    }
}

// ============================================================================
// COMPARISON ENGINE
// ============================================================================

pub struct ComparisonEngine {
    /// Relative tolerance for sum comparisons (default: 1e-9)
    pub tolerance: f64,

    /// Ceiling the redistribution ran with (default: 1.0)
    pub max_efficiency: f64,
}

impl ComparisonEngine {
    pub fn new() -> Self {
        ComparisonEngine {
            tolerance: 1e-9,
            max_efficiency: DEFAULT_MAX_EFFICIENCY,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        ComparisonEngine {
            tolerance,
            ..Self::new()
        }
    }

    pub fn with_ceiling(max_efficiency: f64) -> Self {
        ComparisonEngine {
            max_efficiency,
            ..Self::new()
        }
    }

    /// Join real and redistributed datasets and audit each period
    ///
    /// Both sides must be well-formed: one record per (entity, period).
    pub fn compare(&self, real: &Dataset, redistributed: &Dataset) -> RedistributionResult<ComparisonReport> {
        let validator = DatasetValidator::new();
        validator.validate(real)?;
        validator.validate(redistributed)?;

        let redistributed_by_key: HashMap<RecordKey, f64> = redistributed
            .iter()
            .map(|record| (record.key(), record.value))
            .collect();

        let rows: Vec<ComparisonRow> = real
            .iter()
            .filter_map(|record| {
                redistributed_by_key
                    .get(&record.key())
                    .map(|&value| ComparisonRow {
                        entity: record.entity.clone(),
                        period: record.period,
                        group: record.group,
                        real: record.value,
                        redistributed: value,
                    })
            })
            .collect();

        let periods = self.audit_periods(&rows);

        Ok(ComparisonReport {
            unmatched_real: real.len().saturating_sub(rows.len()),
            unmatched_redistributed: redistributed.len().saturating_sub(rows.len()),
            rows,
            periods,
            compared_at: Utc::now(),
        })
    }

    fn audit_periods(&self, rows: &[ComparisonRow]) -> Vec<PeriodAudit> {
        let mut by_period: BTreeMap<Period, Vec<&ComparisonRow>> = BTreeMap::new();
        for row in rows.iter().filter(|row| row.group.is_redistributed()) {
            by_period.entry(row.period).or_default().push(row);
        }

        by_period
            .into_iter()
            .map(|(period, rows)| {
                let top_count = rows.iter().filter(|r| r.group == Group::Top).count();
                let bottom_count = rows.iter().filter(|r| r.group == Group::Bottom).count();

                PeriodAudit {
                    period,
                    top_count,
                    bottom_count,
                    result: self.classify(&rows, bottom_count),
                }
            })
            .collect()
    }

    fn classify(&self, rows: &[&ComparisonRow], bottom_count: usize) -> ConservationResult {
        let sum_real: f64 = rows.iter().map(|r| r.real).sum();
        let sum_redistributed: f64 = rows.iter().map(|r| r.redistributed).sum();
        let difference = sum_redistributed - sum_real;

        if difference.abs() <= self.tolerance * sum_real.abs().max(1.0) {
            ConservationResult::Balanced {
                sum_real,
                sum_redistributed,
            }
        } else if difference < 0.0 && bottom_count == 0 && self.tops_capped(rows) {
            ConservationResult::SurplusDiscarded {
                sum_real,
                sum_redistributed,
                lost: -difference,
            }
        } else {
            ConservationResult::Imbalanced {
                sum_real,
                sum_redistributed,
                difference,
            }
        }
    }

    /// Every Top value went to min(real, ceiling) and nothing else moved
    fn tops_capped(&self, rows: &[&ComparisonRow]) -> bool {
        rows.iter().filter(|r| r.group == Group::Top).all(|r| {
            let expected = r.real.min(self.max_efficiency);
            (r.redistributed - expected).abs() <= self.tolerance * expected.abs().max(1.0)
        })
    }
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EfficiencyRecord;
    use crate::redistribution::redistribute;

    fn record(id: &str, period: u32, value: f64, group: Group) -> EfficiencyRecord {
        EfficiencyRecord::new(Entity::new(id, format!("City {}", id)), period, value, group)
    }

    fn real() -> Dataset {
        Dataset::new(vec![
            record("A", 1, 1.3, Group::Top),
            record("B", 1, 1.1, Group::Top),
            record("M", 1, 0.8, Group::Unranked),
            record("C", 1, 0.6, Group::Bottom),
            record("D", 1, 0.4, Group::Bottom),
            record("A", 2, 1.2, Group::Top),
            record("B", 2, 0.9, Group::Top),
        ])
    }

    #[test]
    fn test_compare_redistributed_output() {
        let real = real();
        let redistributed = redistribute(&real, 1.0).unwrap();

        let report = ComparisonEngine::new().compare(&real, &redistributed).unwrap();

        assert_eq!(report.rows.len(), 7);
        assert_eq!(report.unmatched_real, 0);
        assert!(report.is_consistent());

        // Period 1 has a Bottom group: balanced
        assert!(report.periods[0].result.is_balanced());

        // Period 2 has none: 0.2 discarded
        assert!(matches!(
            report.periods[1].result,
            ConservationResult::SurplusDiscarded { .. }
        ));
        assert!((report.total_discarded() - 0.2).abs() < 1e-12);

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_imbalance_detected() {
        let real = real();
        let tampered: Dataset = redistribute(&real, 1.0)
            .unwrap()
            .iter()
            .map(|r| {
                if r.entity.id == "C" {
                    r.with_value(r.value + 0.5)
                } else {
                    r.clone()
                }
            })
            .collect();

        let report = ComparisonEngine::new().compare(&real, &tampered).unwrap();

        assert!(!report.is_consistent());
        let difference = report.periods[0].result.difference();
        assert!((difference - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_inner_join_counts_unmatched() {
        let real = real();
        let partial = Dataset::new(vec![record("A", 1, 1.0, Group::Top)]);

        let report = ComparisonEngine::new().compare(&real, &partial).unwrap();

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.unmatched_real, 6);
        assert_eq!(report.unmatched_redistributed, 0);
    }

    #[test]
    fn test_series_sorted_by_period() {
        let real = real();
        let redistributed = redistribute(&real, 1.0).unwrap();
        let report = ComparisonEngine::new().compare(&real, &redistributed).unwrap();

        let series = report.series("A");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].period, Period(1));
        assert!((series[0].delta() + 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_comparison_payload_shape() {
        let real = real();
        let redistributed = redistribute(&real, 1.0).unwrap();

        let payload = ComparisonPayload::new(&real, &redistributed);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["real"]["top"].as_array().unwrap().len(), 2);
        assert_eq!(json["redistributed"]["down"].as_array().unwrap().len(), 2);
        assert_eq!(json["redistributed"]["top"][0]["efficiencies"][0]["efficiency"], 1.0);
        assert_eq!(json["real"]["top"][0]["city"]["name"], "City A");
    }

    #[test]
    fn test_duplicate_key_on_real_side_rejected() {
        let real = Dataset::new(vec![
            record("A", 1, 1.2, Group::Top),
            record("A", 1, 1.1, Group::Top),
        ]);
        let redistributed = Dataset::new(vec![record("A", 1, 1.0, Group::Top)]);

        let err = ComparisonEngine::new().compare(&real, &redistributed).unwrap_err();

        assert!(err
            .issues()
            .iter()
            .any(|i| i.kind == crate::error::IssueKind::DuplicateRecord));
    }

    #[test]
    fn test_top_lowered_below_ceiling_is_not_a_discard() {
        // No Bottom group, but A was pushed under the ceiling: mass went missing
        let real = Dataset::new(vec![
            record("A", 1, 0.9, Group::Top),
            record("B", 1, 1.2, Group::Top),
        ]);
        let redistributed = Dataset::new(vec![
            record("A", 1, 0.5, Group::Top),
            record("B", 1, 1.0, Group::Top),
        ]);

        let report = ComparisonEngine::new().compare(&real, &redistributed).unwrap();

        assert!(matches!(
            report.periods[0].result,
            ConservationResult::Imbalanced { .. }
        ));
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_discard_checked_against_ceiling() {
        let real = Dataset::new(vec![record("A", 1, 1.3, Group::Top)]);
        let redistributed = redistribute(&real, 0.9).unwrap();

        // Audited with the default 1.0 ceiling the capped value looks wrong
        let default_report = ComparisonEngine::new().compare(&real, &redistributed).unwrap();
        assert!(!default_report.is_consistent());

        let report = ComparisonEngine::with_ceiling(0.9).compare(&real, &redistributed).unwrap();
        assert!(report.is_consistent());
        assert!((report.total_discarded() - 0.4).abs() < 1e-12);
    }
}
