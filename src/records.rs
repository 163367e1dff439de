// 📊 Efficiency Records - the data contract shared by provider, engine and presenter
//
// A Dataset is built fresh for one (year, period range) query, consumed once
// by the RedistributionEngine and thrown away after presentation.
// Records are values: the engine never edits them, it builds new ones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

// ============================================================================
// ENTITY
// ============================================================================

/// A ranked subject (a municipality)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identity from the ranking service (city id)
    pub id: String,

    /// Display name (city name)
    pub name: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Entity {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// ============================================================================
// PERIOD
// ============================================================================

/// Discrete reporting bucket: month 1..12, bimonthly 1..3, quarter...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(pub u32);

impl Period {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Period {
    fn from(index: u32) -> Self {
        Period(index)
    }
}

// ============================================================================
// GROUP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    /// Over-performers: capped at the ceiling, donate their surplus
    #[serde(rename = "top")]
    Top,

    /// Under-performers: receive the surplus
    #[serde(rename = "down", alias = "bottom")]
    Bottom,

    /// Ranked in the middle, excluded from redistribution
    #[serde(rename = "unranked")]
    Unranked,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Top => "top",
            Group::Bottom => "down",
            Group::Unranked => "unranked",
        }
    }

    /// Top and Bottom take part in redistribution, Unranked does not
    pub fn is_redistributed(&self) -> bool {
        !matches!(self, Group::Unranked)
    }
}

// ============================================================================
// EFFICIENCY RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyRecord {
    pub entity: Entity,
    pub period: Period,
    pub value: f64,
    pub group: Group,
}

/// Lookup key: one record per (entity, period)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub entity_id: String,
    pub period: Period,
}

impl EfficiencyRecord {
    pub fn new(entity: Entity, period: impl Into<Period>, value: f64, group: Group) -> Self {
        EfficiencyRecord {
            entity,
            period: period.into(),
            value,
            group,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            entity_id: self.entity.id.clone(),
            period: self.period,
        }
    }

    /// Same record with a different value
    pub fn with_value(&self, value: f64) -> Self {
        EfficiencyRecord {
            value,
            ..self.clone()
        }
    }
}

// ============================================================================
// DATASET
// ============================================================================

/// Ordered collection of efficiency records (order = provider rank order)
///
/// Construction does not validate; see `schema::DatasetValidator`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    records: Vec<EfficiencyRecord>,
}

impl Dataset {
    pub fn new(records: Vec<EfficiencyRecord>) -> Self {
        Dataset { records }
    }

    pub fn empty() -> Self {
        Dataset::default()
    }

    pub fn records(&self) -> &[EfficiencyRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<EfficiencyRecord> {
        self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &EfficiencyRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find the record for an (entity, period) pair
    pub fn get(&self, entity_id: &str, period: Period) -> Option<&EfficiencyRecord> {
        self.records
            .iter()
            .find(|r| r.entity.id == entity_id && r.period == period)
    }

    /// Distinct periods present in the dataset, ascending
    pub fn periods(&self) -> Vec<Period> {
        self.records
            .iter()
            .map(|r| r.period)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct entities of a group, in first-appearance order
    pub fn entities(&self, group: Group) -> Vec<Entity> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| r.group == group)
            .filter(|r| seen.insert(r.entity.id.clone()))
            .map(|r| r.entity.clone())
            .collect()
    }

    pub fn records_for_period(&self, period: Period) -> impl Iterator<Item = &EfficiencyRecord> {
        self.records.iter().filter(move |r| r.period == period)
    }

    /// Sum of Top + Bottom values for one period (Unranked excluded)
    pub fn redistributed_sum(&self, period: Period) -> f64 {
        self.records_for_period(period)
            .filter(|r| r.group.is_redistributed())
            .map(|r| r.value)
            .sum()
    }

    /// Keep only records whose period lies in `first..=last`
    pub fn filter_periods(&self, first: Period, last: Period) -> Dataset {
        Dataset::new(
            self.records
                .iter()
                .filter(|r| r.period >= first && r.period <= last)
                .cloned()
                .collect(),
        )
    }
}

impl FromIterator<EfficiencyRecord> for Dataset {
    fn from_iter<I: IntoIterator<Item = EfficiencyRecord>>(iter: I) -> Self {
        Dataset::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a EfficiencyRecord;
    type IntoIter = std::slice::Iter<'a, EfficiencyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ============================================================================
// TESTS
// ============================================================================
