// 🏙️ Ranked Efficiency Providers - where datasets come from
//
// The ranking service emits two shapes:
//   grouped:  { "top": [CityBlock], "down": [CityBlock] }
//   flat:     [ { "cityId", "cityName", "bimonthly", "efficiency", ... } ] in rank order
//
// Flat rows carry no group; it is derived from a rank threshold N
// (first N entities = Top, last N = Bottom, the rest Unranked).

use crate::records::{Dataset, EfficiencyRecord, Entity, Group, Period};
use crate::schema::DatasetValidator;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// QUERY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedQuery {
    pub year: i32,

    /// Inclusive period range; None = every period available
    pub periods: Option<(Period, Period)>,

    /// Rank threshold N (top-N / bottom-N)
    pub rank: usize,
}

impl RankedQuery {
    pub fn new(year: i32, rank: usize) -> Self {
        RankedQuery {
            year,
            periods: None,
            rank,
        }
    }

    pub fn with_periods(mut self, first: impl Into<Period>, last: impl Into<Period>) -> Self {
        self.periods = Some((first.into(), last.into()));
        self
    }

    fn restrict(&self, dataset: Dataset) -> Dataset {
        match self.periods {
            Some((first, last)) => dataset.filter_periods(first, last),
            None => dataset,
        }
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Supplies a validated, grouped dataset for one (year, period range)
pub trait RankedEfficiencyProvider: Send + Sync {
    fn ranked(&self, query: &RankedQuery) -> Result<Dataset>;

    /// Provider name (for logs)
    fn name(&self) -> &str;
}

// ============================================================================
// GROUPED PAYLOAD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRef {
    #[serde(default, deserialize_with = "optional_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodEfficiency {
    #[serde(alias = "bimonthly", alias = "period")]
    pub month: u32,

    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityBlock {
    pub city: CityRef,
    pub efficiencies: Vec<PeriodEfficiency>,
}

impl CityBlock {
    /// Missing city id falls back to the name
    fn entity(&self) -> Entity {
        let id = self
            .city
            .id
            .clone()
            .unwrap_or_else(|| self.city.name.clone());
        Entity::new(id, self.city.name.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedPayload {
    #[serde(default)]
    pub top: Vec<CityBlock>,

    #[serde(default, alias = "bottom")]
    pub down: Vec<CityBlock>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unranked: Vec<CityBlock>,
}

impl GroupedPayload {
    pub fn into_dataset(self) -> Dataset {
        let mut records = Vec::new();

        for (group, blocks) in [
            (Group::Top, self.top),
            (Group::Bottom, self.down),
            (Group::Unranked, self.unranked),
        ] {
            for block in blocks {
                let entity = block.entity();
                for point in &block.efficiencies {
                    records.push(EfficiencyRecord::new(
                        entity.clone(),
                        point.month,
                        point.efficiency,
                        group,
                    ));
                }
            }
        }

        Dataset::new(records)
    }

    /// Regroup records into city blocks, series ordered by period
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let mut payload = GroupedPayload::default();

        for group in [Group::Top, Group::Bottom, Group::Unranked] {
            let blocks: Vec<CityBlock> = dataset
                .entities(group)
                .into_iter()
                .map(|entity| {
                    let series: BTreeMap<Period, f64> = dataset
                        .iter()
                        .filter(|r| r.entity.id == entity.id)
                        .map(|r| (r.period, r.value))
                        .collect();

                    CityBlock {
                        city: CityRef {
                            id: Some(entity.id),
                            name: entity.name,
                        },
                        efficiencies: series
                            .into_iter()
                            .map(|(period, efficiency)| PeriodEfficiency {
                                month: period.index(),
                                efficiency,
                            })
                            .collect(),
                    }
                })
                .collect();

            match group {
                Group::Top => payload.top = blocks,
                Group::Bottom => payload.down = blocks,
                Group::Unranked => payload.unranked = blocks,
            }
        }

        payload
    }
}

// ============================================================================
// FLAT RANKED ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRow {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub city_id: String,

    pub city_name: String,

    #[serde(alias = "month", alias = "period")]
    pub bimonthly: u32,

    pub efficiency: f64,
}

/// Assign groups to rank-ordered rows using threshold `rank`
///
/// With k distinct entities: positions < min(N, k) are Top, the last
/// min(N, k - top) are Bottom, anything between is Unranked.
pub fn assign_groups_by_rank(rows: &[RankedRow], rank: usize) -> Dataset {
    let mut order: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let next = order.len();
        order.entry(row.city_id.as_str()).or_insert(next);
    }

    let total = order.len();
    let top_count = rank.min(total);
    let bottom_count = rank.min(total - top_count);

    rows.iter()
        .map(|row| {
            let position = order[row.city_id.as_str()];
            let group = if position < top_count {
                Group::Top
            } else if position >= total - bottom_count {
                Group::Bottom
            } else {
                Group::Unranked
            };

            EfficiencyRecord::new(
                Entity::new(row.city_id.clone(), row.city_name.clone()),
                row.bimonthly,
                row.efficiency,
                group,
            )
        })
        .collect()
}

// ============================================================================
// LOADERS
// ============================================================================

/// Parse either payload shape; `rank` applies to flat rows only
pub fn parse_payload(json: Value, rank: usize) -> Result<Dataset> {
    let is_grouped = ["top", "down", "bottom"]
        .iter()
        .any(|key| json.get(key).is_some());

    if json.is_array() {
        let rows: Vec<RankedRow> =
            serde_json::from_value(json).context("Failed to parse ranked rows")?;
        Ok(assign_groups_by_rank(&rows, rank))
    } else if is_grouped {
        let payload: GroupedPayload =
            serde_json::from_value(json).context("Failed to parse grouped ranking payload")?;
        Ok(payload.into_dataset())
    } else {
        Err(anyhow!(
            "Unrecognized ranking payload: expected an array of rows or an object with 'top'/'down'/'bottom'"
        ))
    }
}

pub fn load_json(path: &Path, rank: usize) -> Result<Dataset> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let json: Value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON from {}", path.display()))?;

    parse_payload(json, rank).with_context(|| format!("Invalid ranking payload in {}", path.display()))
}

/// Load rank-ordered rows from CSV (cityId,cityName,bimonthly,efficiency,...)
pub fn load_csv(path: &Path, rank: usize) -> Result<Dataset> {
    let mut rdr = csv::Reader::from_path(path).context("Failed to open CSV file")?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: RankedRow = result.context("Failed to deserialize ranked row")?;
        rows.push(row);
    }

    Ok(assign_groups_by_rank(&rows, rank))
}

// ============================================================================
// IN-MEMORY PROVIDER
// ============================================================================

/// Datasets registered per year, groups already assigned
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    datasets: HashMap<i32, Dataset>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        InMemoryProvider::default()
    }

    pub fn insert(&mut self, year: i32, dataset: Dataset) {
        self.datasets.insert(year, dataset);
    }

    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.datasets.keys().copied().collect();
        years.sort_unstable();
        years
    }
}

impl RankedEfficiencyProvider for InMemoryProvider {
    fn ranked(&self, query: &RankedQuery) -> Result<Dataset> {
        let dataset = self
            .datasets
            .get(&query.year)
            .cloned()
            .ok_or_else(|| anyhow!("No ranked data for year {}", query.year))?;

        let dataset = query.restrict(dataset);
        DatasetValidator::new()
            .validate(&dataset)
            .with_context(|| format!("Ranked data for {} is malformed", query.year))?;

        Ok(dataset)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

// ============================================================================
// FILE PROVIDER
// ============================================================================

/// Reads `<dir>/ranked_<year>.json`, falling back to `<dir>/ranked_<year>.csv`
#[derive(Debug, Clone)]
pub struct FileProvider {
    dir: PathBuf,
}

impl FileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileProvider { dir: dir.into() }
    }

    fn path_for(&self, year: i32, extension: &str) -> PathBuf {
        self.dir.join(format!("ranked_{}.{}", year, extension))
    }
}

impl RankedEfficiencyProvider for FileProvider {
    fn ranked(&self, query: &RankedQuery) -> Result<Dataset> {
        let json_path = self.path_for(query.year, "json");
        let csv_path = self.path_for(query.year, "csv");

        let dataset = if json_path.exists() {
            load_json(&json_path, query.rank)?
        } else if csv_path.exists() {
            load_csv(&csv_path, query.rank)?
        } else {
            return Err(anyhow!(
                "No ranked data for year {} in {}",
                query.year,
                self.dir.display()
            ));
        };

        let dataset = query.restrict(dataset);
        DatasetValidator::new()
            .validate(&dataset)
            .with_context(|| format!("Ranked data for {} is malformed", query.year))?;

        debug!(
            provider = self.name(),
            year = query.year,
            records = dataset.len(),
            "Loaded ranked dataset"
        );

        Ok(dataset)
    }

    fn name(&self) -> &str {
        "file"
    }
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(text) => text,
            RawId::Signed(n) => n.to_string(),
            RawId::Unsigned(n) => n.to_string(),
        }
    }
}

/// City ids arrive as numbers from the API and as text from CSV exports
fn id_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RawId::into_string)
}

fn optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|id| id.map(RawId::into_string))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn flat_rows() -> Value {
        json!([
            { "cityId": 1, "cityName": "Joinville", "bimonthly": 1, "efficiency": 1.2, "productivity": 3.1 },
            { "cityId": 1, "cityName": "Joinville", "bimonthly": 2, "efficiency": 1.1, "productivity": 3.0 },
            { "cityId": 2, "cityName": "Blumenau", "bimonthly": 1, "efficiency": 0.9, "productivity": 2.2 },
            { "cityId": 3, "cityName": "Lages", "bimonthly": 1, "efficiency": 0.7, "productivity": 1.9 },
            { "cityId": 4, "cityName": "Chapecó", "bimonthly": 1, "efficiency": 0.4, "productivity": 1.1 },
            { "cityId": 4, "cityName": "Chapecó", "bimonthly": 2, "efficiency": 0.5, "productivity": 1.2 }
        ])
    }

    fn grouped() -> Value {
        json!({
            "top": [
                { "city": { "id": 10, "name": "Itajaí" },
                  "efficiencies": [ { "month": 2, "efficiency": 1.4 }, { "month": 1, "efficiency": 1.2 } ] }
            ],
            "down": [
                { "city": { "name": "Criciúma" },
                  "efficiencies": [ { "month": 1, "efficiency": 0.3 } ] }
            ]
        })
    }

    #[test]
    fn test_rank_threshold_assignment() {
        let dataset = parse_payload(flat_rows(), 1).unwrap();

        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.get("1", Period(1)).unwrap().group, Group::Top);
        assert_eq!(dataset.get("2", Period(1)).unwrap().group, Group::Unranked);
        assert_eq!(dataset.get("3", Period(1)).unwrap().group, Group::Unranked);
        assert_eq!(dataset.get("4", Period(2)).unwrap().group, Group::Bottom);
    }

    #[test]
    fn test_rank_threshold_larger_than_half() {
        let dataset = parse_payload(flat_rows(), 3).unwrap();

        // 4 entities, N = 3: three Top, one Bottom, never both
        assert_eq!(dataset.entities(Group::Top).len(), 3);
        assert_eq!(dataset.entities(Group::Bottom).len(), 1);
        assert!(dataset.entities(Group::Unranked).is_empty());
    }

    #[test]
    fn test_grouped_payload() {
        let dataset = parse_payload(grouped(), 5).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get("10", Period(2)).unwrap().value, 1.4);

        // Missing id falls back to the city name
        let bottom = dataset.get("Criciúma", Period(1)).unwrap();
        assert_eq!(bottom.group, Group::Bottom);
    }

    #[test]
    fn test_grouped_payload_round_trip_orders_periods() {
        let dataset = parse_payload(grouped(), 5).unwrap();
        let payload = GroupedPayload::from_dataset(&dataset);

        let months: Vec<u32> = payload.top[0].efficiencies.iter().map(|e| e.month).collect();
        assert_eq!(months, vec![1, 2]);
        assert_eq!(payload.down.len(), 1);
        assert!(payload.unranked.is_empty());
    }

    #[test]
    fn test_grouped_payload_with_bottom_key_only() {
        let payload = json!({
            "bottom": [
                { "city": { "name": "Lages" },
                  "efficiencies": [ { "month": 1, "efficiency": 0.3 } ] }
            ]
        });

        let dataset = parse_payload(payload, 1).unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.get("Lages", Period(1)).unwrap().group, Group::Bottom);
    }

    #[test]
    fn test_unrecognized_payload() {
        assert!(parse_payload(json!({ "data": [] }), 3).is_err());
        assert!(parse_payload(json!(42), 3).is_err());
    }

    #[test]
    fn test_in_memory_provider_filters_periods() {
        let mut provider = InMemoryProvider::new();
        provider.insert(2023, parse_payload(flat_rows(), 1).unwrap());

        let query = RankedQuery::new(2023, 1).with_periods(Period(2), Period(3));
        let dataset = provider.ranked(&query).unwrap();

        assert_eq!(dataset.periods(), vec![Period(2)]);
        assert_eq!(provider.years(), vec![2023]);
        assert!(provider.ranked(&RankedQuery::new(2021, 1)).is_err());
    }

    #[test]
    fn test_in_memory_provider_rejects_malformed() {
        let mut provider = InMemoryProvider::new();
        provider.insert(
            2022,
            Dataset::new(vec![
                EfficiencyRecord::new(Entity::new("1", "Joinville"), 1, 1.1, Group::Top),
                EfficiencyRecord::new(Entity::new("1", "Joinville"), 1, 0.2, Group::Bottom),
            ]),
        );

        let err = provider.ranked(&RankedQuery::new(2022, 1)).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_file_provider_json_and_csv() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ranked_2021.json"), grouped().to_string()).unwrap();
        fs::write(
            dir.path().join("ranked_2022.csv"),
            "cityId,cityName,bimonthly,efficiency,cobertura\n\
             1,Joinville,1,1.25,80.1\n\
             2,Blumenau,1,0.95,70.0\n\
             3,Lages,1,0.45,55.3\n",
        )
        .unwrap();

        let provider = FileProvider::new(dir.path());
        assert_eq!(provider.name(), "file");

        let from_json = provider.ranked(&RankedQuery::new(2021, 1)).unwrap();
        assert_eq!(from_json.len(), 3);

        let from_csv = provider.ranked(&RankedQuery::new(2022, 1)).unwrap();
        assert_eq!(from_csv.get("1", Period(1)).unwrap().group, Group::Top);
        assert_eq!(from_csv.get("2", Period(1)).unwrap().group, Group::Unranked);
        assert_eq!(from_csv.get("3", Period(1)).unwrap().group, Group::Bottom);

        assert!(provider.ranked(&RankedQuery::new(2024, 1)).is_err());
    }

    #[test]
    fn test_load_json_reports_path_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_json(&path, 3).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
