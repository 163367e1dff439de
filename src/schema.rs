// 📐 Shape Layer - Dataset Validation
// Checks the invariants the conservation law depends on before any value moves

use crate::error::{DatasetIssue, IssueKind, RedistributionError, RedistributionResult};
use crate::records::{Dataset, EfficiencyRecord, Group, RecordKey};
use std::collections::{HashMap, HashSet};

// ============================================================================
// DATASET VALIDATOR
// ============================================================================

pub struct DatasetValidator {
    /// Reject NaN / infinite values (default: true)
    pub require_finite_values: bool,
}

impl DatasetValidator {
    pub fn new() -> Self {
        DatasetValidator {
            require_finite_values: true,
        }
    }

    /// Validate a dataset, collecting every issue found
    ///
    /// Returns `MalformedDataset` with all issues when any invariant is broken.
    /// An empty dataset is valid.
    pub fn validate(&self, dataset: &Dataset) -> RedistributionResult<()> {
        let issues = self.collect_issues(dataset);

        if issues.is_empty() {
            Ok(())
        } else {
            Err(RedistributionError::MalformedDataset { issues })
        }
    }

    /// All invariant violations, in record order
    pub fn collect_issues(&self, dataset: &Dataset) -> Vec<DatasetIssue> {
        let mut issues = Vec::new();

        let mut key_counts: HashMap<RecordKey, usize> = HashMap::new();
        let mut groups: HashMap<&str, Group> = HashMap::new();
        let mut names: HashMap<&str, &str> = HashMap::new();
        let mut group_conflicts: HashSet<&str> = HashSet::new();
        let mut name_conflicts: HashSet<&str> = HashSet::new();

        for record in dataset.iter() {
            let id = record.entity.id.as_str();

            if id.trim().is_empty() {
                issues.push(issue(
                    record,
                    IssueKind::MissingEntityId,
                    format!("entity '{}' has no id", record.entity.name),
                ));
            }

            if self.require_finite_values && !record.value.is_finite() {
                issues.push(issue(
                    record,
                    IssueKind::NonFiniteValue,
                    format!("efficiency value {} is not finite", record.value),
                ));
            }

            let count = key_counts.entry(record.key()).or_insert(0);
            *count += 1;
            if *count == 2 {
                issues.push(issue(
                    record,
                    IssueKind::DuplicateRecord,
                    "more than one record for this (entity, period)".to_string(),
                ));
            }

            match groups.get(id).copied() {
                Some(existing) if existing != record.group && group_conflicts.insert(id) => {
                    issues.push(issue(
                        record,
                        IssueKind::ConflictingGroup,
                        format!(
                            "entity assigned to '{}' and '{}'",
                            existing.as_str(),
                            record.group.as_str()
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    groups.insert(id, record.group);
                }
            }

            match names.get(id).copied() {
                Some(existing) if existing != record.entity.name && name_conflicts.insert(id) => {
                    issues.push(issue(
                        record,
                        IssueKind::ConflictingName,
                        format!("names '{}' and '{}' share one id", existing, record.entity.name),
                    ));
                }
                Some(_) => {}
                None => {
                    names.insert(id, record.entity.name.as_str());
                }
            }
        }

        issues
    }
}

impl Default for DatasetValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn issue(record: &EfficiencyRecord, kind: IssueKind, message: String) -> DatasetIssue {
    DatasetIssue {
        entity_id: record.entity.id.clone(),
        period: Some(record.period),
        kind,
        message,
    }
}

// ============================================================================
// TESTS
// ============================================================================
