// 🚨 Error taxonomy for redistribution runs
//
// Validation failures abort the whole call. An empty dataset is not an error,
// and neither is surplus with no recipient (that is reported, not raised).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::Period;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RedistributionError {
    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: String,
        value: f64,
        reason: String,
    },

    #[error("Malformed dataset: {} issue(s), first: {}", .issues.len(), first_issue(.issues))]
    MalformedDataset { issues: Vec<DatasetIssue> },
}

impl RedistributionError {
    pub fn invalid_parameter(name: &str, value: f64, reason: &str) -> Self {
        RedistributionError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        }
    }

    /// Issues carried by a `MalformedDataset` error (empty for other variants)
    pub fn issues(&self) -> &[DatasetIssue] {
        match self {
            RedistributionError::MalformedDataset { issues } => issues,
            RedistributionError::InvalidParameter { .. } => &[],
        }
    }
}

fn first_issue(issues: &[DatasetIssue]) -> String {
    issues
        .first()
        .map(|issue| issue.to_string())
        .unwrap_or_else(|| "none".to_string())
}

pub type RedistributionResult<T> = Result<T, RedistributionError>;

// ============================================================================
// DATASET ISSUES
// ============================================================================

/// A single violation of the dataset invariants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetIssue {
    pub entity_id: String,
    pub period: Option<Period>,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// Two records share the same (entity, period) key
    DuplicateRecord,

    /// Entity assigned to more than one group within the run
    ConflictingGroup,

    /// Same entity id carries different display names
    ConflictingName,

    /// Entity id is empty
    MissingEntityId,

    /// NaN or infinite efficiency value
    NonFiniteValue,
}

impl std::fmt::Display for DatasetIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.period {
            Some(period) => write!(
                f,
                "[{:?}] entity '{}' period {}: {}",
                self.kind, self.entity_id, period, self.message
            ),
            None => write!(f, "[{:?}] entity '{}': {}", self.kind, self.entity_id, self.message),
        }
    }
}
