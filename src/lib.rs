// Efficiency Redistribution - Core Library
// Caps over-performing municipalities at a ceiling and hands the surplus
// to the under-performing group, period by period.

pub mod records;
pub mod error;
pub mod schema;         // Dataset invariants
pub mod config;
pub mod redistribution; // Cap + transfer engine
pub mod provider;       // Ranked data sources and payload shapes
pub mod comparison;     // Real vs redistributed audit
pub mod logging;

// Re-export commonly used types
pub use records::{
    Entity, Period, Group, EfficiencyRecord, RecordKey, Dataset,
};
pub use error::{
    RedistributionError, RedistributionResult, DatasetIssue, IssueKind,
};
pub use schema::DatasetValidator;
pub use config::RedistributionConfig;
pub use redistribution::{
    RedistributionEngine, RedistributionOutcome, RedistributionReport, PeriodSummary,
    redistribute,
};
pub use provider::{
    RankedQuery, RankedEfficiencyProvider, InMemoryProvider, FileProvider,
    GroupedPayload, CityBlock, CityRef, PeriodEfficiency, RankedRow,
    assign_groups_by_rank, parse_payload, load_json, load_csv,
};
pub use comparison::{
    ComparisonEngine, ComparisonReport, ComparisonRow, ComparisonPayload,
    ConservationResult, PeriodAudit,
};
pub use logging::init_logging;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
