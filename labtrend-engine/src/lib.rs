//! Lab result classification, per-item summaries and trend building.
//!
//! Every function here is a pure derivation: callers feed a complete result
//! snapshot and get fresh output back. Nothing is cached between calls, so a
//! newer snapshot can replace an older one at any time.

pub mod classify;
pub mod filter;
pub mod ingest;
pub mod normalize;
pub mod resolve;
pub mod summary;
pub mod trend;

use labtrend_core::{EngineError, LabResult, ResultFilter, ResultSummary, ResultsSnapshot};
use serde_json::Value;

pub use classify::{classification_of, classify, Verdict};
pub use filter::Filterable;
pub use ingest::{results_from_str, results_from_value, summaries_from_value};
pub use normalize::{normalize_all, normalize_result};
pub use resolve::resolve_reference_range;
pub use summary::{reduce_summaries, summarize, SummaryReport};
pub use trend::{build_trend, build_trends, history_for};

/// Derive the listing snapshot from raw results.
///
/// Date range and lab name narrow the raw results before reduction, so each
/// item shows its latest result inside that scope. Search and the
/// abnormal-only toggle then narrow the per-item rows. Counts describe the
/// rows that remain.
pub fn derive_snapshot(results: &[LabResult], filter: &ResultFilter) -> ResultsSnapshot {
    let scoped = filter::apply(&filter.scope(), results);
    let report = summary::summarize(scoped);
    let summaries = filter::retain(&filter.refinement(), report.summaries);
    let counts = summary::count_summaries(&summaries);

    tracing::debug!(
        input = results.len(),
        rows = summaries.len(),
        "Derived results snapshot"
    );

    ResultsSnapshot {
        as_of: results.iter().map(|result| result.created_at).max(),
        summaries,
        counts,
    }
}

/// Same as [`derive_snapshot`] for summaries the server already aggregated.
pub fn snapshot_from_summaries(
    summaries: Vec<ResultSummary>,
    filter: &ResultFilter,
) -> ResultsSnapshot {
    let as_of = summaries.iter().map(|summary| summary.date).max();
    let reduced = summary::reduce_summaries(summaries);
    let summaries = filter::retain(filter, reduced);
    let counts = summary::count_summaries(&summaries);
    ResultsSnapshot {
        as_of,
        summaries,
        counts,
    }
}

/// Derive the snapshot from a JSON string.
pub fn derive_snapshot_str(
    results_json: &str,
    filter: &ResultFilter,
) -> Result<ResultsSnapshot, EngineError> {
    let results = ingest::results_from_str(results_json)?;
    Ok(derive_snapshot(&results, filter))
}

/// Derive the snapshot from a `serde_json::Value`.
pub fn derive_snapshot_value(
    results: &Value,
    filter: &ResultFilter,
) -> Result<ResultsSnapshot, EngineError> {
    let results = ingest::results_from_value(results)?;
    Ok(derive_snapshot(&results, filter))
}
