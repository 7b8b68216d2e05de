//! Chart-ready history of a measured item.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use labtrend_core::{
    EngineConfig, ItemKey, LabResult, OverlayPolicy, ReferenceRange, Trend, TrendDelta,
    TrendPoint, TrendSeries,
};

use crate::classify::classify;
use crate::resolve::resolve_reference_range;

/// Build the trend of one item's history, oldest point first.
///
/// Results without a finite numeric value are left out of the chart but still
/// count towards the out-of-range and suspect totals.
pub fn build_trend<'a, I>(history: I, config: &EngineConfig) -> Trend
where
    I: IntoIterator<Item = &'a LabResult>,
{
    let mut charted: Vec<&LabResult> = Vec::new();
    let mut out_of_range_count = 0;
    let mut suspect_count = 0;

    for result in history {
        if result.out_of_range() {
            out_of_range_count += 1;
        }
        if result.is_suspect {
            suspect_count += 1;
        }
        if result.numeric().is_some() {
            charted.push(result);
        } else if result.numeric_value.is_some() {
            tracing::warn!(result_id = result.id, "Dropping non-finite value from trend");
        }
    }

    // Stable: equal timestamps keep their input order.
    charted.sort_by_key(|result| result.created_at);

    let mut points: Vec<TrendPoint> = Vec::with_capacity(charted.len());
    for result in charted {
        let Some(value) = result.numeric() else {
            continue;
        };
        let delta = points.last().map(|previous| delta_between(previous.value, value));
        points.push(TrendPoint {
            result_id: result.id,
            recorded_at: result.created_at,
            value,
            formatted_date: format_date(&result.created_at, &config.date_format),
            classification: classify(result).classification,
            is_out_of_range: result.out_of_range(),
            is_suspect: result.is_suspect,
            unit: result.unit().unwrap_or_default().to_string(),
            reference: resolve_reference_range(result),
            delta,
        });
    }

    let overlay = select_overlay(&points, config.overlay_policy);

    tracing::debug!(
        points = points.len(),
        has_overlay = overlay.is_some(),
        "Built trend"
    );

    Trend {
        points,
        overlay,
        out_of_range_count,
        suspect_count,
    }
}

/// Group results by item key and build one series per item, most recently
/// updated item first.
pub fn build_trends<'a, I>(results: I, config: &EngineConfig) -> Vec<TrendSeries>
where
    I: IntoIterator<Item = &'a LabResult>,
{
    let mut groups: HashMap<ItemKey, Vec<&LabResult>> = HashMap::new();
    for result in results {
        groups.entry(result.item_key()).or_default().push(result);
    }

    let mut series: Vec<(DateTime<Utc>, TrendSeries)> = groups
        .into_iter()
        .filter_map(|(key, history)| {
            let newest = history
                .iter()
                .copied()
                .max_by_key(|result| (result.created_at, result.id))?;
            let trend = build_trend(history.iter().copied(), config);
            let unit = trend
                .points
                .iter()
                .map(|point| point.unit.as_str())
                .find(|unit| !unit.is_empty())
                .map(str::to_string);
            Some((
                newest.created_at,
                TrendSeries {
                    key,
                    name: newest.display_name().to_string(),
                    unit,
                    trend,
                },
            ))
        })
        .collect();

    series.sort_by(|(a_at, a), (b_at, b)| (Reverse(a_at), &a.key).cmp(&(Reverse(b_at), &b.key)));
    series.into_iter().map(|(_, series)| series).collect()
}

/// History of a single item, picked out of a mixed result stream.
pub fn history_for<'a, I>(results: I, key: &ItemKey) -> Vec<&'a LabResult>
where
    I: IntoIterator<Item = &'a LabResult>,
{
    results
        .into_iter()
        .filter(|result| &result.item_key() == key)
        .collect()
}

fn select_overlay(points: &[TrendPoint], policy: OverlayPolicy) -> Option<ReferenceRange> {
    match policy {
        OverlayPolicy::Earliest => points.iter().find_map(|point| point.reference),
        OverlayPolicy::Latest => points.iter().rev().find_map(|point| point.reference),
    }
}

fn delta_between(previous: f64, current: f64) -> TrendDelta {
    let absolute = current - previous;
    let percent = if previous != 0.0 {
        Some(absolute / previous * 100.0)
    } else {
        None
    };
    TrendDelta { absolute, percent }
}

fn format_date(at: &DateTime<Utc>, pattern: &str) -> String {
    let mut formatted = String::new();
    if write!(formatted, "{}", at.format(pattern)).is_err() {
        return at.date_naive().to_string();
    }
    formatted
}
