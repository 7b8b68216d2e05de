//! Reduction of a result stream into one summary row per measured item.

use std::cmp::Reverse;
use std::collections::{hash_map::Entry, HashMap};

use labtrend_core::{ItemKey, LabResult, ResultSummary, SummaryCounts};
use serde::Serialize;

use crate::classify::classification_of;

/// Per-item summaries plus counts over those rows.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SummaryReport {
    pub summaries: Vec<ResultSummary>,
    pub counts: SummaryCounts,
}

/// Reduce results to one summary per item key, each built from the latest
/// result of its group.
pub fn summarize<'a, I>(results: I) -> SummaryReport
where
    I: IntoIterator<Item = &'a LabResult>,
{
    let summaries: Vec<ResultSummary> = latest_per_item(results)
        .into_iter()
        .map(summarize_result)
        .collect();
    let counts = count_summaries(&summaries);

    tracing::debug!(
        items = summaries.len(),
        normal = counts.normal,
        out_of_range = counts.out_of_range,
        suspect = counts.suspect,
        "Reduced results into item summaries"
    );

    SummaryReport { summaries, counts }
}

/// Latest result per item key, newest first.
///
/// Latest means the greatest `created_at`; equal timestamps go to the highest
/// id. Rows with equal dates are ordered by key so the output is deterministic.
pub fn latest_per_item<'a, I>(results: I) -> Vec<&'a LabResult>
where
    I: IntoIterator<Item = &'a LabResult>,
{
    let mut latest: HashMap<ItemKey, &'a LabResult> = HashMap::new();
    for result in results {
        match latest.entry(result.item_key()) {
            Entry::Occupied(mut entry) => {
                if supersedes(result, entry.get()) {
                    entry.insert(result);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(result);
            }
        }
    }

    let mut winners: Vec<(ItemKey, &LabResult)> = latest.into_iter().collect();
    winners.sort_by(|(a_key, a), (b_key, b)| {
        (Reverse(a.created_at), a_key).cmp(&(Reverse(b.created_at), b_key))
    });
    winners.into_iter().map(|(_, result)| result).collect()
}

fn supersedes(candidate: &LabResult, current: &LabResult) -> bool {
    (candidate.created_at, candidate.id) > (current.created_at, current.id)
}

/// Build the summary row for one result.
pub fn summarize_result(result: &LabResult) -> ResultSummary {
    let classification = classification_of(result);
    ResultSummary {
        key: result.item_key(),
        analyte_id: result.analyte_id,
        name: result.display_name().to_string(),
        source_label: result.source_label.clone(),
        result_id: result.id,
        last_value: result.value_display(),
        unit: result.unit().unwrap_or_default().to_string(),
        reference: result.reference_display(),
        flag: result
            .flag
            .as_deref()
            .map(str::trim)
            .filter(|flag| !flag.is_empty())
            .map(str::to_string),
        classification,
        date: result.created_at,
        lab_name: result.lab_name.clone(),
        is_out_of_range: result.out_of_range() || result.is_suspect,
        is_suspect: result.is_suspect,
    }
}

/// Collapse summaries, e.g. pre-aggregated by the server, to one row per key.
///
/// The latest `date` wins; on equal dates the highest `result_id` wins, the
/// same rule [`latest_per_item`] applies to raw results. Output uses the same
/// ordering as [`latest_per_item`].
pub fn reduce_summaries(summaries: Vec<ResultSummary>) -> Vec<ResultSummary> {
    let mut latest: HashMap<ItemKey, ResultSummary> = HashMap::new();
    for summary in summaries {
        match latest.entry(summary.key.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if (summary.date, summary.result_id) > (current.date, current.result_id) {
                    entry.insert(summary);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(summary);
            }
        }
    }

    let mut reduced: Vec<ResultSummary> = latest.into_values().collect();
    reduced.sort_by(|a, b| (Reverse(a.date), &a.key).cmp(&(Reverse(b.date), &b.key)));
    reduced
}

/// Counts over summary rows: one per measured item.
pub fn count_summaries(summaries: &[ResultSummary]) -> SummaryCounts {
    let mut counts = SummaryCounts::default();
    for summary in summaries {
        counts.record(summary.classification);
    }
    counts
}

/// Counts over raw results, each classified independently.
pub fn count_results<'a, I>(results: I) -> SummaryCounts
where
    I: IntoIterator<Item = &'a LabResult>,
{
    let mut counts = SummaryCounts::default();
    for result in results {
        counts.record(classification_of(result));
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{labelled, numeric};
    use labtrend_core::Classification;

    #[test]
    fn empty_input_gives_empty_report() {
        let report = summarize(&Vec::<LabResult>::new());
        assert!(report.summaries.is_empty());
        assert_eq!(report.counts, SummaryCounts::default());
    }

    #[test]
    fn latest_result_per_item_wins() {
        let results = vec![
            labelled(1, 5, "Glucose", 5.0),
            labelled(2, 9, "glucose ", 6.0),
            labelled(3, 7, "Glucose", 7.0),
            labelled(4, 1, "Sodium", 140.0),
        ];
        let report = summarize(&results);
        assert_eq!(report.summaries.len(), 2);
        assert_eq!(report.summaries[0].result_id, 2);
        assert_eq!(report.summaries[0].last_value, "6");
        assert_eq!(report.summaries[1].result_id, 4);
        assert_eq!(report.counts.total, 2);
    }

    #[test]
    fn equal_timestamps_pick_highest_id() {
        let results = vec![
            labelled(8, 3, "Glucose", 5.0),
            labelled(11, 3, "Glucose", 6.0),
            labelled(9, 3, "Glucose", 7.0),
        ];
        let winners = latest_per_item(&results);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, 11);
    }

    #[test]
    fn analyte_id_groups_across_labels() {
        let mut a = labelled(1, 1, "Glu", 5.0);
        a.analyte_id = Some(3);
        let mut b = labelled(2, 2, "Glucose, serum", 6.0);
        b.analyte_id = Some(3);
        b.analyte_name = Some("Glucose".to_string());
        let report = summarize(&[a, b]);
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.summaries[0].name, "Glucose");
        assert_eq!(report.summaries[0].key, ItemKey::Analyte(3));
    }

    #[test]
    fn summary_carries_display_fields() {
        let mut r = numeric(5, 2, 15.0, 4.0, 10.0);
        r.is_out_of_range = Some(true);
        r.flag = Some(" H ".to_string());
        r.normalized_unit = Some("mmol/L".to_string());
        r.lab_name = Some("Invitro".to_string());
        let summary = summarize_result(&r);
        assert_eq!(summary.classification, Classification::High);
        assert_eq!(summary.flag.as_deref(), Some("H"));
        assert_eq!(summary.classification.glyph(), "↑");
        assert_eq!(summary.reference, "4-10");
        assert_eq!(summary.unit, "mmol/L");
        assert_eq!(summary.lab_name.as_deref(), Some("Invitro"));
        assert!(summary.is_out_of_range);
    }

    #[test]
    fn counts_split_into_exclusive_buckets() {
        let mut normal = numeric(1, 0, 5.0, 4.0, 10.0);
        normal.source_label = "A".to_string();
        let mut high = numeric(2, 0, 15.0, 4.0, 10.0);
        high.source_label = "B".to_string();
        high.is_out_of_range = Some(true);
        let mut suspect = numeric(3, 0, 150.0, 4.0, 10.0);
        suspect.source_label = "C".to_string();
        suspect.is_suspect = true;

        let results = [normal, high, suspect];
        let counts = summarize(&results).counts;
        assert_eq!(counts.total, 3);
        assert_eq!(counts.normal, 1);
        assert_eq!(counts.out_of_range, 2);
        assert_eq!(counts.suspect, 1);
        assert_eq!(count_results(&results), counts);
    }

    #[test]
    fn reducing_latest_results_again_is_stable() {
        let results = vec![
            labelled(1, 5, "Glucose", 5.0),
            labelled(2, 9, "Glucose", 6.0),
            labelled(3, 9, "Sodium", 140.0),
            labelled(4, 2, "Potassium", 4.1),
        ];
        let once = summarize(&results);
        let latest: Vec<LabResult> = latest_per_item(&results).into_iter().cloned().collect();
        let twice = summarize(&latest);
        assert_eq!(once, twice);
    }

    #[test]
    fn reduce_summaries_is_idempotent() {
        let results = vec![
            labelled(1, 5, "Glucose", 5.0),
            labelled(2, 9, "Sodium", 140.0),
        ];
        let mut rows: Vec<ResultSummary> = results.iter().map(summarize_result).collect();
        let mut stale = rows[0].clone();
        stale.result_id = 99;
        stale.date = stale.date - chrono::Duration::hours(1);
        rows.push(stale);

        let reduced = reduce_summaries(rows);
        assert_eq!(reduced.len(), 2);
        assert!(reduced.iter().all(|row| row.result_id != 99));
        assert_eq!(reduce_summaries(reduced.clone()), reduced);
    }

    #[test]
    fn server_and_client_reduction_agree_on_ties() {
        let results = vec![
            labelled(11, 3, "Glucose", 6.0),
            labelled(9, 3, "Glucose", 7.0),
        ];
        let client = summarize(&results);
        let server = reduce_summaries(results.iter().map(summarize_result).collect());
        assert_eq!(client.summaries[0].result_id, 11);
        assert_eq!(server[0].result_id, 11);
        assert_eq!(server, client.summaries);
    }

    #[test]
    fn summary_without_source_flag_has_none() {
        let summary = summarize_result(&labelled(1, 0, "Sodium", 140.0));
        assert_eq!(summary.flag, None);
        assert_eq!(summary.classification, Classification::Normal);
    }
}
