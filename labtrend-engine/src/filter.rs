//! Conjunctive filtering over results and summaries.

use chrono::{DateTime, Utc};
use labtrend_core::{Classification, LabResult, ResultFilter, ResultSummary};

use crate::classify::classification_of;

/// Anything the filter can be applied to.
pub trait Filterable {
    fn display_name(&self) -> &str;
    fn source_label(&self) -> &str;
    fn lab_name(&self) -> Option<&str>;
    fn recorded_at(&self) -> DateTime<Utc>;
    fn classification(&self) -> Classification;
}

impl Filterable for LabResult {
    fn display_name(&self) -> &str {
        LabResult::display_name(self)
    }

    fn source_label(&self) -> &str {
        &self.source_label
    }

    fn lab_name(&self) -> Option<&str> {
        self.lab_name.as_deref()
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn classification(&self) -> Classification {
        classification_of(self)
    }
}

impl Filterable for ResultSummary {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn source_label(&self) -> &str {
        &self.source_label
    }

    fn lab_name(&self) -> Option<&str> {
        self.lab_name.as_deref()
    }

    fn recorded_at(&self) -> DateTime<Utc> {
        self.date
    }

    fn classification(&self) -> Classification {
        self.classification
    }
}

/// True when the item satisfies every non-empty field of the filter.
pub fn matches<T: Filterable + ?Sized>(filter: &ResultFilter, item: &T) -> bool {
    if let Some(term) = filter.search_term() {
        let needle = term.to_lowercase();
        let found = [item.display_name(), item.source_label()]
            .iter()
            .any(|haystack| haystack.to_lowercase().contains(&needle));
        if !found {
            return false;
        }
    }

    let day = item.recorded_at().date_naive();
    if filter.date_from.is_some_and(|from| day < from) {
        return false;
    }
    if filter.date_to.is_some_and(|to| day > to) {
        return false;
    }

    if let Some(lab) = filter.lab_term() {
        let needle = lab.to_lowercase();
        let found = item
            .lab_name()
            .is_some_and(|name| name.to_lowercase().contains(&needle));
        if !found {
            return false;
        }
    }

    if filter.abnormal_only && !item.classification().is_abnormal() {
        return false;
    }

    true
}

/// Borrowing filter: the output is a subsequence of the input, by identity.
pub fn apply<'a, T: Filterable>(filter: &ResultFilter, items: &'a [T]) -> Vec<&'a T> {
    items.iter().filter(|item| matches(filter, *item)).collect()
}

/// Owning filter for callers that no longer need the dropped items.
pub fn retain<T: Filterable>(filter: &ResultFilter, mut items: Vec<T>) -> Vec<T> {
    if !filter.is_empty() {
        items.retain(|item| matches(filter, item));
    }
    items
}
