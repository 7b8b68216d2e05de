//! Result classification.
//!
//! Priority, highest first: suspect marker, in-range status, explicit flag,
//! numeric comparison against the reference bounds, and finally `high` when the
//! direction cannot be determined so an abnormal value is never hidden.

use labtrend_core::{Classification, ClassificationBasis, LabResult};
use serde::Serialize;

/// Classification plus the rule that produced it.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    pub basis: ClassificationBasis,
}

impl Verdict {
    fn new(classification: Classification, basis: ClassificationBasis) -> Self {
        Self {
            classification,
            basis,
        }
    }

    pub fn glyph(&self) -> &'static str {
        self.classification.glyph()
    }

    pub fn label(&self) -> &'static str {
        self.classification.label()
    }
}

/// Classify a single result. Pure; every input has a defined outcome.
pub fn classify(result: &LabResult) -> Verdict {
    let verdict = decide(result);
    tracing::trace!(
        result_id = result.id,
        classification = %verdict.classification,
        basis = ?verdict.basis,
        "Classified result"
    );
    verdict
}

/// Shorthand for callers that only need the tag.
pub fn classification_of(result: &LabResult) -> Classification {
    classify(result).classification
}

fn decide(result: &LabResult) -> Verdict {
    if result.is_suspect {
        return Verdict::new(Classification::Anomaly, ClassificationBasis::Suspect);
    }

    if !result.out_of_range() {
        return Verdict::new(Classification::Normal, ClassificationBasis::InRange);
    }

    if let Some(direction) = result.flag_direction() {
        return Verdict::new(direction.into(), ClassificationBasis::Flag);
    }

    if let Some(classification) = compare_with_bounds(result) {
        return Verdict::new(classification, ClassificationBasis::Bounds);
    }

    Verdict::new(Classification::High, ClassificationBasis::Fallback)
}

// Only the maximum is comparable: a value at or below it is reported low.
fn compare_with_bounds(result: &LabResult) -> Option<Classification> {
    let value = result.numeric()?;
    let max = result.normalized_reference_max.filter(|max| max.is_finite())?;
    Some(if value > max {
        Classification::High
    } else {
        Classification::Low
    })
}
