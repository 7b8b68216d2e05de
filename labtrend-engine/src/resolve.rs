//! Reference range resolution.

use labtrend_core::{LabResult, ReferenceRange};

/// Resolve the numeric reference interval of a result.
///
/// Only the normalized bounds are considered; the raw reference text stays a
/// display string. Absence is a normal outcome, not an error.
pub fn resolve_reference_range(result: &LabResult) -> Option<ReferenceRange> {
    let min = result.normalized_reference_min.filter(|v| v.is_finite())?;
    let max = result.normalized_reference_max.filter(|v| v.is_finite())?;

    if min > max {
        tracing::warn!(
            result_id = result.id,
            min,
            max,
            "Reference bounds are inverted"
        );
    }

    Some(ReferenceRange { min, max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::result;

    #[test]
    fn both_bounds_resolve() {
        let mut r = result(1, 1);
        r.normalized_reference_min = Some(3.9);
        r.normalized_reference_max = Some(6.1);
        assert_eq!(
            resolve_reference_range(&r),
            Some(ReferenceRange { min: 3.9, max: 6.1 })
        );
    }

    #[test]
    fn single_bound_is_absent() {
        let mut r = result(1, 1);
        r.normalized_reference_max = Some(6.1);
        assert_eq!(resolve_reference_range(&r), None);
    }

    #[test]
    fn raw_text_is_never_parsed() {
        let mut r = result(1, 1);
        r.raw_reference_range = Some("3.9-6.1".to_string());
        assert_eq!(resolve_reference_range(&r), None);
    }

    #[test]
    fn non_finite_bound_is_absent() {
        let mut r = result(1, 1);
        r.normalized_reference_min = Some(f64::NAN);
        r.normalized_reference_max = Some(6.1);
        assert_eq!(resolve_reference_range(&r), None);
    }
}
