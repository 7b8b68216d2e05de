//! Client-side normalization for results that arrive without server-side
//! processing. Runs before classification; the reference range resolver still
//! only reads normalized bounds.

use std::sync::LazyLock;

use labtrend_core::{normalize_label, EngineConfig, FlagDirection, LabResult};
use regex::Regex;

const NUMBER: &str = r"(\d+(?:[.,]\d+)?)";

static VALUE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(-)?{NUMBER}")).unwrap());

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{NUMBER}\s*[-–—]\s*{NUMBER}")).unwrap());

static UPPER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:<=?|≤|\bдо\b|не\s+более|up\s+to)\s*{NUMBER}"
    ))
    .unwrap()
});

static LOWER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:>=?|≥|не\s+менее|at\s+least)\s*{NUMBER}")).unwrap()
});

const MG_PER_DL: [&str; 2] = ["mg/dl", "мг/дл"];

// Item name keywords, factor from mg/dL, target unit.
const MG_PER_DL_CONVERSIONS: &[(&[&str], f64, &str)] = &[
    (&["glucose", "глюкоза"], 0.0555, "mmol/l"),
    (&["cholesterol", "холестерин"], 0.02586, "mmol/l"),
    (&["creatinine", "креатинин"], 88.4, "μmol/l"),
];

const UNIT_ALIASES: &[(&str, &str)] = &[
    ("г/л", "g/l"),
    ("мг/л", "mg/l"),
    ("ммоль/л", "mmol/l"),
    ("мкмоль/л", "μmol/l"),
    ("мкг/л", "μg/l"),
    ("ед/л", "U/l"),
    ("мед/л", "mU/l"),
];

/// Item-specific conversion into the unit reference bounds are kept in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub factor: f64,
    pub target: &'static str,
}

impl UnitConversion {
    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor
    }
}

/// Conversion for an item named `name` reported in `unit`, if one is known.
pub fn unit_conversion(name: &str, unit: &str) -> Option<UnitConversion> {
    let unit = unit.trim().to_lowercase();
    if !MG_PER_DL.contains(&unit.as_str()) {
        return None;
    }
    let name = normalize_label(name);
    MG_PER_DL_CONVERSIONS
        .iter()
        .find(|(keywords, ..)| keywords.iter().any(|keyword| name.contains(keyword)))
        .map(|&(_, factor, target)| UnitConversion { factor, target })
}

/// Trimmed unit with Cyrillic abbreviations mapped to their Latin spelling.
pub fn canonical_unit(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    let canonical = UNIT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map_or(trimmed, |&(_, latin)| latin);
    Some(canonical.to_string())
}

fn parse_number(text: &str) -> Option<f64> {
    text.replace(',', ".").parse::<f64>().ok()
}

/// First number found in a raw value such as `"5,4"`, `"< 0.5"` or `"12 mmol"`.
pub fn extract_numeric(raw: &str) -> Option<f64> {
    let captures = VALUE_PATTERN.captures(raw)?;
    let magnitude = parse_number(captures.get(2)?.as_str())?;
    // A minus sign counts only when it leads the value.
    let negative = captures
        .get(1)
        .is_some_and(|sign| raw[..sign.start()].trim().is_empty());
    Some(if negative { -magnitude } else { magnitude })
}

/// Parse a textual reference range into optional `(min, max)` bounds.
pub fn parse_reference_text(raw: &str) -> (Option<f64>, Option<f64>) {
    if let Some(captures) = RANGE_PATTERN.captures(raw) {
        let min = captures.get(1).and_then(|m| parse_number(m.as_str()));
        let max = captures.get(2).and_then(|m| parse_number(m.as_str()));
        if min.is_some() && max.is_some() {
            return (min, max);
        }
    }

    if let Some(max) = UPPER_PATTERN
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
    {
        return (None, Some(max));
    }

    if let Some(min) = LOWER_PATTERN
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
    {
        return (Some(min), None);
    }

    (None, None)
}

/// Flag derived from a value and its bounds; `None` means within range.
pub fn derive_flag(value: f64, min: Option<f64>, max: Option<f64>) -> Option<FlagDirection> {
    if min.is_some_and(|min| value < min) {
        Some(FlagDirection::Low)
    } else if max.is_some_and(|max| value > max) {
        Some(FlagDirection::High)
    } else {
        None
    }
}

/// Whether a value deviates from its bounds by more than `factor` times,
/// which usually points to an extraction or unit error.
pub fn is_suspect_value(value: f64, min: Option<f64>, max: Option<f64>, factor: f64) -> bool {
    if let Some(min) = min.filter(|min| *min > 0.0) {
        if value < min && value / min < 1.0 / factor {
            return true;
        }
    }
    if let Some(max) = max.filter(|max| *max > 0.0) {
        if value > max && value / max > factor {
            return true;
        }
    }
    false
}

/// Fill the derived fields a server would normally supply. Present fields are
/// left untouched; `is_suspect` can only be raised.
///
/// A value read from raw text in mg/dL is converted for the items that have a
/// known conversion, together with bounds read from the raw range text.
pub fn normalize_result(result: &LabResult, config: &EngineConfig) -> LabResult {
    let mut normalized = result.clone();

    let extracted = normalized.numeric_value.is_none();
    if extracted {
        normalized.numeric_value = extract_numeric(&normalized.raw_value);
    }
    if normalized.numeric_value.is_some() {
        normalized.is_numeric = true;
    }

    let raw_unit = result.raw_unit.as_deref().unwrap_or_default();
    let mut conversion = None;
    if normalized.normalized_unit.is_none() {
        if extracted && normalized.numeric_value.is_some() {
            conversion = unit_conversion(result.display_name(), raw_unit);
        }
        normalized.normalized_unit = match conversion {
            Some(conversion) => Some(conversion.target.to_string()),
            None => canonical_unit(raw_unit),
        };
    }
    let convert = |value: f64| conversion.map_or(value, |conversion| conversion.apply(value));

    if let Some(conversion) = conversion {
        normalized.numeric_value = normalized.numeric_value.map(convert);
        tracing::debug!(
            result_id = result.id,
            factor = conversion.factor,
            unit = conversion.target,
            "Converted result unit"
        );
    }

    if let Some(raw) = normalized.raw_reference_range.as_deref() {
        let (min, max) = parse_reference_text(raw);
        if normalized.normalized_reference_min.is_none() {
            normalized.normalized_reference_min = min.map(convert);
        }
        if normalized.normalized_reference_max.is_none() {
            normalized.normalized_reference_max = max.map(convert);
        }
    }

    let min = normalized.normalized_reference_min;
    let max = normalized.normalized_reference_max;
    if let Some(value) = normalized.numeric() {
        if min.is_some() || max.is_some() {
            let direction = derive_flag(value, min, max);
            if normalized.flag.is_none() {
                normalized.flag = Some(direction.map_or("N", FlagDirection::letter).to_string());
            }
            if normalized.is_out_of_range.is_none() {
                normalized.is_out_of_range = Some(direction.is_some());
            }
            if !normalized.is_suspect {
                normalized.is_suspect = is_suspect_value(value, min, max, config.suspect_factor);
            }
        }
    }

    normalized
}

/// Normalize a whole snapshot.
pub fn normalize_all(results: &[LabResult], config: &EngineConfig) -> Vec<LabResult> {
    let normalized: Vec<LabResult> = results
        .iter()
        .map(|result| normalize_result(result, config))
        .collect();
    tracing::debug!(count = normalized.len(), "Normalized results");
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::result;

    #[test]
    fn extracts_numbers_from_raw_values() {
        assert_eq!(extract_numeric("5,4"), Some(5.4));
        assert_eq!(extract_numeric("< 0.5"), Some(0.5));
        assert_eq!(extract_numeric("12 mmol/l"), Some(12.0));
        assert_eq!(extract_numeric("-3.2"), Some(-3.2));
        assert_eq!(extract_numeric("negative"), None);
        assert_eq!(extract_numeric(""), None);
    }

    #[test]
    fn parses_reference_ranges() {
        assert_eq!(parse_reference_text("3.9-6.1"), (Some(3.9), Some(6.1)));
        assert_eq!(parse_reference_text("4 – 10"), (Some(4.0), Some(10.0)));
        assert_eq!(parse_reference_text("135,0—145,0"), (Some(135.0), Some(145.0)));
        assert_eq!(parse_reference_text("< 5.2"), (None, Some(5.2)));
        assert_eq!(parse_reference_text("до 40"), (None, Some(40.0)));
        assert_eq!(parse_reference_text("Не более 1,5"), (None, Some(1.5)));
        assert_eq!(parse_reference_text("up to 3"), (None, Some(3.0)));
        assert_eq!(parse_reference_text("> 2.5"), (Some(2.5), None));
        assert_eq!(parse_reference_text("negative"), (None, None));
    }

    #[test]
    fn flags_follow_bounds() {
        assert_eq!(derive_flag(3.0, Some(4.0), Some(10.0)), Some(FlagDirection::Low));
        assert_eq!(derive_flag(11.0, Some(4.0), Some(10.0)), Some(FlagDirection::High));
        assert_eq!(derive_flag(10.0, Some(4.0), Some(10.0)), None);
        assert_eq!(derive_flag(100.0, None, None), None);
    }

    #[test]
    fn suspect_needs_tenfold_deviation() {
        assert!(is_suspect_value(101.0, Some(4.0), Some(10.0), 10.0));
        assert!(!is_suspect_value(100.0, Some(4.0), Some(10.0), 10.0));
        assert!(is_suspect_value(0.3, Some(4.0), Some(10.0), 10.0));
        assert!(!is_suspect_value(0.5, Some(4.0), Some(10.0), 10.0));
        assert!(!is_suspect_value(-5.0, Some(0.0), None, 10.0));
    }

    #[test]
    fn normalizes_raw_result() {
        let mut raw = result(1, 0);
        raw.raw_value = "15,5".to_string();
        raw.raw_unit = Some(" mmol/l ".to_string());
        raw.raw_reference_range = Some("4-10".to_string());

        let normalized = normalize_result(&raw, &EngineConfig::default());
        assert!(normalized.is_numeric);
        assert_eq!(normalized.numeric_value, Some(15.5));
        assert_eq!(normalized.normalized_reference_min, Some(4.0));
        assert_eq!(normalized.normalized_reference_max, Some(10.0));
        assert_eq!(normalized.normalized_unit.as_deref(), Some("mmol/l"));
        assert_eq!(normalized.flag.as_deref(), Some("H"));
        assert_eq!(normalized.is_out_of_range, Some(true));
        assert!(!normalized.is_suspect);
    }

    #[test]
    fn supplied_fields_are_kept() {
        let mut raw = result(1, 0);
        raw.raw_value = "150".to_string();
        raw.numeric_value = Some(8.0);
        raw.raw_reference_range = Some("4-10".to_string());
        raw.normalized_reference_max = Some(12.0);
        raw.flag = Some("↑".to_string());
        raw.is_out_of_range = Some(true);

        let normalized = normalize_result(&raw, &EngineConfig::default());
        assert_eq!(normalized.numeric_value, Some(8.0));
        assert_eq!(normalized.normalized_reference_max, Some(12.0));
        assert_eq!(normalized.normalized_reference_min, Some(4.0));
        assert_eq!(normalized.flag.as_deref(), Some("↑"));
        assert_eq!(normalized.is_out_of_range, Some(true));
    }

    #[test]
    fn text_values_stay_non_numeric() {
        let mut raw = result(1, 0);
        raw.raw_value = "not detected".to_string();
        raw.raw_reference_range = Some("not detected".to_string());
        let normalized = normalize_result(&raw, &EngineConfig::default());
        assert!(!normalized.is_numeric);
        assert_eq!(normalized.flag, None);
        assert_eq!(normalized.is_out_of_range, None);
    }

    fn close(actual: Option<f64>, expected: f64) -> bool {
        actual.is_some_and(|value| (value - expected).abs() < 1e-9)
    }

    #[test]
    fn conversions_are_looked_up_by_item_and_unit() {
        let glucose = unit_conversion("Glucose, serum", "mg/dL").expect("glucose");
        assert_eq!(glucose.target, "mmol/l");
        assert!(close(Some(glucose.apply(100.0)), 5.55));
        let creatinine = unit_conversion("Креатинин", " MG/DL ").expect("creatinine");
        assert_eq!(creatinine.target, "μmol/l");
        assert_eq!(unit_conversion("Glucose", "mmol/l"), None);
        assert_eq!(unit_conversion("Sodium", "mg/dl"), None);
    }

    #[test]
    fn cyrillic_units_get_latin_spelling() {
        assert_eq!(canonical_unit(" ммоль/л ").as_deref(), Some("mmol/l"));
        assert_eq!(canonical_unit("МКМОЛЬ/Л").as_deref(), Some("μmol/l"));
        assert_eq!(canonical_unit("10^9/l").as_deref(), Some("10^9/l"));
        assert_eq!(canonical_unit("  "), None);
    }

    #[test]
    fn glucose_in_mg_per_dl_is_converted_with_its_bounds() {
        let mut raw = result(1, 0);
        raw.raw_value = "126".to_string();
        raw.raw_unit = Some("mg/dL".to_string());
        raw.raw_reference_range = Some("70-110".to_string());

        let normalized = normalize_result(&raw, &EngineConfig::default());
        assert_eq!(normalized.normalized_unit.as_deref(), Some("mmol/l"));
        assert!(close(normalized.numeric_value, 126.0 * 0.0555));
        assert!(close(normalized.normalized_reference_min, 70.0 * 0.0555));
        assert!(close(normalized.normalized_reference_max, 110.0 * 0.0555));
        assert_eq!(normalized.flag.as_deref(), Some("H"));
        assert_eq!(normalized.is_out_of_range, Some(true));
        assert!(!normalized.is_suspect);
    }

    #[test]
    fn converted_value_is_checked_against_supplied_bounds() {
        let mut raw = result(1, 0);
        raw.raw_value = "90".to_string();
        raw.raw_unit = Some("mg/dl".to_string());
        raw.normalized_reference_min = Some(3.9);
        raw.normalized_reference_max = Some(6.1);

        let normalized = normalize_result(&raw, &EngineConfig::default());
        assert!(close(normalized.numeric_value, 90.0 * 0.0555));
        assert_eq!(normalized.normalized_reference_max, Some(6.1));
        assert_eq!(normalized.flag.as_deref(), Some("N"));
        assert_eq!(normalized.is_out_of_range, Some(false));
    }

    #[test]
    fn supplied_numbers_are_not_converted() {
        let mut raw = result(1, 0);
        raw.raw_value = "90".to_string();
        raw.numeric_value = Some(5.0);
        raw.raw_unit = Some("mg/dl".to_string());

        let normalized = normalize_result(&raw, &EngineConfig::default());
        assert_eq!(normalized.numeric_value, Some(5.0));
        assert_eq!(normalized.normalized_unit.as_deref(), Some("mg/dl"));
    }
}
