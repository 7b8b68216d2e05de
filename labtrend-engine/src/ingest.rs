//! JSON ingestion of result snapshots handed over by the data-access layer.

use labtrend_core::{EngineError, LabResult, ResultSummary};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse results from a JSON string.
pub fn results_from_str(json: &str) -> Result<Vec<LabResult>, EngineError> {
    let value: Value =
        serde_json::from_str(json).map_err(|err| EngineError::Parse(err.to_string()))?;
    results_from_value(&value)
}

/// Parse results from either a bare array or an object with a `results` array.
pub fn results_from_value(value: &Value) -> Result<Vec<LabResult>, EngineError> {
    list_from_value(value, "results")
}

/// Parse server-aggregated summaries, bare or under a `summaries` key.
pub fn summaries_from_value(value: &Value) -> Result<Vec<ResultSummary>, EngineError> {
    list_from_value(value, "summaries")
}

fn list_from_value<T: DeserializeOwned>(value: &Value, field: &str) -> Result<Vec<T>, EngineError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(object) => object
            .get(field)
            .and_then(Value::as_array)
            .ok_or(EngineError::MissingData)?,
        _ => return Err(EngineError::MissingData),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<T>(item.clone())
                .map_err(|err| EngineError::Parse(format!("{field}[{index}]: {err}")))
        })
        .collect()
}
