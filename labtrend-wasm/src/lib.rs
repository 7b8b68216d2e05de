//! Cầu nối WASM <-> JavaScript cho engine phân loại kết quả xét nghiệm.
//!
//! Phía JavaScript tự lập lịch lấy dữ liệu (ví dụ mỗi 30 giây) và gọi lại các
//! hàm này với snapshot mới; engine không giữ trạng thái giữa các lần gọi.

use labtrend_core::{EngineConfig, EngineError, OverlayPolicy, ResultFilter};
use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

#[derive(Deserialize)]
struct JsEngineConfig {
    #[serde(default)]
    suspect_factor: Option<f64>,
    #[serde(default)]
    overlay_policy: Option<OverlayPolicy>,
    #[serde(default)]
    date_format: Option<String>,
    #[serde(default)]
    poll_interval_secs: Option<u32>,
}

impl From<JsEngineConfig> for EngineConfig {
    fn from(cfg: JsEngineConfig) -> Self {
        let mut base = EngineConfig::default();
        if let Some(factor) = cfg.suspect_factor {
            base.suspect_factor = factor;
        }
        if let Some(policy) = cfg.overlay_policy {
            base.overlay_policy = policy;
        }
        if let Some(format) = cfg.date_format {
            base.date_format = format;
        }
        if let Some(secs) = cfg.poll_interval_secs {
            base.poll_interval_secs = secs;
        }
        base
    }
}

/// Tạo bảng tóm tắt (mỗi chỉ số một dòng) và bộ đếm từ danh sách kết quả.
#[wasm_bindgen]
pub fn derive_snapshot(results: JsValue, filter: Option<JsValue>) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let results = read_json(results, "danh sách kết quả")?;
    let filter = read_filter(filter)?;

    let snapshot = labtrend_engine::derive_snapshot_value(&results, &filter)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;

    write_js(&snapshot, "snapshot")
}

/// Như `derive_snapshot` nhưng cho bảng tóm tắt đã tổng hợp sẵn từ server.
#[wasm_bindgen]
pub fn derive_snapshot_from_summaries(
    summaries: JsValue,
    filter: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let summaries = read_json(summaries, "bảng tóm tắt")?;
    let filter = read_filter(filter)?;

    let summaries = labtrend_engine::summaries_from_value(&summaries)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;
    let snapshot = labtrend_engine::snapshot_from_summaries(summaries, &filter);

    write_js(&snapshot, "snapshot")
}

/// Dựng biểu đồ xu hướng cho lịch sử của một chỉ số.
#[wasm_bindgen]
pub fn build_trend(history: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let history = read_json(history, "lịch sử kết quả")?;
    let cfg = read_config(config)?;

    let history = labtrend_engine::results_from_value(&history)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;
    let trend = labtrend_engine::build_trend(&history, &cfg);

    write_js(&trend, "trend")
}

/// Dựng xu hướng cho mọi chỉ số có trong danh sách.
#[wasm_bindgen]
pub fn build_trends(results: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let results = read_json(results, "danh sách kết quả")?;
    let cfg = read_config(config)?;

    let results = labtrend_engine::results_from_value(&results)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;
    let series = labtrend_engine::build_trends(&results, &cfg);

    write_js(&series, "trends")
}

/// Chuẩn hóa phía client khi server chưa xử lý kết quả.
#[wasm_bindgen]
pub fn normalize_results(results: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let results = read_json(results, "danh sách kết quả")?;
    let cfg = read_config(config)?;

    let results = labtrend_engine::results_from_value(&results)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;
    let normalized = labtrend_engine::normalize_all(&results, &cfg);

    write_js(&normalized, "kết quả đã chuẩn hóa")
}

fn init_panic_hook() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

fn read_json(input: JsValue, what: &str) -> Result<serde_json::Value, JsValue> {
    from_value::<serde_json::Value>(input)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được {what}: {err}")))
}

fn read_filter(filter: Option<JsValue>) -> Result<ResultFilter, JsValue> {
    match filter {
        Some(js_filter) if !js_filter.is_undefined() && !js_filter.is_null() => {
            from_value(js_filter)
                .map_err(|err| JsValue::from_str(&format!("Không đọc được bộ lọc: {err}")))
        }
        _ => Ok(ResultFilter::default()),
    }
}

fn read_config(config: Option<JsValue>) -> Result<EngineConfig, JsValue> {
    let cfg = match config {
        Some(js_cfg) if !js_cfg.is_undefined() && !js_cfg.is_null() => {
            let cfg: JsEngineConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Không đọc được config: {err}")))?;
            EngineConfig::from(cfg)
        }
        _ => EngineConfig::default(),
    };
    cfg.validate()
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;
    Ok(cfg)
}

fn write_js<T: serde::Serialize>(value: &T, what: &str) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|err| JsValue::from_str(&format!("Không serialize {what}: {err}")))
}

fn format_engine_error(err: EngineError) -> String {
    format!("Engine error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_overrides_defaults() {
        let cfg: JsEngineConfig =
            serde_json::from_str(r#"{"overlay_policy": "latest", "suspect_factor": 5.0}"#)
                .expect("config");
        let cfg = EngineConfig::from(cfg);
        assert_eq!(cfg.overlay_policy, OverlayPolicy::Latest);
        assert_eq!(cfg.suspect_factor, 5.0);
        assert_eq!(cfg.date_format, EngineConfig::default().date_format);
        assert_eq!(cfg.poll_interval_secs, 30);
    }

    #[test]
    fn engine_errors_are_prefixed() {
        assert_eq!(
            format_engine_error(EngineError::MissingData),
            "Engine error: Dữ liệu đầu vào thiếu danh sách kết quả"
        );
    }
}
