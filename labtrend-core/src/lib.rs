//! Kiểu dữ liệu lõi cho việc phân loại kết quả xét nghiệm và dựng xu hướng.

use std::fmt;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Cấu hình engine: ngưỡng nghi ngờ, chính sách overlay, định dạng ngày.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bội số lệch khỏi giới hạn tham chiếu để coi là "nghi ngờ".
    pub suspect_factor: f64,
    /// Chọn giới hạn tham chiếu nào làm overlay cho biểu đồ.
    pub overlay_policy: OverlayPolicy,
    /// Mẫu strftime cho ngày hiển thị trên biểu đồ.
    pub date_format: String,
    /// Chu kỳ (giây) mà bộ lập lịch bên ngoài dùng để lấy snapshot mới.
    pub poll_interval_secs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            suspect_factor: 10.0,
            overlay_policy: OverlayPolicy::Earliest,
            date_format: "%d.%m.%Y".to_string(),
            poll_interval_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Kiểm tra cấu hình trước khi dùng.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.suspect_factor.is_finite() || self.suspect_factor <= 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "suspect_factor phải lớn hơn 1, nhận {}",
                self.suspect_factor
            )));
        }
        if StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(EngineError::InvalidConfig(format!(
                "date_format không hợp lệ: {}",
                self.date_format
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "poll_interval_secs phải lớn hơn 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Giới hạn tham chiếu của điểm nào được dùng làm overlay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPolicy {
    /// Điểm sớm nhất có giới hạn tham chiếu.
    #[default]
    Earliest,
    /// Điểm muộn nhất có giới hạn tham chiếu.
    Latest,
}

/// Một kết quả xét nghiệm, bất biến.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabResult {
    pub id: i64,
    pub document_id: i64,
    #[serde(default)]
    pub analyte_id: Option<i64>,
    #[serde(default)]
    pub analyte_name: Option<String>,
    pub source_label: String,
    #[serde(default)]
    pub raw_value: String,
    #[serde(default)]
    pub raw_unit: Option<String>,
    #[serde(default)]
    pub raw_reference_range: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub numeric_value: Option<f64>,
    #[serde(default)]
    pub normalized_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub normalized_reference_min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub normalized_reference_max: Option<f64>,
    #[serde(default)]
    pub is_numeric: bool,
    #[serde(default)]
    pub is_out_of_range: Option<bool>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub is_suspect: bool,
    #[serde(default)]
    pub lab_name: Option<String>,
    #[serde(default)]
    pub lab_comments: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl LabResult {
    /// Khóa chỉ số đo: analyte chuẩn nếu có, ngược lại là nhãn nguồn đã chuẩn hóa.
    pub fn item_key(&self) -> ItemKey {
        match self.analyte_id {
            Some(id) => ItemKey::Analyte(id),
            None => ItemKey::from_label(&self.source_label),
        }
    }

    /// Tên hiển thị: tên analyte nếu có, ngược lại là nhãn nguồn.
    pub fn display_name(&self) -> &str {
        self.analyte_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.source_label.trim())
    }

    /// Giá trị số hữu hạn, nếu có.
    pub fn numeric(&self) -> Option<f64> {
        self.numeric_value.filter(|value| value.is_finite())
    }

    /// Đơn vị hiển thị: ưu tiên đơn vị chuẩn hóa.
    pub fn unit(&self) -> Option<&str> {
        non_empty(self.normalized_unit.as_deref()).or_else(|| non_empty(self.raw_unit.as_deref()))
    }

    /// Hướng lệch đọc từ cờ, nếu nhận diện được.
    pub fn flag_direction(&self) -> Option<FlagDirection> {
        self.flag.as_deref().and_then(FlagDirection::parse)
    }

    /// Trạng thái ngoài khoảng hiệu lực: giá trị từ server, hoặc suy ra từ cờ.
    pub fn out_of_range(&self) -> bool {
        self.is_out_of_range
            .unwrap_or_else(|| self.flag_direction().is_some())
    }

    /// Chuỗi tham chiếu để hiển thị.
    pub fn reference_display(&self) -> String {
        match (self.normalized_reference_min, self.normalized_reference_max) {
            (Some(min), Some(max)) => format!("{min}-{max}"),
            _ => non_empty(self.raw_reference_range.as_deref())
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Giá trị hiển thị: số đã chuẩn hóa nếu có, ngược lại là chuỗi gốc.
    pub fn value_display(&self) -> String {
        match self.numeric() {
            Some(value) => value.to_string(),
            None => self.raw_value.trim().to_string(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

/// Khóa nhóm của một chỉ số đo theo thời gian.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ItemKey {
    Analyte(i64),
    Label(String),
}

impl ItemKey {
    /// Dựng khóa từ nhãn nguồn (trim, chữ thường, gộp khoảng trắng).
    pub fn from_label(label: &str) -> Self {
        ItemKey::Label(normalize_label(label))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Analyte(id) => write!(f, "analyte:{id}"),
            ItemKey::Label(label) => write!(f, "label:{label}"),
        }
    }
}

impl FromStr for ItemKey {
    type Err = EngineError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EngineError::MissingData);
        }
        if let Some(id) = trimmed.strip_prefix("analyte:") {
            return id
                .trim()
                .parse()
                .map(ItemKey::Analyte)
                .map_err(|err| EngineError::Parse(format!("analyte id {id}: {err}")));
        }
        if let Some(label) = trimmed.strip_prefix("label:") {
            return Ok(ItemKey::from_label(label));
        }
        Ok(match trimmed.parse::<i64>() {
            Ok(id) => ItemKey::Analyte(id),
            Err(_) => ItemKey::from_label(trimmed),
        })
    }
}

/// Chuẩn hóa nhãn nguồn để so khớp.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hướng lệch ghi trong cờ của phòng xét nghiệm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlagDirection {
    High,
    Low,
}

impl FlagDirection {
    /// Nhận diện `↑`/`H`/`HIGH`/`HH` và `↓`/`L`/`LOW`/`LL`.
    pub fn parse(flag: &str) -> Option<Self> {
        match flag.trim().to_uppercase().as_str() {
            "↑" | "H" | "HIGH" | "HH" => Some(FlagDirection::High),
            "↓" | "L" | "LOW" | "LL" => Some(FlagDirection::Low),
            _ => None,
        }
    }

    /// Ký hiệu cờ dạng chữ cái.
    pub fn letter(self) -> &'static str {
        match self {
            FlagDirection::High => "H",
            FlagDirection::Low => "L",
        }
    }
}

/// Khoảng tham chiếu số đã giải, không kèm đơn vị.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRange {
    pub min: f64,
    pub max: f64,
}

/// Kết luận phân loại cho một kết quả.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    High,
    Low,
    Anomaly,
}

impl Classification {
    pub fn glyph(self) -> &'static str {
        match self {
            Classification::Normal => "✓",
            Classification::High => "↑",
            Classification::Low => "↓",
            Classification::Anomaly => "⚠",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::High => "high",
            Classification::Low => "low",
            Classification::Anomaly => "anomaly",
        }
    }

    pub fn is_abnormal(self) -> bool {
        self != Classification::Normal
    }
}

impl From<FlagDirection> for Classification {
    fn from(direction: FlagDirection) -> Self {
        match direction {
            FlagDirection::High => Classification::High,
            FlagDirection::Low => Classification::Low,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Nhánh quy tắc đã quyết định phân loại.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationBasis {
    Suspect,
    InRange,
    Flag,
    Bounds,
    Fallback,
}

/// Một dòng tóm tắt cho mỗi chỉ số đo (giá trị mới nhất).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSummary {
    pub key: ItemKey,
    pub analyte_id: Option<i64>,
    pub name: String,
    pub source_label: String,
    pub result_id: i64,
    pub last_value: String,
    pub unit: String,
    pub reference: String,
    /// Cờ gốc của phòng xét nghiệm; biểu tượng hiển thị lấy từ `classification`.
    #[serde(default)]
    pub flag: Option<String>,
    pub classification: Classification,
    pub date: DateTime<Utc>,
    pub lab_name: Option<String>,
    pub is_out_of_range: bool,
    pub is_suspect: bool,
}

/// Bộ đếm tổng hợp trên một tập kết quả.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SummaryCounts {
    pub total: usize,
    pub normal: usize,
    /// Bao gồm cả các kết quả nghi ngờ.
    pub out_of_range: usize,
    pub suspect: usize,
}

impl SummaryCounts {
    /// Ghi nhận một phân loại.
    pub fn record(&mut self, classification: Classification) {
        self.total += 1;
        match classification {
            Classification::Normal => self.normal += 1,
            Classification::Anomaly => {
                self.out_of_range += 1;
                self.suspect += 1;
            }
            Classification::High | Classification::Low => self.out_of_range += 1,
        }
    }
}

/// Chênh lệch so với điểm trước trên biểu đồ.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendDelta {
    pub absolute: f64,
    pub percent: Option<f64>,
}

/// Một điểm dữ liệu trên biểu đồ xu hướng.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub result_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub value: f64,
    pub formatted_date: String,
    pub classification: Classification,
    pub is_out_of_range: bool,
    pub is_suspect: bool,
    pub unit: String,
    pub reference: Option<ReferenceRange>,
    pub delta: Option<TrendDelta>,
}

/// Chuỗi điểm đã sắp xếp kèm overlay khoảng tham chiếu.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Trend {
    pub points: Vec<TrendPoint>,
    pub overlay: Option<ReferenceRange>,
    pub out_of_range_count: usize,
    pub suspect_count: usize,
}

impl Trend {
    /// Không có điểm số nào: giao diện hiển thị trạng thái "chưa đủ dữ liệu".
    pub fn is_insufficient(&self) -> bool {
        self.points.is_empty()
    }
}

/// Xu hướng của một chỉ số đo cụ thể.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSeries {
    pub key: ItemKey,
    pub name: String,
    pub unit: Option<String>,
    #[serde(flatten)]
    pub trend: Trend,
}

/// Tiêu chí lọc; trường rỗng không ràng buộc gì.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ResultFilter {
    pub search: Option<String>,
    #[serde(deserialize_with = "lenient_date")]
    pub date_from: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_date")]
    pub date_to: Option<NaiveDate>,
    pub lab_name: Option<String>,
    pub abnormal_only: bool,
}

impl ResultFilter {
    /// Chuỗi tìm kiếm đã trim, bỏ qua nếu rỗng.
    pub fn search_term(&self) -> Option<&str> {
        non_empty(self.search.as_deref())
    }

    /// Tên phòng xét nghiệm đã trim, bỏ qua nếu rỗng.
    pub fn lab_term(&self) -> Option<&str> {
        non_empty(self.lab_name.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.search_term().is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.lab_term().is_none()
            && !self.abnormal_only
    }

    /// Phần phạm vi (ngày, phòng xét nghiệm) áp dụng lên kết quả thô.
    pub fn scope(&self) -> ResultFilter {
        ResultFilter {
            date_from: self.date_from,
            date_to: self.date_to,
            lab_name: self.lab_name.clone(),
            ..ResultFilter::default()
        }
    }

    /// Phần tinh chỉnh (tìm kiếm, chỉ bất thường) áp dụng lên bảng tóm tắt.
    pub fn refinement(&self) -> ResultFilter {
        ResultFilter {
            search: self.search.clone(),
            abnormal_only: self.abnormal_only,
            ..ResultFilter::default()
        }
    }
}

/// Snapshot dẫn xuất cuối cùng cho tầng trình bày.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResultsSnapshot {
    /// Thời điểm của kết quả mới nhất trong đầu vào.
    pub as_of: Option<DateTime<Utc>>,
    pub summaries: Vec<ResultSummary>,
    pub counts: SummaryCounts,
}

/// Lỗi chung khi nạp dữ liệu hoặc cấu hình.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Dữ liệu đầu vào thiếu danh sách kết quả")]
    MissingData,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error("Cấu hình không hợp lệ: {0}")]
    InvalidConfig(String),
}

/// Đọc thời điểm RFC 3339, hoặc dạng không múi giờ (coi là UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDecimal {
    Number(f64),
    Text(String),
}

// Server có thể gửi Decimal dưới dạng chuỗi.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDecimal>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDecimal::Number(value)) => Ok(Some(value)),
        Some(RawDecimal::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("thời điểm không hợp lệ: {text}")))
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
