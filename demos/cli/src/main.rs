use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use labtrend_core::{EngineConfig, ItemKey, LabResult, ResultFilter, ResultsSnapshot, Trend};
use labtrend_engine::{build_trend, derive_snapshot, history_for, normalize_all};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "labtrend_cli=info,labtrend_engine=info";

#[derive(Parser, Debug)]
#[command(
    name = "labtrend-cli",
    about = "Tóm tắt và vẽ xu hướng kết quả xét nghiệm từ snapshot JSON."
)]
struct Args {
    /// Đường dẫn tới file JSON chứa danh sách kết quả.
    #[arg(short, long)]
    input: PathBuf,

    /// File JSON cấu hình engine.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tìm theo tên chỉ số (không phân biệt hoa thường).
    #[arg(long)]
    search: Option<String>,

    /// Ngày bắt đầu (YYYY-MM-DD), tính cả ngày này.
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Ngày kết thúc (YYYY-MM-DD), tính cả ngày này.
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Tên phòng xét nghiệm (khớp một phần).
    #[arg(long)]
    lab: Option<String>,

    /// Chỉ hiển thị chỉ số bất thường.
    #[arg(long)]
    abnormal_only: bool,

    /// Chuẩn hóa phía client trước khi phân loại.
    #[arg(long)]
    normalize: bool,

    /// In xu hướng của một chỉ số: id analyte hoặc nhãn nguồn.
    #[arg(long)]
    item: Option<ItemKey>,

    /// In kết quả dạng JSON.
    #[arg(long)]
    json: bool,

    /// Đọc lại file và tính lại sau mỗi chu kỳ poll_interval_secs.
    #[arg(long)]
    watch: bool,
}

impl Args {
    fn filter(&self) -> ResultFilter {
        ResultFilter {
            search: self.search.clone(),
            date_from: self.from,
            date_to: self.to,
            lab_name: self.lab.clone(),
            abnormal_only: self.abnormal_only,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    if !args.watch {
        return run_once(&args, &config);
    }

    tracing::info!(
        input = %args.input.display(),
        interval_secs = config.poll_interval_secs,
        "Watching result snapshot"
    );
    loop {
        // A half-written snapshot must not stop the loop; the next poll retries.
        if let Err(err) = run_once(&args, &config) {
            tracing::warn!("Snapshot refresh failed: {err:#}");
        }
        std::thread::sleep(Duration::from_secs(config.poll_interval_secs.into()));
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Không đọc được file cấu hình {path:?}"))?;
    let config: EngineConfig = serde_json::from_str(&data)
        .with_context(|| format!("Cấu hình không hợp lệ trong {path:?}"))?;
    config.validate()?;
    Ok(config)
}

fn run_once(args: &Args, config: &EngineConfig) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Không đọc được file {:?}", args.input))?;
    let mut results = labtrend_engine::results_from_str(&data)?;
    if args.normalize {
        results = normalize_all(&results, config);
    }

    let snapshot = derive_snapshot(&results, &args.filter());
    let trend = args.item.as_ref().map(|key| {
        let history = history_for(&results, key);
        (key, build_trend(history, config))
    });

    if args.json {
        let mut output = serde_json::json!({ "snapshot": snapshot });
        if let Some((key, trend)) = &trend {
            output["trend"] = serde_json::json!({ "key": key, "trend": trend });
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_snapshot(&snapshot);
    if let Some((key, trend)) = &trend {
        print_trend(key, trend, &results);
    }
    Ok(())
}

fn print_snapshot(snapshot: &ResultsSnapshot) {
    match snapshot.as_of {
        Some(as_of) => println!("As of: {as_of}"),
        None => println!("As of: no results"),
    }
    let counts = &snapshot.counts;
    println!(
        "Items: {} | normal: {} | out of range: {} | suspect: {}",
        counts.total, counts.normal, counts.out_of_range, counts.suspect
    );

    for summary in &snapshot.summaries {
        let flag = summary
            .flag
            .as_deref()
            .map(|flag| format!(" [{flag}]"))
            .unwrap_or_default();
        let reference = if summary.reference.is_empty() {
            String::new()
        } else {
            format!(" (ref {})", summary.reference)
        };
        println!(
            "  {} {:<28} {} {}{}{}  {}  {}",
            summary.classification.glyph(),
            summary.name,
            summary.last_value,
            summary.unit,
            flag,
            reference,
            summary.date.format("%Y-%m-%d"),
            summary.lab_name.as_deref().unwrap_or("-"),
        );
    }
}

fn print_trend(key: &ItemKey, trend: &Trend, results: &[LabResult]) {
    let name = history_for(results, key)
        .into_iter()
        .max_by_key(|result| (result.created_at, result.id))
        .map(|result| result.display_name().to_string())
        .unwrap_or_else(|| key.to_string());

    println!();
    if trend.is_insufficient() {
        println!("Trend for {name}: insufficient data");
        return;
    }

    match trend.overlay {
        Some(range) => println!(
            "Trend for {name}: {} points, reference {}-{}",
            trend.points.len(),
            range.min,
            range.max
        ),
        None => println!("Trend for {name}: {} points", trend.points.len()),
    }
    for point in &trend.points {
        let delta = point
            .delta
            .map(|delta| format!("  Δ {:+.2}", delta.absolute))
            .unwrap_or_default();
        println!(
            "  {}  {} {}  {} {}{}",
            point.formatted_date,
            point.value,
            point.unit,
            point.classification.glyph(),
            point.classification,
            delta
        );
    }
    println!(
        "  out of range: {}, suspect: {}",
        trend.out_of_range_count, trend.suspect_count
    );
}
