//! Rolling file sink driven through a full pipeline
//!
//! Uses a manual clock so period boundaries are deterministic.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone};
use logpipe_core::{
    parse_text_line, values, EnricherConfig, Level, LoggerBuilder, ManualClock, OutputFormat,
    RollingFileConfig, RollingInterval,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .unwrap()
}

fn template(dir: &Path) -> String {
    dir.join("app-{Date}.log").to_string_lossy().into_owned()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Events stamped either side of midnight land in two dated files.
#[test]
fn test_day_boundary_produces_two_files() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(at(2026, 1, 21, 23, 59, 59)));
    let logger = LoggerBuilder::new()
        .clock(clock.clone())
        .write_to_rolling_file(RollingFileConfig::new(template(dir.path())))
        .build()
        .unwrap();

    logger.information("before midnight", vec![]);
    clock.set(at(2026, 1, 22, 0, 0, 1));
    logger.information("after midnight", vec![]);
    assert!(logger.shutdown(WAIT).completed);

    assert_eq!(file_names(dir.path()), vec!["app-20260121.log", "app-20260122.log"]);

    let first = fs::read_to_string(dir.path().join("app-20260121.log")).unwrap();
    let second = fs::read_to_string(dir.path().join("app-20260122.log")).unwrap();
    assert!(first.contains("before midnight"));
    assert!(!first.contains("after midnight"));
    assert!(second.contains("after midnight"));
}

/// Size-limited files roll into numbered siblings and old ones are pruned.
#[test]
fn test_size_roll_and_retention() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(at(2026, 3, 1, 10, 0, 0)));
    let logger = LoggerBuilder::new()
        .clock(clock)
        .write_to_rolling_file(
            RollingFileConfig::new(template(dir.path()))
                .file_size_limit_bytes(Some(200))
                .roll_on_size_limit(true)
                .retained_file_count_limit(Some(3)),
        )
        .build()
        .unwrap();

    for i in 0..40u64 {
        logger.information("Payload number {N} with some padding", values! {"N" => i});
    }
    assert!(logger.shutdown(WAIT).completed);

    let names = file_names(dir.path());
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.starts_with("app-20260301")));

    for name in &names {
        let len = fs::metadata(dir.path().join(name)).unwrap().len();
        assert!(len <= 200, "{} is {} bytes", name, len);
    }

    // The newest file holds the last event
    let newest = names.last().unwrap();
    let content = fs::read_to_string(dir.path().join(newest)).unwrap();
    assert!(content.contains("Payload number 39"));
    assert_eq!(logger.diagnostics().sink("rolling_file").unwrap().write_failures, 0);
}

/// Without rolling on size, events past the limit are rejected and counted.
#[test]
fn test_size_limit_without_roll_rejects() {
    let dir = TempDir::new().unwrap();
    let logger = LoggerBuilder::new()
        .write_to_rolling_file(
            RollingFileConfig::new(template(dir.path())).file_size_limit_bytes(Some(100)),
        )
        .build()
        .unwrap();

    for i in 0..20u64 {
        logger.information("Payload number {N} with some padding", values! {"N" => i});
    }
    logger.shutdown(WAIT);

    assert_eq!(file_names(dir.path()).len(), 1);
    let diag = logger.diagnostics();
    let sink = diag.sink("rolling_file").unwrap();
    assert!(sink.write_failures > 0);
    assert_eq!(sink.delivered + sink.write_failures, 20);
}

/// Written lines parse back and carry enriched properties.
#[test]
fn test_written_lines_parse_back() {
    let dir = TempDir::new().unwrap();
    let logger = LoggerBuilder::new()
        .minimum_level(Level::Debug)
        .enrich(EnricherConfig::Property {
            name: "App".to_string(),
            value: "billing".into(),
        })
        .write_to_rolling_file(
            RollingFileConfig::new(template(dir.path())).rolling_interval(RollingInterval::Hour),
        )
        .build()
        .unwrap();

    logger
        .for_context("app.invoices")
        .debug("Invoice {Id} total {Total}", values! {"Id" => 7u64, "Total" => 12.5});
    logger.shutdown(WAIT);

    let names = file_names(dir.path());
    assert_eq!(names.len(), 1);
    let content = fs::read_to_string(dir.path().join(&names[0])).unwrap();
    let line = content.lines().next().unwrap();
    let parsed = parse_text_line(line).unwrap();

    assert_eq!(parsed.level, Level::Debug);
    assert_eq!(parsed.message, "Invoice 7 total 12.5");
    let properties = parsed.properties.unwrap();
    assert!(properties.contains("SourceContext=app.invoices"));
    assert!(properties.contains("App=billing"));
}

/// JSON output writes one object per line.
#[test]
fn test_json_format() {
    let dir = TempDir::new().unwrap();
    let logger = LoggerBuilder::new()
        .write_to_rolling_file(
            RollingFileConfig::new(template(dir.path())).format(OutputFormat::Json),
        )
        .build()
        .unwrap();

    logger.warning("Disk {Pct}% full", values! {"Pct" => 91u64});
    logger.shutdown(WAIT);

    let names = file_names(dir.path());
    let content = fs::read_to_string(dir.path().join(&names[0])).unwrap();
    let json: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(json["@mt"], "Disk {Pct}% full");
    assert_eq!(json["@m"], "Disk 91% full");
    assert_eq!(json["Pct"], 91);
}
