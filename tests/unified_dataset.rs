mod common;

use bessmon::config::AlignmentConfig;
use bessmon::quality::QualityBand;
use bessmon::{DatasetBuilder, DatasetError, MetricCatalog, MetricSpec, WindowMode};
use chrono::Duration;
use common::{DataRoot, HUMIDITY, SMOKE, SOC, VOLTAGE, every, ts};

const CURRENT: MetricSpec = MetricSpec::core("bms_current", "current.csv");

#[test]
fn automatic_window_is_the_tightest_overlap() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 09:00:00", 1, 61));
    root.write("DEV1", VOLTAGE, &every("2024-03-01 09:30:00", 1, 91));

    let dataset = root.builder().build("DEV1", None).expect("dataset");
    assert_eq!(dataset.window.mode, WindowMode::AutoOverlap);
    assert_eq!(dataset.window.start, ts("2024-03-01 09:30:00"));
    assert_eq!(dataset.window.end, ts("2024-03-01 10:00:00"));

    assert_eq!(dataset.len(), 30);
    assert_eq!(dataset.rows[0].timestamp, ts("2024-03-01 09:30:00"));
    assert_eq!(dataset.rows[29].timestamp, ts("2024-03-01 09:59:00"));
    for row in &dataset.rows {
        assert!(dataset.window.contains(row.timestamp));
    }
    assert_eq!(dataset.base_metric, "bms_soc");
    assert_eq!(dataset.metrics, vec!["bms_soc", "bms_voltage"]);
}

#[test]
fn disjoint_metrics_fall_back_to_the_busiest_day() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 09:00:00", 1, 61));
    root.write("DEV1", VOLTAGE, &every("2024-03-02 12:00:00", 1, 61));
    root.write("DEV1", CURRENT, &every("2024-03-02 12:30:00", 1, 91));
    let builder = DatasetBuilder::new(
        root.path(),
        MetricCatalog::new([SOC, VOLTAGE, CURRENT]),
        &AlignmentConfig::default(),
    );

    let dataset = builder.build("DEV1", None).expect("dataset");
    assert_eq!(dataset.window.start, ts("2024-03-02 12:00:00"));
    assert_eq!(dataset.window.end, ts("2024-03-02 14:00:00"));

    // 14:00 itself is outside the half-open window.
    assert_eq!(dataset.base_metric, "bms_current");
    assert_eq!(dataset.len(), 90);
    assert_eq!(dataset.rows[0].timestamp, ts("2024-03-02 12:30:00"));

    let at = |raw: &str| {
        dataset
            .rows
            .iter()
            .find(|r| r.timestamp == ts(raw))
            .expect("row")
    };
    assert_eq!(at("2024-03-02 12:45:00").get("bms_voltage"), Some(45.0));
    assert_eq!(at("2024-03-02 13:10:00").get("bms_voltage"), Some(60.0));
    assert_eq!(at("2024-03-02 13:11:00").get("bms_voltage"), None);
    assert!(dataset.rows.iter().all(|r| r.get("bms_soc").is_none()));
    assert!(dataset.unavailable.iter().any(|u| u.metric == "bms_soc"));
}

#[test]
fn single_reading_per_metric_is_still_served() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &[(ts("2024-03-01 09:00:00"), 71.5)]);
    root.write("DEV1", VOLTAGE, &[(ts("2024-03-01 09:00:00"), 812.0)]);

    let dataset = root.builder().build("DEV1", None).expect("dataset");
    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.rows[0].timestamp, ts("2024-03-01 09:00:00"));
    assert_eq!(dataset.rows[0].get("bms_soc"), Some(71.5));
    assert_eq!(dataset.rows[0].get("bms_voltage"), Some(812.0));
}

#[test]
fn explicit_month_only_serves_that_month() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-02-28 00:00:00", 60, 96));
    root.write("DEV1", VOLTAGE, &every("2024-04-10 00:00:00", 60, 48));

    let dataset = root.builder().build("DEV1", Some("2024-03")).expect("dataset");
    assert_eq!(dataset.window.mode, WindowMode::ExplicitMonth);
    // 2024-02 has 29 days, so two of the four days fall in March.
    assert_eq!(dataset.len(), 48);
    let (start, end) = (ts("2024-03-01"), ts("2024-04-01"));
    for row in &dataset.rows {
        assert!(row.timestamp >= start && row.timestamp < end, "{}", row.timestamp);
        assert_eq!(row.get("bms_voltage"), None);
    }
}

#[test]
fn explicit_day_without_samples_is_no_data() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 00:00:00", 10, 20));

    let err = root.builder().build("DEV1", Some("2024-05-01")).expect_err("empty day");
    assert_eq!(err, DatasetError::NoDataAvailable);
    assert!(err.is_not_found());
}

#[test]
fn unparseable_period_uses_automatic_window() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 09:00:00", 1, 61));
    root.write("DEV1", VOLTAGE, &every("2024-03-01 09:30:00", 1, 91));

    let dataset = root.builder().build("DEV1", Some("2024-02-30")).expect("dataset");
    assert_eq!(dataset.window.mode, WindowMode::AutoOverlap);
    assert_eq!(dataset.len(), 30);
}

#[test]
fn device_without_readable_core_files_has_no_window() {
    let root = DataRoot::new();
    root.device("DEV1");
    root.write("DEV1", HUMIDITY, &every("2024-03-01 00:00:00", 1, 10));

    let err = root.builder().build("DEV1", None).expect_err("no window");
    assert_eq!(err, DatasetError::NoUsableWindow);
}

#[test]
fn missing_metric_files_are_absent_with_zero_coverage() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 00:00:00", 1, 120));
    root.write("DEV1", VOLTAGE, &every("2024-03-01 00:00:00", 2, 60));

    let dataset = root.builder().build("DEV1", None).expect("dataset");
    assert!(!dataset.is_empty());
    assert!(dataset.rows.iter().all(|r| r.get("env_humidity").is_none()));

    let humidity = dataset.data_quality.get("env_humidity").expect("quality entry");
    assert_eq!(humidity.coverage, 0.0);
    assert_eq!(humidity.valid_points, 0);
    assert_eq!(humidity.total_points, dataset.len());
    assert_eq!(humidity.status, QualityBand::Poor);

    let missing = dataset
        .unavailable
        .iter()
        .find(|u| u.metric == "env_humidity")
        .expect("unavailable entry");
    assert_eq!(missing.cause, "missing");
    assert!(!dataset.data_quality.contains_key(dataset.base_metric));
}

#[test]
fn timeline_is_the_first_base_timestamps() {
    let root = DataRoot::new();
    let soc = every("2024-03-01 00:00:00", 1, 200);
    root.write("DEV1", SOC, &soc);
    root.write("DEV1", VOLTAGE, &every("2024-03-01 00:00:30", 5, 40));

    let settings = AlignmentConfig {
        max_unified_records: 25,
        ..AlignmentConfig::default()
    };
    let dataset = root.builder_with(settings).build("DEV1", None).expect("dataset");
    let expected: Vec<_> = soc
        .iter()
        .map(|(t, _)| *t)
        .filter(|t| dataset.window.contains(*t))
        .take(25)
        .collect();
    let served: Vec<_> = dataset.rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(served, expected);
}

#[test]
fn merged_values_come_from_the_nearest_sample_within_tolerance() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 00:00:00", 1, 300));
    let voltage = every("2024-03-01 00:00:00", 7, 43);
    let sparse: Vec<_> = voltage
        .iter()
        .copied()
        .filter(|(_, v)| (*v as usize) % 5 != 3)
        .collect();
    root.write("DEV1", VOLTAGE, &sparse);

    let tolerance = Duration::minutes(2);
    let settings = AlignmentConfig {
        tolerance: std::time::Duration::from_secs(120),
        ..AlignmentConfig::default()
    };
    let dataset = root.builder_with(settings).build("DEV1", None).expect("dataset");
    assert_eq!(dataset.base_metric, "bms_soc");

    for row in &dataset.rows {
        let nearest = sparse
            .iter()
            .filter(|(t, _)| dataset.window.contains(*t))
            .min_by_key(|(t, _)| (row.timestamp - *t).abs())
            .expect("samples");
        let expected = ((row.timestamp - nearest.0).abs() <= tolerance).then_some(nearest.1);
        assert_eq!(row.get("bms_voltage"), expected, "row {}", row.timestamp);
    }
}

#[test]
fn flag_metrics_serialize_as_booleans() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 00:00:00", 1, 10));
    let smoke: Vec<_> = every("2024-03-01 00:00:00", 1, 10)
        .into_iter()
        .map(|(t, v)| (t, if v >= 5.0 { 1.0 } else { 0.0 }))
        .collect();
    root.write("DEV1", SMOKE, &smoke);

    let dataset = root.builder().build("DEV1", None).expect("dataset");
    let first = serde_json::to_value(&dataset.rows[0]).expect("json");
    assert_eq!(first["timestamp"], "2024-03-01T00:00:00");
    assert_eq!(first["safety_smoke_flag"], false);
    assert_eq!(first["bms_voltage"], serde_json::Value::Null);
    let sixth = serde_json::to_value(&dataset.rows[5]).expect("json");
    assert_eq!(sixth["safety_smoke_flag"], true);
}

#[test]
fn summary_reports_served_range() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 09:00:00", 1, 61));
    root.write("DEV1", VOLTAGE, &every("2024-03-01 09:30:00", 1, 91));

    let summary = root.builder().build("DEV1", None).expect("dataset").summary();
    assert_eq!(summary.total_records, 30);
    assert_eq!(summary.time_range.start, Some(ts("2024-03-01 09:30:00")));
    assert_eq!(summary.time_range.end, Some(ts("2024-03-01 09:59:00")));
    assert_eq!(summary.available_metrics, vec!["bms_soc", "bms_voltage"]);
}
