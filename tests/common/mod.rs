#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use bessmon::config::AlignmentConfig;
use bessmon::{DatasetBuilder, MetricCatalog, MetricSpec};
use chrono::{Duration, NaiveDateTime};
use tempfile::TempDir;

pub const SOC: MetricSpec = MetricSpec::core("bms_soc", "soc.csv");
pub const VOLTAGE: MetricSpec = MetricSpec::core("bms_voltage", "voltage.csv");
pub const HUMIDITY: MetricSpec = MetricSpec::additional("env_humidity", "humidity.csv");
pub const SMOKE: MetricSpec = MetricSpec::additional("safety_smoke_flag", "smoke.csv").flag();

pub fn ts(raw: &str) -> NaiveDateTime {
    bessmon::series::parse_timestamp(raw).expect("timestamp")
}

/// `count` samples starting at `start`, one every `step_minutes`, valued by index.
pub fn every(start: &str, step_minutes: i64, count: usize) -> Vec<(NaiveDateTime, f64)> {
    let start = ts(start);
    (0..count)
        .map(|i| (start + Duration::minutes(step_minutes * i as i64), i as f64))
        .collect()
}

pub fn catalog() -> MetricCatalog {
    MetricCatalog::new([SOC, VOLTAGE, HUMIDITY, SMOKE])
}

/// Data root on disk with one directory per device.
pub struct DataRoot {
    dir: TempDir,
}

impl DataRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tmp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn device(&self, device_id: &str) -> PathBuf {
        let path = self.dir.path().join(device_id);
        std::fs::create_dir_all(&path).expect("device dir");
        path
    }

    pub fn write(&self, device_id: &str, spec: MetricSpec, rows: &[(NaiveDateTime, f64)]) {
        let mut body = String::from("ts,value\n");
        for (ts, value) in rows {
            writeln!(body, "{},{}", ts.format("%Y-%m-%d %H:%M:%S"), value).expect("format");
        }
        std::fs::write(self.device(device_id).join(spec.file), body).expect("write csv");
    }

    pub fn builder(&self) -> DatasetBuilder {
        self.builder_with(AlignmentConfig::default())
    }

    pub fn builder_with(&self, settings: AlignmentConfig) -> DatasetBuilder {
        DatasetBuilder::new(self.path(), catalog(), &settings)
    }
}
