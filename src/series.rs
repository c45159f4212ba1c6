use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, Trim};
use tracing::{debug, info, warn};

use crate::catalog::{MetricSource, MetricSpec};
use crate::error::LoadError;
use crate::window::TimeWindow;

const TS_COLUMN: &str = "ts";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parse a CSV timestamp. Offsets are normalized to UTC; naive values are
/// taken as-is.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.naive_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Coerce a raw cell to a reading. Blank, `nan`, non-finite and
/// non-numeric cells are absent.
pub fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("true") {
        return Some(1.0);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Some(0.0);
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ts: NaiveDateTime,
    pub value: Option<f64>,
}

/// How much of a metric file to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Full,
    Prefix(usize),
}

impl ReadMode {
    fn limit(self) -> usize {
        match self {
            ReadMode::Full => usize::MAX,
            ReadMode::Prefix(rows) => rows,
        }
    }
}

/// Read `ts` plus the first other column of a metric CSV.
///
/// Rows with a blank timestamp are dropped; any other unparsable timestamp
/// rejects the whole file.
pub fn read_samples(path: &Path, mode: ReadMode) -> Result<Vec<Sample>, LoadError> {
    let file = File::open(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => LoadError::Missing {
            path: path.to_path_buf(),
        },
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let headers = reader.headers().map_err(csv_err)?.clone();
    let ts_idx = headers
        .iter()
        .position(|h| h == TS_COLUMN)
        .ok_or_else(|| LoadError::MissingColumn {
            path: path.to_path_buf(),
            column: TS_COLUMN,
        })?;
    let value_idx = headers
        .iter()
        .position(|h| h != TS_COLUMN)
        .ok_or_else(|| LoadError::MissingColumn {
            path: path.to_path_buf(),
            column: "value",
        })?;

    let mut samples = Vec::new();
    for (row, record) in reader.records().take(mode.limit()).enumerate() {
        let record = record.map_err(csv_err)?;
        let raw_ts = record.get(ts_idx).unwrap_or_default();
        if raw_ts.is_empty() {
            continue;
        }
        let ts = parse_timestamp(raw_ts).ok_or_else(|| LoadError::Timestamp {
            path: path.to_path_buf(),
            row: row + 1,
            value: raw_ts.to_string(),
        })?;
        let value = record.get(value_idx).and_then(parse_value);
        samples.push(Sample { ts, value });
    }
    Ok(samples)
}

/// Time-ordered readings of one metric for one device, unique per timestamp.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    spec: MetricSpec,
    samples: Vec<Sample>,
}

impl MetricSeries {
    /// Sort ascending and keep the first sample of each timestamp.
    pub fn from_samples(spec: MetricSpec, mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.ts);
        samples.dedup_by_key(|s| s.ts);
        Self { spec, samples }
    }

    pub fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.samples.iter().map(|s| s.ts)
    }

    /// Sample closest in time to `target` and its absolute distance. Equal
    /// distances resolve to the earlier sample.
    pub fn nearest(&self, target: NaiveDateTime) -> Option<(Sample, Duration)> {
        let idx = self.samples.partition_point(|s| s.ts < target);
        let before = idx.checked_sub(1).and_then(|i| self.samples.get(i));
        let after = self.samples.get(idx);
        match (before, after) {
            (Some(b), Some(a)) => {
                let to_before = target - b.ts;
                let to_after = a.ts - target;
                if to_before <= to_after {
                    Some((*b, to_before))
                } else {
                    Some((*a, to_after))
                }
            }
            (Some(b), None) => Some((*b, target - b.ts)),
            (None, Some(a)) => Some((*a, a.ts - target)),
            (None, None) => None,
        }
    }
}

/// A metric that could not be loaded for a build.
#[derive(Debug)]
pub struct MetricFailure {
    pub metric: &'static str,
    pub error: LoadError,
}

/// Successful series in catalog order plus the metrics that dropped out.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub series: Vec<MetricSeries>,
    pub failures: Vec<MetricFailure>,
}

/// Loads window-filtered, bounded series for a device's metrics.
#[derive(Debug, Clone)]
pub struct SeriesLoader {
    max_rows: usize,
}

impl SeriesLoader {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }

    /// Load one metric restricted to `window`.
    ///
    /// When more than `max_rows` rows fall inside the window, every
    /// `count / max_rows`-th row is kept so the series still spans the window.
    pub fn load(
        &self,
        source: &MetricSource,
        window: &TimeWindow,
        mode: ReadMode,
    ) -> Result<MetricSeries, LoadError> {
        let mut samples: Vec<Sample> = read_samples(&source.path, mode)?
            .into_iter()
            .filter(|s| window.contains(s.ts))
            .collect();
        if samples.is_empty() {
            return Err(LoadError::EmptyWindow);
        }
        if samples.len() > self.max_rows {
            let stride = samples.len() / self.max_rows;
            samples = samples.into_iter().step_by(stride).collect();
        }
        Ok(MetricSeries::from_samples(source.spec, samples))
    }

    /// Load every source, keeping successes in input order.
    pub fn load_all(
        &self,
        sources: &[MetricSource],
        window: &TimeWindow,
        mode: ReadMode,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for source in sources {
            let metric = source.spec.name;
            match self.load(source, window, mode) {
                Ok(series) => {
                    debug!(metric, rows = series.len(), "loaded metric series");
                    report.series.push(series);
                }
                Err(error) => {
                    match &error {
                        LoadError::Missing { .. } => debug!(metric, "metric file not present"),
                        LoadError::EmptyWindow => info!(metric, window = %window, "no samples in window"),
                        other => warn!(metric, error = ?other, "failed to load metric"),
                    }
                    report.failures.push(MetricFailure { metric, error });
                }
            }
        }
        report
    }
}
