use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{info, instrument};

use crate::align::{AlignedTable, TimeAligner};
use crate::catalog::{MetricCatalog, MetricGroup, MetricKind};
use crate::config::AlignmentConfig;
use crate::error::DatasetError;
use crate::quality::{self, DataQuality};
use crate::series::{LoadReport, ReadMode, SeriesLoader};
use crate::window::{TimeWindow, WindowSelector};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One metric's cell in a unified row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub metric: &'static str,
    pub kind: MetricKind,
    pub value: Option<f64>,
}

/// A synchronized timestamp with one cell per catalog metric.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRow {
    pub timestamp: NaiveDateTime,
    pub readings: Vec<Reading>,
}

impl UnifiedRow {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| r.metric == metric)
            .and_then(|r| r.value)
    }
}

impl Serialize for UnifiedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.readings.len() + 1))?;
        map.serialize_entry("timestamp", &self.timestamp.format(ISO_FORMAT).to_string())?;
        for reading in &self.readings {
            match reading.kind {
                MetricKind::Numeric => map.serialize_entry(reading.metric, &reading.value)?,
                MetricKind::Flag => {
                    map.serialize_entry(reading.metric, &reading.value.map(|v| v != 0.0))?
                }
            }
        }
        map.end()
    }
}

/// A catalog metric that contributed nothing to the build, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableMetric {
    pub metric: &'static str,
    pub reason: String,
    /// Short failure class, used as a metrics label.
    #[serde(skip)]
    pub cause: &'static str,
}

/// The time-aligned table served for one (device, period) pair.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedDataset {
    pub device_id: String,
    pub window: TimeWindow,
    pub base_metric: &'static str,
    /// Metrics with a loaded series, in catalog order.
    pub metrics: Vec<&'static str>,
    pub rows: Vec<UnifiedRow>,
    pub data_quality: BTreeMap<&'static str, DataQuality>,
    pub unavailable: Vec<UnavailableMetric>,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

/// Overview of a built dataset without the rows.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub device_id: String,
    pub total_records: usize,
    pub time_range: TimeRange,
    pub window: TimeWindow,
    pub base_metric: &'static str,
    pub available_metrics: Vec<&'static str>,
    pub data_quality: BTreeMap<&'static str, DataQuality>,
    pub unavailable: Vec<UnavailableMetric>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupAvailability {
    pub group: MetricGroup,
    pub metrics: Vec<&'static str>,
    pub total: usize,
}

/// Loaded metrics grouped by subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct MetricAvailability {
    pub device_id: String,
    pub groups: Vec<GroupAvailability>,
    pub total_systems: usize,
}

impl UnifiedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            device_id: self.device_id.clone(),
            total_records: self.rows.len(),
            time_range: TimeRange {
                start: self.rows.first().map(|r| r.timestamp),
                end: self.rows.last().map(|r| r.timestamp),
            },
            window: self.window,
            base_metric: self.base_metric,
            available_metrics: self.metrics.clone(),
            data_quality: self.data_quality.clone(),
            unavailable: self.unavailable.clone(),
        }
    }

    /// Every loaded metric shares the unified timeline, so each reports the
    /// table's row count.
    pub fn rows_per_metric(&self) -> BTreeMap<&'static str, usize> {
        self.metrics.iter().map(|m| (*m, self.rows.len())).collect()
    }

    pub fn availability(&self) -> MetricAvailability {
        let groups: Vec<GroupAvailability> = MetricGroup::ALL
            .iter()
            .map(|group| {
                let metrics: Vec<&'static str> = self
                    .metrics
                    .iter()
                    .copied()
                    .filter(|m| MetricGroup::of(m) == *group)
                    .collect();
                GroupAvailability {
                    group: *group,
                    total: metrics.len(),
                    metrics,
                }
            })
            .collect();
        let total_systems = groups.iter().filter(|g| g.total > 0).count();
        MetricAvailability {
            device_id: self.device_id.clone(),
            groups,
            total_systems,
        }
    }
}

/// Runs window selection, loading, alignment and scoring for one device.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    data_dir: PathBuf,
    catalog: MetricCatalog,
    selector: WindowSelector,
    loader: SeriesLoader,
    aligner: TimeAligner,
    prefix_read_rows: usize,
}

impl DatasetBuilder {
    pub fn new(data_dir: impl Into<PathBuf>, catalog: MetricCatalog, settings: &AlignmentConfig) -> Self {
        let tolerance = Duration::from_std(settings.tolerance)
            .unwrap_or_else(|_| Duration::minutes(crate::align::DEFAULT_TOLERANCE_MINUTES));
        Self {
            data_dir: data_dir.into(),
            catalog,
            selector: WindowSelector::new(settings.window_sample_size),
            loader: SeriesLoader::new(settings.max_series_records),
            aligner: TimeAligner::new(tolerance, settings.max_unified_records),
            prefix_read_rows: settings.prefix_read_rows,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding a device's CSV files, if the id names one.
    pub fn device_dir(&self, device_id: &str) -> Option<PathBuf> {
        let mut components = Path::new(device_id).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal {
            return None;
        }
        let dir = self.data_dir.join(device_id);
        dir.is_dir().then_some(dir)
    }

    pub fn device_exists(&self, device_id: &str) -> bool {
        self.device_dir(device_id).is_some()
    }

    /// Device ids found under the data root, sorted.
    pub fn list_devices(&self) -> std::io::Result<Vec<String>> {
        let mut devices = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    devices.push(name.to_string());
                }
            }
        }
        devices.sort();
        Ok(devices)
    }

    /// Build the unified dataset for `device_id`.
    ///
    /// A period that fails to parse falls back to automatic discovery.
    #[instrument(skip(self))]
    pub fn build(&self, device_id: &str, period: Option<&str>) -> Result<UnifiedDataset, DatasetError> {
        let device_dir = self
            .device_dir(device_id)
            .ok_or_else(|| DatasetError::DeviceNotFound(device_id.to_string()))?;

        let core = self.catalog.resolve_core(&device_dir);
        let window = self.selector.select(&core, period)?;
        let mode = if window.is_explicit() {
            ReadMode::Full
        } else {
            ReadMode::Prefix(self.prefix_read_rows)
        };

        let sources = self.catalog.resolve(&device_dir);
        let report = self.loader.load_all(&sources, &window, mode);
        let table = self.aligner.align(&report.series)?;
        let dataset = self.assemble(device_id, window, &table, report);

        info!(
            device_id,
            window = %dataset.window,
            base_metric = dataset.base_metric,
            rows = dataset.rows.len(),
            metrics = dataset.metrics.len(),
            unavailable = dataset.unavailable.len(),
            "built unified dataset"
        );
        Ok(dataset)
    }

    fn assemble(
        &self,
        device_id: &str,
        window: TimeWindow,
        table: &AlignedTable,
        report: LoadReport,
    ) -> UnifiedDataset {
        let mut data_quality = quality::score_table(table);
        let unavailable: Vec<UnavailableMetric> = report
            .failures
            .iter()
            .map(|failure| UnavailableMetric {
                metric: failure.metric,
                reason: failure.error.to_string(),
                cause: failure.error.reason(),
            })
            .collect();
        for missing in &unavailable {
            data_quality.insert(missing.metric, DataQuality::unavailable(table.len()));
        }

        let columns: Vec<_> = self
            .catalog
            .all()
            .map(|spec| (spec, table.column(spec.name)))
            .collect();
        let rows = table
            .timestamps
            .iter()
            .enumerate()
            .map(|(idx, timestamp)| UnifiedRow {
                timestamp: *timestamp,
                readings: columns
                    .iter()
                    .map(|(spec, column)| Reading {
                        metric: spec.name,
                        kind: spec.kind,
                        value: column.and_then(|c| c.values.get(idx).copied().flatten()),
                    })
                    .collect(),
            })
            .collect();

        UnifiedDataset {
            device_id: device_id.to_string(),
            window,
            base_metric: table.base_metric,
            metrics: report.series.iter().map(|s| s.name()).collect(),
            rows,
            data_quality,
            unavailable,
            built_at: Utc::now(),
        }
    }
}
