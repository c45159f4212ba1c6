use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::catalog::MetricSpec;
use crate::error::DatasetError;
use crate::series::MetricSeries;

/// Default maximum distance between a row and the sample written into it.
pub const DEFAULT_TOLERANCE_MINUTES: i64 = 10;

/// One metric's cells on the unified timeline.
#[derive(Debug, Clone)]
pub struct AlignedColumn {
    pub spec: MetricSpec,
    pub is_base: bool,
    pub values: Vec<Option<f64>>,
    /// Distance to the nearest sample for each row, whether or not it was
    /// within tolerance.
    pub offsets: Vec<Option<Duration>>,
}

impl AlignedColumn {
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn valid_points(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Timeline taken from the base metric plus one column per loaded metric.
#[derive(Debug, Clone)]
pub struct AlignedTable {
    pub base_metric: &'static str,
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: Vec<AlignedColumn>,
}

impl AlignedTable {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn column(&self, metric: &str) -> Option<&AlignedColumn> {
        self.columns.iter().find(|c| c.name() == metric)
    }
}

/// Nearest-in-time join of independently sampled series.
#[derive(Debug, Clone)]
pub struct TimeAligner {
    tolerance: Duration,
    max_rows: usize,
}

impl Default for TimeAligner {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_TOLERANCE_MINUTES), 1000)
    }
}

impl TimeAligner {
    pub fn new(tolerance: Duration, max_rows: usize) -> Self {
        Self {
            tolerance,
            max_rows: max_rows.max(1),
        }
    }

    /// Align `series` onto the timeline of the longest one.
    ///
    /// The first series wins ties for the base. The timeline keeps only the
    /// first `max_rows` base timestamps. Every other metric contributes, per
    /// row, the value of its nearest sample when that sample lies within the
    /// tolerance.
    pub fn align(&self, series: &[MetricSeries]) -> Result<AlignedTable, DatasetError> {
        let mut base: Option<&MetricSeries> = None;
        for candidate in series {
            if base.map_or(true, |b| candidate.len() > b.len()) {
                base = Some(candidate);
            }
        }
        let base = base
            .filter(|b| !b.is_empty())
            .ok_or(DatasetError::NoDataAvailable)?;

        let timestamps: Vec<NaiveDateTime> = base.timestamps().take(self.max_rows).collect();
        debug!(
            base_metric = base.name(),
            base_rows = base.len(),
            rows = timestamps.len(),
            "aligning series onto base timeline"
        );

        let columns = series
            .iter()
            .map(|s| {
                if std::ptr::eq(s, base) {
                    self.base_column(s, timestamps.len())
                } else {
                    self.match_column(s, &timestamps)
                }
            })
            .collect();

        Ok(AlignedTable {
            base_metric: base.name(),
            timestamps,
            columns,
        })
    }

    fn base_column(&self, series: &MetricSeries, rows: usize) -> AlignedColumn {
        AlignedColumn {
            spec: *series.spec(),
            is_base: true,
            values: series.samples().iter().take(rows).map(|s| s.value).collect(),
            offsets: vec![Some(Duration::zero()); rows],
        }
    }

    fn match_column(&self, series: &MetricSeries, timeline: &[NaiveDateTime]) -> AlignedColumn {
        let mut values = Vec::with_capacity(timeline.len());
        let mut offsets = Vec::with_capacity(timeline.len());
        for &target in timeline {
            match series.nearest(target) {
                Some((sample, diff)) => {
                    values.push(if diff <= self.tolerance {
                        sample.value
                    } else {
                        None
                    });
                    offsets.push(Some(diff));
                }
                None => {
                    values.push(None);
                    offsets.push(None);
                }
            }
        }
        AlignedColumn {
            spec: *series.spec(),
            is_base: false,
            values,
            offsets,
        }
    }
}
