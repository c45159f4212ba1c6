use std::collections::BTreeMap;

use serde::Serialize;

use crate::align::{AlignedColumn, AlignedTable};

/// Display band for a coverage ratio. Not used for any decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityBand {
    pub fn from_coverage(coverage: f64) -> Self {
        if coverage > 0.8 {
            QualityBand::Excellent
        } else if coverage > 0.5 {
            QualityBand::Good
        } else if coverage > 0.2 {
            QualityBand::Fair
        } else {
            QualityBand::Poor
        }
    }
}

/// How well one metric filled the unified timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataQuality {
    pub coverage: f64,
    pub total_points: usize,
    pub valid_points: usize,
    /// Offset of the nearest sample for the final row, in seconds. This is a
    /// single representative value, not an average.
    pub time_offset_seconds: f64,
    pub status: QualityBand,
}

impl DataQuality {
    pub fn new(total_points: usize, valid_points: usize, time_offset_seconds: f64) -> Self {
        let coverage = if total_points == 0 {
            0.0
        } else {
            (valid_points as f64 / total_points as f64).clamp(0.0, 1.0)
        };
        Self {
            coverage,
            total_points,
            valid_points,
            time_offset_seconds,
            status: QualityBand::from_coverage(coverage),
        }
    }

    /// Quality of a metric that produced no series for the build.
    pub fn unavailable(total_points: usize) -> Self {
        Self::new(total_points, 0, 0.0)
    }

    pub fn score(column: &AlignedColumn) -> Self {
        let offset = column
            .offsets
            .last()
            .copied()
            .flatten()
            .and_then(|d| d.to_std().ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self::new(column.values.len(), column.valid_points(), offset)
    }
}

/// Score every non-base column of `table`.
pub fn score_table(table: &AlignedTable) -> BTreeMap<&'static str, DataQuality> {
    table
        .columns
        .iter()
        .filter(|c| !c.is_base)
        .map(|c| (c.name(), DataQuality::score(c)))
        .collect()
}
