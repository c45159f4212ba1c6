use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::MetricSource;
use crate::error::{DatasetError, WindowParseError};
use crate::series::{self, ReadMode};

/// How a window was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowMode {
    AutoOverlap,
    ExplicitDay,
    ExplicitMonth,
}

impl WindowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowMode::AutoOverlap => "auto-overlap",
            WindowMode::ExplicitDay => "explicit-day",
            WindowMode::ExplicitMonth => "explicit-month",
        }
    }
}

/// Half-open `[start, end)` interval of timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub mode: WindowMode,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, mode: WindowMode) -> Self {
        Self { start, end, mode }
    }

    pub fn is_degenerate(&self) -> bool {
        self.start >= self.end
    }

    pub fn is_explicit(&self) -> bool {
        !matches!(self.mode, WindowMode::AutoOverlap)
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) {}", self.start, self.end, self.mode.as_str())
    }
}

/// Parse `YYYY-MM` into a calendar month or `YYYY-MM-DD` into a single day.
pub fn parse_period(raw: &str) -> Result<TimeWindow, WindowParseError> {
    let invalid = || WindowParseError {
        input: raw.to_string(),
    };
    let raw = raw.trim();
    let (start, mode) = match raw.len() {
        7 => (
            NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").map_err(|_| invalid())?,
            WindowMode::ExplicitMonth,
        ),
        10 => (
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?,
            WindowMode::ExplicitDay,
        ),
        _ => return Err(invalid()),
    };
    let end = match mode {
        WindowMode::ExplicitMonth => start.checked_add_months(Months::new(1)),
        _ => start.succ_opt(),
    }
    .ok_or_else(invalid)?;
    Ok(TimeWindow::new(
        start.and_time(NaiveTime::MIN),
        end.and_time(NaiveTime::MIN),
        mode,
    ))
}

/// Observed time extent of one metric's sampled rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricExtent {
    pub metric: &'static str,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub count: usize,
}

/// Choose the served window from per-metric extents.
///
/// The tightest common overlap wins. When the metrics do not overlap, the
/// calendar day on which the most metrics start is used instead, spanning
/// the earliest start to the latest end of those metrics. Ties between days
/// go to the earlier day. If those metrics all sit on one instant, the
/// window ends one second after it. Returns `None` only when `extents` is
/// empty.
pub fn select_window(extents: &[MetricExtent]) -> Option<TimeWindow> {
    let start = extents.iter().map(|e| e.start).max()?;
    let end = extents.iter().map(|e| e.end).min()?;
    let overlap = TimeWindow::new(start, end, WindowMode::AutoOverlap);
    if !overlap.is_degenerate() {
        return Some(overlap);
    }

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for extent in extents {
        *per_day.entry(extent.start.date()).or_default() += 1;
    }
    let mut best: Option<(NaiveDate, usize)> = None;
    for (day, count) in per_day {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((day, count));
        }
    }
    let (day, _) = best?;

    let on_day = extents.iter().filter(|e| e.start.date() == day);
    let start = on_day.clone().map(|e| e.start).min()?;
    let end = on_day.map(|e| e.end).max()?;
    // A single shared instant still has to contain its own samples.
    let end = if end > start {
        end
    } else {
        start + Duration::seconds(1)
    };
    Some(TimeWindow::new(start, end, WindowMode::AutoOverlap))
}

/// Picks the `[start, end)` interval a build serves.
#[derive(Debug, Clone)]
pub struct WindowSelector {
    sample_rows: usize,
}

impl WindowSelector {
    /// Automatic discovery reads `sample_size × 5` rows from each core file.
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_rows: sample_size.saturating_mul(5),
        }
    }

    /// Sample the head of every core file. Unreadable or empty files are
    /// skipped.
    pub fn sample_extents(&self, core: &[MetricSource]) -> Vec<MetricExtent> {
        let mut extents = Vec::with_capacity(core.len());
        for source in core {
            let samples = match series::read_samples(&source.path, ReadMode::Prefix(self.sample_rows))
            {
                Ok(samples) => samples,
                Err(err) => {
                    debug!(metric = source.spec.name, error = %err, "skipping metric during window sampling");
                    continue;
                }
            };
            let start = samples.iter().map(|s| s.ts).min();
            let end = samples.iter().map(|s| s.ts).max();
            if let (Some(start), Some(end)) = (start, end) {
                extents.push(MetricExtent {
                    metric: source.spec.name,
                    start,
                    end,
                    count: samples.len(),
                });
            }
        }
        extents
    }

    /// Automatic discovery over the given core metric files.
    pub fn discover(&self, core: &[MetricSource]) -> Result<TimeWindow, DatasetError> {
        let extents = self.sample_extents(core);
        let window = select_window(&extents).ok_or(DatasetError::NoUsableWindow)?;
        let covered = extents
            .iter()
            .filter(|e| e.start <= window.end && e.end >= window.start)
            .count();
        info!(
            window = %window,
            sampled = extents.len(),
            covered,
            "selected time window"
        );
        Ok(window)
    }

    /// Use the explicit period when it parses, automatic discovery otherwise.
    pub fn select(
        &self,
        core: &[MetricSource],
        period: Option<&str>,
    ) -> Result<TimeWindow, DatasetError> {
        if let Some(raw) = period {
            match parse_period(raw) {
                Ok(window) => return Ok(window),
                Err(err) => warn!(error = %err, "falling back to automatic window discovery"),
            }
        }
        self.discover(core)
    }
}
