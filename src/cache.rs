use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::dataset::{DatasetBuilder, UnifiedDataset};
use crate::error::DatasetError;
use crate::metrics::AppMetrics;
use crate::window::parse_period;

/// Period half of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeriodKey {
    Auto,
    Explicit(String),
}

impl PeriodKey {
    /// Periods that do not parse share the automatic entry, since the build
    /// falls back to discovery for them.
    pub fn from_request(period: Option<&str>) -> Self {
        match period.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) if parse_period(raw).is_ok() => PeriodKey::Explicit(raw.to_string()),
            Some(raw) => {
                warn!(period = raw, "unparseable period; using automatic window");
                PeriodKey::Auto
            }
            None => PeriodKey::Auto,
        }
    }

    pub fn as_period(&self) -> Option<&str> {
        match self {
            PeriodKey::Auto => None,
            PeriodKey::Explicit(raw) => Some(raw),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKey::Auto => f.write_str("auto"),
            PeriodKey::Explicit(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub device_id: String,
    pub period: PeriodKey,
}

impl DatasetKey {
    pub fn new(device_id: &str, period: Option<&str>) -> Self {
        Self {
            device_id: device_id.to_string(),
            period: PeriodKey::from_request(period),
        }
    }
}

/// Lookup counters, readable without the metrics registry.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Builds started, successful or not.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

type Slot = Arc<OnceCell<Arc<UnifiedDataset>>>;
type SlotMap = Arc<Mutex<HashMap<DatasetKey, Slot>>>;

fn lock_slots(slots: &SlotMap) -> std::sync::MutexGuard<'_, HashMap<DatasetKey, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-lifetime memo of unified datasets keyed by (device, period).
///
/// At most one build runs per key. The build is driven by a spawned task
/// that owns the slot, so a caller that goes away does not abandon it: later
/// callers wait on the same build and receive the same `Arc`. A failed build
/// drops its slot once nobody else is waiting on it, so the next request
/// retries. Builds for different keys run in parallel on the blocking pool.
pub struct DatasetCache {
    builder: Arc<DatasetBuilder>,
    slots: SlotMap,
    stats: Arc<CacheStats>,
    metrics: Option<AppMetrics>,
}

impl DatasetCache {
    pub fn new(builder: Arc<DatasetBuilder>) -> Self {
        Self {
            builder,
            slots: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(CacheStats::default()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: AppMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn builder(&self) -> &DatasetBuilder {
        &self.builder
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of keys with a completed dataset.
    pub fn len(&self) -> usize {
        lock_slots(&self.slots)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys tracked by the cache, completed or in flight.
    pub fn tracked_keys(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub async fn get_or_build(
        &self,
        device_id: &str,
        period: Option<&str>,
    ) -> Result<Arc<UnifiedDataset>, DatasetError> {
        if !self.builder.device_exists(device_id) {
            return Err(DatasetError::DeviceNotFound(device_id.to_string()));
        }
        let key = DatasetKey::new(device_id, period);
        let slot = {
            let mut slots = lock_slots(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        if let Some(dataset) = slot.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.record_lookup(true);
            return Ok(Arc::clone(dataset));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(false);

        let job = BuildJob {
            builder: Arc::clone(&self.builder),
            stats: Arc::clone(&self.stats),
            metrics: self.metrics.clone(),
            key,
        };
        let slots = Arc::clone(&self.slots);
        tokio::spawn(job.fill(slot, slots))
            .await
            .map_err(|err| DatasetError::Internal(format!("dataset build task failed: {err}")))?
    }

    fn record_lookup(&self, hit: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(hit);
        }
    }
}

/// Everything a detached build needs, independent of the caller.
struct BuildJob {
    builder: Arc<DatasetBuilder>,
    stats: Arc<CacheStats>,
    metrics: Option<AppMetrics>,
    key: DatasetKey,
}

impl BuildJob {
    async fn fill(self, slot: Slot, slots: SlotMap) -> Result<Arc<UnifiedDataset>, DatasetError> {
        let key = self.key.clone();
        let outcome = slot
            .get_or_try_init(|| self.run())
            .await
            .map(Arc::clone);

        if outcome.is_err() {
            let mut slots = lock_slots(&slots);
            // Map entry plus this task; anyone else still waits on the slot.
            let unused = slots.get(&key).is_some_and(|current| {
                Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2
            });
            if unused && !slot.initialized() {
                slots.remove(&key);
            }
        }
        outcome
    }

    async fn run(self) -> Result<Arc<UnifiedDataset>, DatasetError> {
        self.stats.builds.fetch_add(1, Ordering::Relaxed);
        let key = self.key;
        debug!(device_id = %key.device_id, period = %key.period, "building unified dataset");

        let builder = self.builder;
        let started = Instant::now();
        let task_key = key.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            builder.build(&task_key.device_id, task_key.period.as_period())
        })
        .await
        .map_err(|err| {
            error!(device_id = %key.device_id, error = ?err, "dataset build task failed");
            DatasetError::Internal(format!("dataset build task failed: {err}"))
        })
        .and_then(|result| result);

        if let Some(metrics) = &self.metrics {
            let mode = match &outcome {
                Ok(dataset) => dataset.window.mode.as_str(),
                Err(_) if key.period == PeriodKey::Auto => "auto-overlap",
                Err(_) => "explicit",
            };
            metrics.observe_build(mode, started.elapsed(), outcome.is_ok());
            if let Ok(dataset) = &outcome {
                metrics.set_unified_rows(&dataset.device_id, dataset.len());
                for missing in &dataset.unavailable {
                    metrics.record_load_failure(missing.cause);
                }
            }
        }

        outcome.map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_periods_share_the_automatic_key() {
        assert_eq!(PeriodKey::from_request(None), PeriodKey::Auto);
        assert_eq!(PeriodKey::from_request(Some("  ")), PeriodKey::Auto);
        assert_eq!(PeriodKey::from_request(Some("2024-13")), PeriodKey::Auto);
        assert_eq!(
            PeriodKey::from_request(Some("2024-03")),
            PeriodKey::Explicit("2024-03".into())
        );
        assert_ne!(
            DatasetKey::new("DEV1", Some("2024-03")),
            DatasetKey::new("DEV1", Some("2024-03-01"))
        );
        assert_eq!(PeriodKey::Auto.to_string(), "auto");
    }
}
