use std::sync::Arc;

use crate::cache::DatasetCache;
use crate::catalog::MetricCatalog;
use crate::config::AppConfig;
use crate::dataset::DatasetBuilder;
use crate::metrics::AppMetrics;

/// Shared application context passed to HTTP handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub metrics: AppMetrics,
    pub datasets: Arc<DatasetCache>,
}

impl AppContext {
    pub fn new(config: AppConfig, metrics: AppMetrics) -> Self {
        let builder = DatasetBuilder::new(
            config.data_dir.clone(),
            MetricCatalog::bess(),
            &config.alignment,
        );
        let datasets = DatasetCache::new(Arc::new(builder)).with_metrics(metrics.clone());
        Self {
            config: Arc::new(config),
            metrics,
            datasets: Arc::new(datasets),
        }
    }

    pub fn builder(&self) -> &DatasetBuilder {
        self.datasets.builder()
    }
}
