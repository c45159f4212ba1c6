pub mod align;
pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod http;
pub mod metrics;
pub mod quality;
pub mod reader;
pub mod series;
pub mod window;

// Re-export commonly used types for tests
pub use cache::DatasetCache;
pub use catalog::{MetricCatalog, MetricSpec};
pub use dataset::{DatasetBuilder, UnifiedDataset, UnifiedRow};
pub use error::DatasetError;
pub use window::{TimeWindow, WindowMode};
