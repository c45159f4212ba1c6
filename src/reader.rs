use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio::time::MissedTickBehavior;

use crate::dataset::{UnifiedDataset, UnifiedRow};

/// Rows `skip..skip + batch_size` of the dataset, clipped at the end.
pub fn batch(dataset: &UnifiedDataset, batch_size: usize, skip: usize) -> &[UnifiedRow] {
    let rows = dataset.rows.as_slice();
    let start = skip.min(rows.len());
    let end = start.saturating_add(batch_size).min(rows.len());
    &rows[start..end]
}

/// Emit one row per `interval`, starting immediately and wrapping back to
/// the first row after the last. Ends at once for an empty dataset.
///
/// The stream never finishes on its own; dropping it stops the timer.
pub fn row_stream(
    dataset: Arc<UnifiedDataset>,
    interval: Duration,
) -> impl Stream<Item = UnifiedRow> + Send + 'static {
    async_stream::stream! {
        if dataset.is_empty() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut index = 0usize;
        loop {
            ticker.tick().await;
            yield dataset.rows[index].clone();
            index = (index + 1) % dataset.rows.len();
        }
    }
}
