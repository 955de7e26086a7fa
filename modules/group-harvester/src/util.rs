use std::time::Duration;

use harvest_common::DelayRange;
use rand::Rng;

/// Sleep for a random duration inside `range`. A zero range returns immediately.
pub(crate) async fn pause(range: DelayRange) {
    let ms = if range.max_ms <= range.min_ms {
        range.min_ms
    } else {
        rand::rng().random_range(range.min_ms..=range.max_ms)
    };
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
