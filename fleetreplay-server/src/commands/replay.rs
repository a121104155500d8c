//! Headless replay: plays a trips file on the virtual clock and logs each batch.

use std::{path::Path, time::Duration};

use anyhow::bail;
use shared::replay::{PlaybackDriver, ReplayEngine};
use tracing::info;

use crate::services::feed;

const BATCH_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    pub speed: f64,
    pub tick: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub batches: usize,
    pub events: usize,
}

/// Plays `path` until every trip has completed.
///
/// # Errors
/// Returns an error for unreadable or invalid data, an invalid speed, or a
/// file without events.
pub async fn run(path: &Path, options: ReplayOptions) -> anyhow::Result<ReplaySummary> {
    let trips = feed::load_trips(path).await?;
    let mut engine = ReplayEngine::with_speed(options.speed)?;
    let loaded = engine.load(trips)?;
    info!(trips = loaded.trips, events = loaded.events, speed = options.speed, "replaying");

    let driver = PlaybackDriver::new(engine, options.tick);
    let mut batches = driver.subscribe_channel(BATCH_BUFFER);
    if !driver.start() {
        bail!("{} has no events to replay", path.display());
    }

    let mut summary = ReplaySummary::default();
    let mut record = |batch: &shared::models::Batch| {
        summary.batches += 1;
        summary.events += batch.len();
        for delivered in &batch.events {
            info!(
                trip = %delivered.trip_id,
                at = %delivered.event.timestamp,
                event_type = delivered.event.event_type.as_deref().unwrap_or("position"),
                "event"
            );
        }
    };

    loop {
        match tokio::time::timeout(options.tick * 2, batches.recv()).await {
            Ok(Some(batch)) => record(&batch),
            Ok(None) => break,
            Err(_) => {}
        }
        if driver.with_engine(|engine| engine.store().all_completed()) {
            break;
        }
    }
    driver.pause();
    while let Ok(batch) = batches.try_recv() {
        record(&batch);
    }

    info!(batches = summary.batches, events = summary.events, "replay complete");
    Ok(summary)
}
