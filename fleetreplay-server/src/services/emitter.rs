//! Timestamp-paced emission of a sorted event list.

use std::time::Duration;

use shared::{models::TripEvent, replay::PacingPolicy};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(TripEvent),
    End,
}

/// Spawns the pacing loop for one connection and returns its output.
///
/// The task stops at its next wait once the receiver is dropped.
pub fn spawn_paced(
    events: Vec<TripEvent>,
    pacing: PacingPolicy,
    capacity: usize,
) -> mpsc::Receiver<StreamItem> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(run_paced(events, pacing, tx));
    rx
}

async fn run_paced(events: Vec<TripEvent>, pacing: PacingPolicy, tx: mpsc::Sender<StreamItem>) {
    let total = events.len();
    let delays = pacing.schedule(&events);

    if !wait(&tx, pacing.initial_delay).await {
        debug!(sent = 0, total, "stream consumer left before first event");
        return;
    }

    for (index, (event, delay)) in events.into_iter().zip(delays).enumerate() {
        if tx.send(StreamItem::Event(event)).await.is_err() {
            debug!(sent = index, total, "stream consumer disconnected");
            return;
        }
        metrics::counter!("fleetreplay_stream_events_total").increment(1);
        if !wait(&tx, delay).await {
            debug!(sent = index + 1, total, "stream consumer disconnected");
            return;
        }
    }

    let _ = tx.send(StreamItem::End).await;
    debug!(total, "stream finished");
}

/// Sleeps for `delay` unless the receiver goes away first.
async fn wait(tx: &mpsc::Sender<StreamItem>, delay: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = tx.closed() => false,
    }
}
