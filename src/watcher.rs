use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_str, Domain, Level};

/// One observation of the host page, delivered by the embedding surface.
/// The host emits a sample per DOM mutation batch (or poll tick); the
/// watcher decides whether anything navigation-relevant changed.
#[derive(Debug, Clone)]
pub struct PageSample {
    pub location: String,
    pub title: String,
    pub scroll_offset: f64,
    pub viewport_height: f64,
    pub document_height: f64,
    pub visible_text: String,
}

impl PageSample {
    /// Sample with only a location, for hosts that cannot report
    /// document geometry (and for tests).
    pub fn bare(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            title: String::new(),
            scroll_offset: 0.0,
            viewport_height: 0.0,
            document_height: 0.0,
            visible_text: String::new(),
        }
    }
}

/// Emitted once per detected in-page route change.
#[derive(Debug, Clone)]
pub struct NavigationEvent {
    pub sample: PageSample,
    pub observed_at: DateTime<Utc>,
}

/// Detects client-side route changes from the raw sample feed.
///
/// Mutation batches arrive much faster than routes change, so samples
/// are coalesced: after the first sample of a burst the watcher waits
/// one debounce interval, keeps only the newest sample seen in that
/// window, and compares its location against the last-seen one. A
/// rapid a → b → a flap inside one window therefore collapses to a
/// single comparison against the settled location.
pub struct NavigationWatcher {
    debounce: Duration,
}

impl NavigationWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }

    /// Start watching a sample feed. The returned subscription is the
    /// only handle to the event sequence; cancelling it (or dropping
    /// it) tears the watcher task down. A fresh feed can be watched by
    /// calling `spawn` again.
    pub fn spawn(&self, mut samples: mpsc::Receiver<PageSample>) -> NavigationSubscription {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let debounce = self.debounce;

        tokio::spawn(async move {
            let mut last_location: Option<String> = None;
            loop {
                let first = tokio::select! {
                    // The only value ever sent is `true`, and a dropped
                    // sender means the subscription is gone; either way
                    // the watch is over.
                    _ = cancel_rx.changed() => break,
                    sample = samples.recv() => match sample {
                        Some(s) => s,
                        None => break,
                    },
                };

                // Coalesce the burst down to its newest sample.
                let mut latest = first;
                let deadline = sleep(debounce);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        _ = cancel_rx.changed() => return,
                        sample = samples.recv() => match sample {
                            Some(s) => latest = s,
                            None => break,
                        },
                    }
                }

                if last_location.as_deref() == Some(latest.location.as_str()) {
                    log(
                        Level::Trace,
                        Domain::Nav,
                        "unchanged",
                        obj(&[("location", v_str(&latest.location))]),
                    );
                    continue;
                }
                last_location = Some(latest.location.clone());
                log(
                    Level::Debug,
                    Domain::Nav,
                    "route_change",
                    obj(&[("location", v_str(&latest.location))]),
                );
                let event = NavigationEvent {
                    sample: latest,
                    observed_at: Utc::now(),
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        NavigationSubscription {
            events: event_rx,
            cancel: cancel_tx,
        }
    }
}

/// Handle to a running watch. Dropping it stops the watcher task.
pub struct NavigationSubscription {
    events: mpsc::Receiver<NavigationEvent>,
    cancel: watch::Sender<bool>,
}

impl NavigationSubscription {
    pub async fn next_event(&mut self) -> Option<NavigationEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// View the subscription as a lazy, infinite stream of route
    /// changes; ends when the watcher is cancelled or the feed closes.
    pub fn into_stream(self) -> impl Stream<Item = NavigationEvent> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next_event().await.map(|event| (event, sub))
        })
    }
}
