use std::io::Write;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{Episode, UserId};

/// Notifications emitted after a claim transition has been committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimEvent {
    EpisodeClaimed { episode: Episode, user: UserId },
    EpisodeClaimDropped { episode: Episode, previous: Option<UserId> },
}

impl ClaimEvent {
    pub fn episode(&self) -> &Episode {
        match self {
            ClaimEvent::EpisodeClaimed { episode, .. } | ClaimEvent::EpisodeClaimDropped { episode, .. } => episode,
        }
    }
}

/// Receives claim events. Publishing is fire-and-forget: sinks swallow their
/// own delivery failures.
pub trait EventSink {
    fn publish(&self, event: &ClaimEvent);
}

pub type SharedSink = Arc<dyn EventSink + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &ClaimEvent) {
        let guid = &event.episode().guid;
        match event {
            ClaimEvent::EpisodeClaimed { user, .. } => info!("episode {guid} claimed by {user}"),
            ClaimEvent::EpisodeClaimDropped { previous: Some(prev), .. } => {
                info!("episode {guid} claim dropped (was {prev})")
            }
            ClaimEvent::EpisodeClaimDropped { previous: None, .. } => {
                info!("episode {guid} claim dropped (was unclaimed)")
            }
        }
    }
}

/// Fans events out to in-process subscribers.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ClaimEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClaimEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &ClaimEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
    }
}

/// Writes one JSON object per event.
pub struct JsonLinesSink<W: Write> {
    out: Mutex<W>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn publish(&self, event: &ClaimEvent) {
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(e) => {
                warn!("event serialize failed: {e}");
                return;
            }
        };
        let Ok(mut out) = self.out.lock() else { return };
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!("event write failed: {e}");
        }
    }
}

#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<SharedSink>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn publish(&self, event: &ClaimEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dropped() -> ClaimEvent {
        ClaimEvent::EpisodeClaimDropped { episode: Episode::new("ep-1", "Pilot"), previous: Some(UserId(4)) }
    }

    #[test]
    fn json_lines_are_tagged() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.publish(&dropped());
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(v["type"], "episode_claim_dropped");
        assert_eq!(v["previous"], 4);
        assert_eq!(v["episode"]["guid"], "ep-1");
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(4);
        sink.publish(&dropped());
        let mut rx = sink.subscribe();
        sink.publish(&dropped());
        assert_eq!(rx.try_recv().unwrap(), dropped());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = BroadcastSink::new(4);
        let b = BroadcastSink::new(4);
        let (mut ra, mut rb) = (a.subscribe(), b.subscribe());
        let fan = Fanout::new().with(Arc::new(a)).with(Arc::new(b)).with(Arc::new(LogSink));
        fan.publish(&dropped());
        assert!(ra.try_recv().is_ok());
        assert!(rb.try_recv().is_ok());
    }
}
