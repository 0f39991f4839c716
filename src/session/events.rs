//! Per-session ordered event delivery.
//!
//! One buffer per session feeds two views:
//! - `drain`: destructive read for poll-style consumers
//! - `subscribe`: forward-only fan-out for streaming consumers
//!
//! Backpressure policy: `enqueue` never blocks and never drops. If nobody
//! drains a session, its buffer grows without bound until the session is
//! torn down via [`EventChannel::close`]. Each stream subscriber owns an
//! unbounded queue for the same reason, so a slow subscriber only grows its
//! own queue and never stalls the producer or its siblings.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::Stream;
use tokio::sync::mpsc;

use super::models::{Event, EventKind, SessionId};

#[derive(Default)]
struct SessionChannel {
    buffer: VecDeque<Event>,
    next_seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
    /// Set when a Done is enqueued, cleared when a new run begins.
    finished: bool,
}

#[derive(Clone, Default)]
pub struct EventChannel {
    registry: Arc<Mutex<HashMap<SessionId, SessionChannel>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SessionId, SessionChannel>> {
        // A poisoned registry still holds consistent buffers: every mutation
        // below completes before any call that could panic.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event for `session_id` and fan it out to live subscribers.
    pub fn enqueue(&self, session_id: &str, kind: EventKind, message: impl Into<String>) -> Event {
        let mut registry = self.registry();
        let channel = registry.entry(session_id.to_string()).or_default();
        let event = Event {
            session_id: session_id.to_string(),
            seq: channel.next_seq,
            kind,
            message: message.into(),
            created_at: Utc::now(),
        };
        channel.next_seq += 1;
        if kind == EventKind::Done {
            channel.finished = true;
        }
        channel.buffer.push_back(event.clone());
        channel
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        event
    }

    pub fn status(&self, session_id: &str, message: impl Into<String>) -> Event {
        self.enqueue(session_id, EventKind::Status, message)
    }

    pub fn error(&self, session_id: &str, message: impl Into<String>) -> Event {
        self.enqueue(session_id, EventKind::Error, message)
    }

    pub fn done(&self, session_id: &str) -> Event {
        self.enqueue(session_id, EventKind::Done, "")
    }

    /// Emit every line of `artifact` as its own Artifact event, in order.
    pub fn artifact_lines(&self, session_id: &str, artifact: &str) -> usize {
        let mut count = 0;
        for line in artifact.lines() {
            self.enqueue(session_id, EventKind::Artifact, line);
            count += 1;
        }
        count
    }

    /// Remove and return everything buffered for the session.
    pub fn drain(&self, session_id: &str) -> Vec<Event> {
        self.registry()
            .get_mut(session_id)
            .map(|c| c.buffer.drain(..).collect())
            .unwrap_or_default()
    }

    /// Events enqueued from now on, ending after the first Done.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry()
            .entry(session_id.to_string())
            .or_default()
            .subscribers
            .push(tx);
        Subscription { rx, finished: false }
    }

    /// Drain the buffer and read the run-finished flag under one lock, so a
    /// poller that sees `true` has also received the Done event.
    pub fn drain_with_status(&self, session_id: &str) -> (Vec<Event>, bool) {
        match self.registry().get_mut(session_id) {
            Some(c) => (c.buffer.drain(..).collect(), c.finished),
            None => (Vec::new(), false),
        }
    }

    /// Mark the start of a new run so pollers stop seeing the previous Done.
    pub fn begin_run(&self, session_id: &str) {
        self.registry()
            .entry(session_id.to_string())
            .or_default()
            .finished = false;
    }

    /// True once the latest run has emitted its Done.
    pub fn is_finished(&self, session_id: &str) -> bool {
        self.registry()
            .get(session_id)
            .map(|c| c.finished)
            .unwrap_or(false)
    }

    pub fn buffered_len(&self, session_id: &str) -> usize {
        self.registry()
            .get(session_id)
            .map(|c| c.buffer.len())
            .unwrap_or(0)
    }

    /// Drop the session's buffer. Live subscribers see their stream end.
    pub fn close(&self, session_id: &str) {
        self.registry().remove(session_id);
    }
}

/// A forward-only cursor over one session's events.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Event>,
    finished: bool,
}

impl Subscription {
    /// Next event, or `None` once a Done has been yielded or the channel closed.
    pub async fn next(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.is_done() {
            self.finished = true;
        }
        Some(event)
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}
