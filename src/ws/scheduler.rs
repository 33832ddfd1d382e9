use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::Event;
use crate::timer::{Scheduler, TimerKind, TimerToken};

/// [`Scheduler`] backed by `tokio::time::sleep`.
///
/// Every timer is a child of one root token, so cancelling the root (when the owning
/// [`Client`](super::Client) shuts down) stops every pending timer at once.
pub struct TokioScheduler {
    events: mpsc::UnboundedSender<Event>,
    root: CancellationToken,
    pending: HashMap<TimerToken, CancellationToken>,
    next_id: u64,
}

impl TokioScheduler {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>, root: CancellationToken) -> Self {
        Self {
            events,
            root,
            pending: HashMap::new(),
            next_id: 0,
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerToken {
        self.next_id += 1;
        let token = TimerToken::new(kind, self.next_id);

        let cancel = self.root.child_token();
        let guard = cancel.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = guard.cancelled() => {}
                () = sleep(delay) => {
                    _ = events.send(Event::Timer(token));
                }
            }
        });

        self.pending.insert(token, cancel);
        token
    }

    fn clear(&mut self, token: TimerToken) {
        if let Some(cancel) = self.pending.remove(&token) {
            cancel.cancel();
        }
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
