//! Timer service contract and the controller's three timer slots.

use std::time::Duration;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum TimerKind {
    /// Delay before the next reconnect attempt
    Retry,
    /// Silence after which a `ping` is sent
    Heartbeat,
    /// Silence after which the connection is declared dead
    PongTimeout,
}

/// Handle to one scheduled timer. Tokens are never reused by a scheduler.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub id: u64,
}

impl TimerToken {
    #[must_use]
    pub const fn new(kind: TimerKind, id: u64) -> Self {
        Self { kind, id }
    }
}

/// Schedules one-shot timers whose firing is reported back to the controller
/// through [`Controller::handle_timer`](crate::Controller::handle_timer).
pub trait Scheduler {
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerToken;

    /// Release `token`. A timer that has not fired yet never will.
    fn clear(&mut self, token: TimerToken);
}

/// At most one armed timer per [`TimerKind`].
#[derive(Debug, Default)]
pub(crate) struct Timers {
    retry: Option<TimerToken>,
    heartbeat: Option<TimerToken>,
    pong: Option<TimerToken>,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerToken> {
        match kind {
            TimerKind::Retry => &mut self.retry,
            TimerKind::Heartbeat => &mut self.heartbeat,
            TimerKind::PongTimeout => &mut self.pong,
        }
    }

    /// Arm `kind`, clearing whatever was armed in that slot before.
    pub(crate) fn arm<S: Scheduler>(&mut self, scheduler: &mut S, kind: TimerKind, delay: Duration) {
        self.disarm(scheduler, kind);
        let token = scheduler.schedule(kind, delay);
        *self.slot(kind) = Some(token);
    }

    pub(crate) fn disarm<S: Scheduler>(&mut self, scheduler: &mut S, kind: TimerKind) {
        if let Some(token) = self.slot(kind).take() {
            scheduler.clear(token);
        }
    }

    pub(crate) fn disarm_all<S: Scheduler>(&mut self, scheduler: &mut S) {
        self.disarm(scheduler, TimerKind::Retry);
        self.disarm(scheduler, TimerKind::Heartbeat);
        self.disarm(scheduler, TimerKind::PongTimeout);
    }

    /// Accept a fired timer. Returns `false` for tokens that are no longer armed.
    pub(crate) fn accept<S: Scheduler>(&mut self, scheduler: &mut S, token: TimerToken) -> bool {
        let slot = self.slot(token.kind);
        if *slot != Some(token) {
            return false;
        }

        *slot = None;
        scheduler.clear(token);
        true
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Retry => self.retry.is_some(),
            TimerKind::Heartbeat => self.heartbeat.is_some(),
            TimerKind::PongTimeout => self.pong.is_some(),
        }
    }
}
