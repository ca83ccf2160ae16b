//! History poll scheduling.
//!
//! At most one conversation is polled at a time (the one currently
//! selected). The schedule is a pure machine: the driver asks what is due
//! and performs the fetch itself. Polling is deliberately independent of the
//! connection state; while the WebSocket is down the poll results are the
//! only way messages still arrive.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use crate::store::UserId;

/// Default delay between history fetches for the selected conversation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct ActivePoll<I> {
    conversation: UserId,
    interval: Duration,
    last_fired: I,
}

/// Fixed-interval poll schedule for the selected conversation.
///
/// Generic over the instant type, same as
/// [`crate::connection::ConnectionMachine`].
#[derive(Debug, Clone)]
pub struct PollSchedule<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    active: Option<ActivePoll<I>>,
}

impl<I> PollSchedule<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty schedule with nothing selected.
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Begin polling `conversation`, replacing any previous selection.
    ///
    /// The first poll falls due one interval after `now`; the caller is
    /// expected to do an immediate history fetch on selection.
    pub fn start(&mut self, conversation: UserId, interval: Duration, now: I) {
        self.active = Some(ActivePoll {
            conversation,
            interval,
            last_fired: now,
        });
    }

    /// Stop polling. Idempotent.
    pub fn stop(&mut self) {
        self.active = None;
    }

    /// Whether a conversation is being polled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The conversation being polled, if any.
    #[must_use]
    pub fn active_conversation(&self) -> Option<UserId> {
        self.active.as_ref().map(|a| a.conversation)
    }

    /// The conversation whose poll is due at `now`, advancing the schedule.
    ///
    /// Returns `None` when nothing is selected or the interval has not
    /// elapsed. The next poll is measured from `now`, so a delayed driver
    /// does not produce a burst of catch-up fetches.
    pub fn due(&mut self, now: I) -> Option<UserId> {
        let active = self.active.as_mut()?;
        if now - active.last_fired >= active.interval {
            active.last_fired = now;
            Some(active.conversation)
        } else {
            None
        }
    }

    /// Time until the next poll falls due, for driver sleeps. `None` when
    /// nothing is selected.
    #[must_use]
    pub fn time_until_due(&self, now: I) -> Option<Duration> {
        let active = self.active.as_ref()?;
        let elapsed = now - active.last_fired;
        Some(active.interval.saturating_sub(elapsed))
    }
}

impl<I> Default for PollSchedule<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}
