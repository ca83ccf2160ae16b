//! Agent request correlation.
//!
//! The agent WebSocket carries no correlation IDs: commands go out tagged
//! only with a timestamp and responses come back bare. The server processes
//! commands in order, so responses are matched to requests FIFO. Each
//! request resolves exactly once, to the oldest pending slot, whether the
//! resolution is a response, a server error, or a timeout.
//!
//! A response that arrives after its request has already timed out finds the
//! queue empty (or a younger request at the front that it does not belong
//! to); the machine can only discard it, which is the accepted cost of the
//! uncorrelated protocol.

use std::{
    collections::VecDeque,
    ops::Sub,
    time::{Duration, Instant},
};

use crate::error::AgentError;

/// Default time a request may wait for its response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-side identity of an agent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// A successful agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    /// Reply text.
    pub text: String,
    /// Names of tools the agent invoked.
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone)]
struct PendingRequest<I> {
    id: RequestId,
    submitted_at: I,
}

/// FIFO correlator for agent commands.
///
/// Pure machine: the driver submits on send, feeds frames in as they
/// arrive, and ticks for timeouts.
#[derive(Debug, Clone)]
pub struct AgentCorrelator<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    pending: VecDeque<PendingRequest<I>>,
    next_id: u64,
    timeout: Duration,
}

/// One resolved request: its ID and the outcome.
pub type Resolution = (RequestId, Result<AgentReply, AgentError>);

impl<I> AgentCorrelator<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty correlator with the given response timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            next_id: 0,
            timeout,
        }
    }

    /// Register a command sent at `now`. Returns its client-side ID.
    pub fn submit(&mut self, now: I) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.pending.push_back(PendingRequest {
            id,
            submitted_at: now,
        });
        id
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Match an incoming response to the oldest pending request.
    ///
    /// `None` means no request was pending; the response is late and gets
    /// discarded.
    pub fn resolve_response(&mut self, reply: AgentReply) -> Option<Resolution> {
        let request = self.pending.pop_front()?;
        Some((request.id, Ok(reply)))
    }

    /// Match an incoming server error to the oldest pending request.
    pub fn resolve_error(&mut self, message: String) -> Option<Resolution> {
        let request = self.pending.pop_front()?;
        Some((request.id, Err(AgentError::Remote(message))))
    }

    /// Fail every request whose timeout elapsed by `now`.
    ///
    /// Requests age in submission order, so expired entries always sit at
    /// the front of the queue.
    pub fn tick(&mut self, now: I) -> Vec<Resolution> {
        let mut expired = Vec::new();
        while let Some(front) = self.pending.front() {
            if now - front.submitted_at >= self.timeout {
                if let Some(request) = self.pending.pop_front() {
                    expired.push((request.id, Err(AgentError::Timeout)));
                }
            } else {
                break;
            }
        }
        expired
    }

    /// Withdraw a request (e.g. the send failed after submission).
    /// Returns whether it was still pending.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|r| r.id != id);
        before != self.pending.len()
    }
}

impl<I> Default for AgentCorrelator<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TIMEOUT)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reply(text: &str) -> AgentReply {
        AgentReply {
            text: text.into(),
            tools_used: vec![],
        }
    }

    #[test]
    fn responses_resolve_in_submission_order() {
        let t0 = Instant::now();
        let mut correlator: AgentCorrelator = AgentCorrelator::default();

        let first = correlator.submit(t0);
        let second = correlator.submit(t0);

        let (id, outcome) = correlator.resolve_response(reply("a")).unwrap();
        assert_eq!(id, first);
        assert_eq!(outcome.unwrap().text, "a");

        let (id, _) = correlator.resolve_response(reply("b")).unwrap();
        assert_eq!(id, second);
    }

    #[test]
    fn late_response_is_discarded() {
        let mut correlator: AgentCorrelator = AgentCorrelator::default();
        assert!(correlator.resolve_response(reply("orphan")).is_none());
    }

    #[test]
    fn server_error_resolves_oldest() {
        let t0 = Instant::now();
        let mut correlator: AgentCorrelator = AgentCorrelator::default();
        let id = correlator.submit(t0);

        let (resolved, outcome) = correlator.resolve_error("boom".into()).unwrap();
        assert_eq!(resolved, id);
        assert_eq!(outcome, Err(AgentError::Remote("boom".into())));
    }

    #[test]
    fn timeout_expires_from_the_front() {
        let t0 = Instant::now();
        let mut correlator: AgentCorrelator = AgentCorrelator::new(Duration::from_secs(30));

        let old = correlator.submit(t0);
        let young = correlator.submit(t0 + Duration::from_secs(20));

        let expired = correlator.tick(t0 + Duration::from_secs(31));
        assert_eq!(expired, vec![(old, Err(AgentError::Timeout))]);
        assert_eq!(correlator.pending_len(), 1);

        // The younger request still resolves normally.
        let (id, _) = correlator.resolve_response(reply("late but fine")).unwrap();
        assert_eq!(id, young);
    }

    #[test]
    fn timeout_then_response_resolves_next_request() {
        // A response for a timed-out request must not leak into an older
        // slot: the timed-out slot is gone, so FIFO hands it to the next.
        let t0 = Instant::now();
        let mut correlator: AgentCorrelator = AgentCorrelator::new(Duration::from_secs(30));

        correlator.submit(t0);
        let second = correlator.submit(t0 + Duration::from_secs(25));
        correlator.tick(t0 + Duration::from_secs(31));

        let (id, _) = correlator.resolve_response(reply("for second")).unwrap();
        assert_eq!(id, second);
    }

    #[test]
    fn cancel_removes_pending_request() {
        let t0 = Instant::now();
        let mut correlator: AgentCorrelator = AgentCorrelator::default();
        let id = correlator.submit(t0);

        assert!(correlator.cancel(id));
        assert!(!correlator.cancel(id));
        assert!(correlator.resolve_response(reply("x")).is_none());
    }
}
