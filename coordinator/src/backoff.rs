//! Bounded exponential backoff.
//!
//! Every polling loop in the coordinator (waiting for a proof, waiting for an eta,
//! retrying a flaky RPC) is expressed as a call to [retry]: an attempt is repeated with
//! delays doubling from [Policy::initial] up to [Policy::cap] until it succeeds, aborts,
//! or [Policy::max_wait] elapses.
//!
//! All waiting goes through the runtime [Clock], so the deterministic runtime can skip
//! ahead instead of sleeping. Dropping the returned future cancels the loop.

use commonware_runtime::Clock;
use std::{future::Future, time::Duration};
use thiserror::Error;

/// Backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Delay after the first failed attempt.
    pub initial: Duration,

    /// Largest delay between two attempts.
    pub cap: Duration,

    /// Total time (measured from the first attempt) after which [retry] gives up.
    pub max_wait: Duration,
}

impl Policy {
    pub const fn new(initial: Duration, cap: Duration, max_wait: Duration) -> Self {
        Self {
            initial,
            cap,
            max_wait,
        }
    }

    /// The default `1s → 30s` curve bounded by `max_wait`.
    pub const fn bounded(max_wait: Duration) -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), max_wait)
    }

    /// Successive delays: `initial, 2*initial, 4*initial, ...` capped at `cap`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let cap = self.cap;
        let mut next = self.initial.min(cap);
        std::iter::repeat_with(move || {
            let current = next;
            next = next.saturating_mul(2).min(cap);
            current
        })
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::bounded(Duration::from_secs(10 * 60))
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Step<T, E> {
    /// Stop retrying and return the value.
    Ready(T),
    /// Try again after the next backoff delay.
    Retry,
    /// Try again after (at least) the given delay, ignoring the curve.
    RetryAfter(Duration),
    /// Stop retrying and return the error.
    Abort(E),
}

/// Reason [retry] gave up.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Failure<E> {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("aborted: {0}")]
    Aborted(E),
}

/// Repeat `attempt` according to `policy`.
///
/// The attempt is always run at least once. A wait never extends past `max_wait`: the
/// final sleep is shortened so that one last attempt happens exactly at the deadline.
/// A wait that would end past the latest time the clock can represent times out
/// immediately.
pub async fn retry<C, T, E, F, Fut>(
    clock: &C,
    policy: &Policy,
    mut attempt: F,
) -> Result<T, Failure<E>>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Step<T, E>>,
{
    let start = clock.current();
    let mut delays = policy.delays();
    loop {
        let delay = match attempt().await {
            Step::Ready(value) => return Ok(value),
            Step::Abort(err) => return Err(Failure::Aborted(err)),
            Step::Retry => delays.next().unwrap_or(policy.cap),
            Step::RetryAfter(delay) => delay,
        };

        let waited = clock
            .current()
            .duration_since(start)
            .unwrap_or_default();
        if waited >= policy.max_wait {
            return Err(Failure::Timeout(waited));
        }
        let remaining = policy.max_wait - waited;
        let delay = delay.min(remaining);
        if clock.current().checked_add(delay).is_none() {
            return Err(Failure::Timeout(waited));
        }
        clock.sleep(delay).await;
    }
}
