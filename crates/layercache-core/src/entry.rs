//! Per-key single-flight state machine.
//!
//! ## States
//!
//! ```text
//! Empty ──miss──▶ Pending ──ok──▶ Settled ──expired──▶ Pending
//!   ▲                │                │
//!   └────error───────┘                │
//!   └─────────────invalidate──────────┘
//! ```
//!
//! The current flight is published through an [`ArcSwapOption`], so the
//! common case (a live flight exists) never takes a lock. The mutex only
//! serializes the decision to replace the flight; it is never held while
//! `compute` runs.

use std::any::{Any, type_name};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheValue;
use crate::error::CacheError;

type Stored = Arc<dyn Any + Send + Sync>;
type Outcome = Result<Stored, CacheError>;

/// When a flight stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiration {
    At(Instant),
    Never,
}

impl Expiration {
    /// `now + duration`, or `Never` when that overflows (which includes
    /// [`NO_EXPIRATION`](crate::cache::NO_EXPIRATION)).
    pub(crate) fn after(now: Instant, duration: Duration) -> Self {
        now.checked_add(duration).map_or(Self::Never, Self::At)
    }

    fn is_live_at(&self, now: Instant) -> bool {
        match self {
            Self::At(deadline) => *deadline > now,
            Self::Never => true,
        }
    }
}

/// One computation attempt and its write-once result.
#[derive(Debug)]
pub(crate) struct Flight {
    expires_at: Expiration,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl Flight {
    /// Wait for the flight to settle, or for `cancel` to fire.
    ///
    /// Cancelling only abandons this wait; the flight and every other
    /// waiter are unaffected.
    pub(crate) async fn wait<V: CacheValue>(
        &self,
        cancel: &CancellationToken,
    ) -> Result<V, CacheError> {
        let mut outcome = self.outcome.clone();
        let settled = async move {
            match outcome.wait_for(Option::is_some).await {
                Ok(settled) => settled.clone().unwrap_or(Err(CacheError::Cancelled)),
                // Leader vanished without settling.
                Err(_) => Err(CacheError::Cancelled),
            }
        };

        let outcome = tokio::select! {
            biased;
            outcome = settled => outcome,
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
        };
        outcome.and_then(downcast::<V>)
    }
}

fn downcast<V: CacheValue>(stored: Stored) -> Result<V, CacheError> {
    stored
        .downcast_ref::<V>()
        .cloned()
        .ok_or(CacheError::TypeMismatch {
            expected: type_name::<V>(),
        })
}

/// The role a caller was assigned by [`CoalescingEntry::join`].
pub(crate) enum Join<'a> {
    Leader(Leader<'a>),
    Follower(Arc<Flight>),
}

/// Exclusive right to compute and settle the current flight.
///
/// Dropping a leader that never settled (its future was dropped mid-compute)
/// settles the flight as cancelled and empties the entry.
pub(crate) struct Leader<'a> {
    entry: &'a CoalescingEntry,
    flight: Arc<Flight>,
    sender: Option<watch::Sender<Option<Outcome>>>,
}

impl Leader<'_> {
    /// Run `compute` and settle the flight with its outcome.
    pub(crate) async fn run<V, F, Fut>(
        mut self,
        compute: F,
        cancel: CancellationToken,
    ) -> Result<V, CacheError>
    where
        V: CacheValue,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, CacheError>>,
    {
        let result = tokio::select! {
            biased;
            result = compute(cancel.clone()) => result,
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
        };

        match result {
            Ok(value) => {
                let stored: Stored = Arc::new(value.clone());
                self.settle(Ok(stored));
                Ok(value)
            }
            Err(error) => {
                self.settle(Err(error.clone()));
                Err(error)
            }
        }
    }

    fn settle(&mut self, outcome: Outcome) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        // A failed flight must not be reachable by callers arriving after
        // this point, so the entry is emptied before waiters are woken.
        if outcome.is_err() {
            self.entry.clear_if_current(&self.flight);
        }
        sender.send_replace(Some(outcome));
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::debug!("leader dropped before settling, abandoning flight");
            self.settle(Err(CacheError::Cancelled));
        }
    }
}

/// Per-key coalescing state: at most one unsettled computation at a time.
#[derive(Debug, Default)]
pub struct CoalescingEntry {
    current: ArcSwapOption<Flight>,
    swap: Mutex<()>,
}

impl CoalescingEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for this entry, computing it if no live flight exists.
    ///
    /// `now` decides liveness; `duration` is the lifetime given to a newly
    /// started flight.
    pub async fn get_or_compute<V, F, Fut>(
        &self,
        now: Instant,
        duration: Duration,
        compute: F,
        cancel: CancellationToken,
    ) -> Result<V, CacheError>
    where
        V: CacheValue,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, CacheError>>,
    {
        match self.join(now, duration) {
            Join::Leader(leader) => leader.run(compute, cancel).await,
            Join::Follower(flight) => flight.wait(&cancel).await,
        }
    }

    /// Decide whether the caller leads a new flight or follows the live one.
    pub(crate) fn join(&self, now: Instant, duration: Duration) -> Join<'_> {
        if let Some(flight) = self.live_flight(now) {
            return Join::Follower(flight);
        }

        let _swap = self.swap.lock();
        // Another caller may have started a flight while we waited.
        if let Some(flight) = self.live_flight(now) {
            return Join::Follower(flight);
        }

        let (sender, outcome) = watch::channel(None);
        let flight = Arc::new(Flight {
            expires_at: Expiration::after(now, duration),
            outcome,
        });
        self.current.store(Some(Arc::clone(&flight)));

        Join::Leader(Leader {
            entry: self,
            flight,
            sender: Some(sender),
        })
    }

    /// Forget the current flight. Callers already attached to it still
    /// observe its settlement. Returns whether a flight was present.
    pub fn invalidate(&self) -> bool {
        let _swap = self.swap.lock();
        self.current.swap(None).is_some()
    }

    /// Whether no flight is currently installed.
    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }

    fn live_flight(&self, now: Instant) -> Option<Arc<Flight>> {
        self.current
            .load_full()
            .filter(|flight| flight.expires_at.is_live_at(now))
    }

    fn clear_if_current(&self, flight: &Arc<Flight>) {
        let _swap = self.swap.lock();
        let is_current = self
            .current
            .load()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, flight));
        if is_current {
            self.current.store(None);
        }
    }
}
