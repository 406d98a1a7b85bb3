use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::loader::load_policies;
use crate::authz::session::SessionHandle;
use crate::authz::store::PolicyStore;
use crate::storage::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloaderState {
    Idle,
    Reloading,
}

/// Counts of what a successful reload put in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub roles: usize,
    pub tuples: usize,
    pub dropped_entries: usize,
    pub dropped_records: usize,
}

/// Re-fetches the policy set and swaps it into the `PolicyStore`.
pub struct AutoReloader {
    policies: Arc<PolicyStore>,
    records: Arc<dyn RecordStore>,
    session: SessionHandle,
    page_size: u32,
    in_flight: AtomicUsize,
    stopped: AtomicBool,
}

/// Returns the reloader to `Idle` however the reload ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }

    /// Enter only if nothing else is reloading.
    fn enter_if_idle(counter: &'a AtomicUsize) -> Option<Self> {
        counter
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AutoReloader {
    pub fn new(
        policies: Arc<PolicyStore>,
        records: Arc<dyn RecordStore>,
        session: SessionHandle,
        page_size: u32,
    ) -> Self {
        Self {
            policies,
            records,
            session,
            page_size,
            in_flight: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ReloaderState {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            ReloaderState::Reloading
        } else {
            ReloaderState::Idle
        }
    }

    /// Load and swap in a fresh policy set.
    ///
    /// On error the live policy set is left exactly as it was.
    pub async fn reload(&self) -> Result<ReloadOutcome, AuthzError> {
        let _guard = InFlight::enter(&self.in_flight);
        self.load_and_swap().await
    }

    async fn load_and_swap(&self) -> Result<ReloadOutcome, AuthzError> {
        let credential = self.session.current();
        let set = load_policies(self.records.as_ref(), &credential, self.page_size).await?;
        let outcome = ReloadOutcome {
            roles: set.roles,
            tuples: set.tuples.tuple_count(),
            dropped_entries: set.dropped_entries,
            dropped_records: set.dropped_records,
        };
        self.policies.replace(set);
        Ok(outcome)
    }

    /// Timer entry point.
    ///
    /// Skips the tick when stopped or when another reload is still running.
    /// Failures are logged and swallowed.
    pub async fn tick(&self) -> Option<Result<ReloadOutcome, AuthzError>> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        let Some(_guard) = InFlight::enter_if_idle(&self.in_flight) else {
            tracing::debug!("Policy reload still in flight, skipping tick");
            return None;
        };

        let result = self.load_and_swap().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Policy reload failed, keeping last known-good policies");
        }
        Some(result)
    }

    /// Stop accepting ticks. A reload already running is left to finish.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
