//! Leading-edge throttle for a zero-argument callback.
//!
//! The first call while idle schedules the action to run once after the
//! wait; calls that arrive while a run is pending are dropped, not queued.
//! The action reads whatever state it needs when the timer fires, so a
//! dropped call loses no information.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;

use crate::Error;

/// Two-state machine behind a throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleState {
    #[default]
    Idle,
    Pending,
}

impl ThrottleState {
    /// Apply an invocation. Returns true if a run must be scheduled.
    pub fn on_invoke(&mut self) -> bool {
        match self {
            ThrottleState::Idle => {
                *self = ThrottleState::Pending;
                true
            }
            ThrottleState::Pending => false,
        }
    }

    /// Apply a timer fire.
    pub fn on_fire(&mut self) {
        *self = ThrottleState::Idle;
    }
}

type Action = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Inner {
    state: Mutex<ThrottleState>,
    wait: Duration,
    action: Action,
    runtime: Handle,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the throttle to idle when dropped, so a run that panics or a timer
/// task dropped at runtime shutdown cannot leave it pending.
struct FireGuard(Arc<Inner>);

impl Drop for FireGuard {
    fn drop(&mut self) {
        self.0.state().on_fire();
    }
}

/// Throttled wrapper around an async action.
///
/// Cloning shares the same state, so all clones throttle together.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<Inner>,
}

impl Throttle {
    /// Wrap `action` so it runs at most once per `wait`.
    ///
    /// The timer runs on the tokio runtime current at construction, so the
    /// returned throttle may be invoked from any thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRuntime` when called outside a tokio runtime.
    pub fn new<F, Fut>(wait: Duration, action: F) -> Result<Self, Error>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let action: Action = Box::new(move || action().boxed());

        Ok(Self { inner: Arc::new(Inner { state: Mutex::new(ThrottleState::Idle), wait, action, runtime }) })
    }

    /// Invoke the throttled action. Returns true if this call scheduled a run.
    pub fn invoke(&self) -> bool {
        if !self.inner.state().on_invoke() {
            tracing::trace!("throttled call dropped, run already pending");
            return false;
        }

        tracing::trace!(wait = ?self.inner.wait, "throttled run scheduled");

        let guard = FireGuard(Arc::clone(&self.inner));
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(guard.0.wait).await;
            let run = (guard.0.action)();
            drop(guard);
            run.await;
        });

        true
    }

    /// Current state, for inspection.
    pub fn state(&self) -> ThrottleState {
        *self.inner.state()
    }

    pub fn wait(&self) -> Duration {
        self.inner.wait
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("state", &self.state())
            .field("wait", &self.inner.wait)
            .finish()
    }
}
