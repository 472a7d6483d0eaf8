use super::session::{DeviceSession, SessionInner};
use super::state::DeviceState;
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type ListenerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ListenerFn = dyn Fn(DeviceSession, DeviceState) -> ListenerFuture + Send + Sync;

/// Callback invoked with a freshly fetched state.
///
/// Sync and async closures are both stored as a function returning a boxed
/// future, so the poll task treats them alike.
#[derive(Clone)]
pub struct StateListener(Arc<ListenerFn>);

impl StateListener {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&DeviceSession, &DeviceState) + Send + Sync + 'static,
    {
        StateListener(Arc::new(move |session: DeviceSession, state: DeviceState| -> ListenerFuture {
            f(&session, &state);
            Box::pin(async {})
        }))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(DeviceSession, DeviceState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        StateListener(Arc::new(move |session: DeviceSession, state: DeviceState| -> ListenerFuture {
            Box::pin(f(session, state))
        }))
    }

    async fn invoke(&self, session: &DeviceSession, state: &DeviceState) {
        (self.0)(session.clone(), state.clone()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
pub(super) struct PollState {
    pub(super) last_seen_counter: Option<u64>,
    pub(super) listeners: Vec<(ListenerId, StateListener)>,
}

/// `base * 2^failures`, capped at `max`.
fn backoff(base: Duration, failures: u32, max: Duration) -> Duration {
    let factor = 1u32 << failures.min(16);
    base.saturating_mul(factor).min(max)
}

impl DeviceSession {
    pub fn add_listener(&self, listener: StateListener) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.poll.lock().unwrap_or_else(|e| e.into_inner()).listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut poll = self.inner.poll.lock().unwrap_or_else(|e| e.into_inner());
        let before = poll.listeners.len();
        poll.listeners.retain(|(lid, _)| *lid != id);
        poll.listeners.len() != before
    }

    /// Last counter value that triggered a state fetch.
    pub fn last_seen_counter(&self) -> Option<u64> {
        self.inner.poll.lock().unwrap_or_else(|e| e.into_inner()).last_seen_counter
    }

    pub async fn is_polling(&self) -> bool {
        self.inner.poll_task.lock().await.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Poll the device every `interval`: read the state counter, fetch the
    /// full state when it moved, then notify listeners in registration order.
    ///
    /// Does nothing if a poll loop is already running.
    pub async fn start_polling(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidParameter("poll interval must be positive".into()));
        }
        if self.inner.engine.decoder().is_none() {
            return Err(Error::InvalidParameter("polling needs a state decoder".into()));
        }

        let mut task = self.inner.poll_task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            log::debug!(target: "pixelair::poller", "{} Already polling", self.tag());
            return Ok(());
        }

        self.inner.cancelled.store(false, Ordering::SeqCst);
        let session = Arc::downgrade(&self.inner);
        *task = Some(tokio::spawn(poll_loop(session, interval)));
        log::info!(target: "pixelair::poller", "{} Polling every {:?}", self.tag(), interval);
        Ok(())
    }

    /// Stop the poll loop and wait for it to exit. Once this returns no
    /// listener will be invoked by it again.
    pub async fn stop_polling(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let handle = self.inner.poll_task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            log::info!(target: "pixelair::poller", "{} Polling stopped", self.tag());
        }
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    async fn poll_once(&self, last_resolve: &mut Option<Instant>) -> Result<()> {
        if !self.session_state().is_usable() {
            let cooldown = self.config().resolve_cooldown();
            if last_resolve.is_some_and(|t| t.elapsed() < cooldown) {
                return Err(Error::NotResolved("waiting for resolve cooldown".into()));
            }
            *last_resolve = Some(Instant::now());
            self.resolve_ip(self.config().scan_timeout()).await?;
        }

        let timeout = self.config().request_timeout();
        let counter = self.fetch_counter(timeout).await?;
        if self.last_seen_counter() == Some(counter) {
            return Ok(());
        }

        let state = self.fetch_state(timeout).await?;
        let listeners: Vec<StateListener> = {
            let mut poll = self.inner.poll.lock().unwrap_or_else(|e| e.into_inner());
            poll.last_seen_counter = Some(counter);
            poll.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        log::debug!(target: "pixelair::poller", "{} Counter {} -> notifying {} listener(s)", self.tag(), counter, listeners.len());

        for listener in listeners {
            if self.is_cancelled() {
                break;
            }
            listener.invoke(self, &state).await;
        }
        Ok(())
    }
}

/// Holds the session only while a tick runs, so dropping every handle ends
/// the loop instead of keeping the session alive.
async fn poll_loop(session: Weak<SessionInner>, interval: Duration) {
    let mut failures: u32 = 0;
    let mut last_resolve: Option<Instant> = None;

    loop {
        let Some(inner) = session.upgrade() else { break };
        let this = DeviceSession { inner };
        if this.is_cancelled() {
            break;
        }

        let started = Instant::now();
        let period = match this.poll_once(&mut last_resolve).await {
            Ok(()) => {
                if failures > 0 {
                    log::info!(target: "pixelair::poller", "{} Recovered after {} failure(s)", this.tag(), failures);
                }
                failures = 0;
                interval
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = backoff(interval, failures, this.config().max_backoff());
                log::debug!(target: "pixelair::poller", "{} Poll failed ({}), next in {:?}", this.tag(), e, delay);
                delay
            }
        };
        drop(this);
        tokio::time::sleep(period.saturating_sub(started.elapsed())).await;
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.get_mut().take() {
            task.abort();
        }
    }
}
