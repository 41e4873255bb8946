//! Lifecycle gate and client retirement
//!
//! Feed handlers and mutating calls run inside the gate's read side; the
//! transition out of `Running` takes the write side, so once it returns no
//! handler is mid-flight and none will start. A closing flag is raised
//! before the write side is requested, turning new entries away so the
//! writer only waits for handlers already inside. Superseded clients are shut
//! down after a grace period on a tracked task, or held until the final
//! drain when no tokio runtime is available.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::ClientHandle;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    ShuttingDown,
    Stopped,
}

impl Lifecycle {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Proof of being inside the gate while the state is running
pub struct Gate<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

pub struct ShutdownCoordinator {
    lifecycle: AtomicU8,
    closing: AtomicBool,
    gate: RwLock<()>,
    status: watch::Sender<Lifecycle>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    pending: Mutex<Vec<Arc<ClientHandle>>>,
    retire_delay: Duration,
    shutdown_retries: u32,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(retire_delay: Duration, shutdown_retries: u32) -> Self {
        let (status, _) = watch::channel(Lifecycle::Running);
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Running as u8),
            closing: AtomicBool::new(false),
            gate: RwLock::new(()),
            status,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            pending: Mutex::new(Vec::new()),
            retire_delay,
            shutdown_retries,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Receiver that observes every lifecycle transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.status.subscribe()
    }

    /// Enter the gate; `None` once shutdown has begun
    ///
    /// Recursive: a handler may re-enter from inside a nested notification.
    #[must_use]
    pub fn enter(&self) -> Option<Gate<'_>> {
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.gate.read_recursive();
        self.is_running().then_some(Gate { _guard: guard })
    }

    /// Enter the gate without blocking; `None` if contended or not running
    #[must_use]
    pub fn try_enter(&self) -> Option<Gate<'_>> {
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.gate.try_read_recursive()?;
        self.is_running().then_some(Gate { _guard: guard })
    }

    /// Leave `Running`; only the first caller succeeds
    pub fn begin_shutdown(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Err(Error::ShutDown);
        }
        let _exclusive = self.gate.write();
        self.lifecycle
            .compare_exchange(
                Lifecycle::Running as u8,
                Lifecycle::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::ShutDown)?;
        self.status.send_replace(Lifecycle::ShuttingDown);
        info!("Balancer state shutting down");
        Ok(())
    }

    /// Schedule a superseded client for shutdown after the grace period
    pub fn retire(&self, handle: Arc<ClientHandle>) {
        if !self.is_running() {
            self.pending.lock().push(handle);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let cancel = self.cancel.clone();
                let delay = self.retire_delay;
                let retries = self.shutdown_retries;
                self.tracker.spawn_on(
                    async move {
                        if !delay.is_zero() {
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = cancel.cancelled() => {}
                            }
                        }
                        let _ = handle.shutdown(retries).await;
                    },
                    &runtime,
                );
            }
            Err(_) => {
                debug!(uri = %handle.uri(), "No runtime, deferring client shutdown");
                self.pending.lock().push(handle);
            }
        }
    }

    /// Shut down clients whose retirement was deferred
    pub async fn reap_deferred(&self) -> usize {
        let deferred = std::mem::take(&mut *self.pending.lock());
        let count = deferred.len();
        self.shutdown_all(deferred).await;
        count
    }

    /// Shut down `live` plus everything retired, then mark `Stopped`
    ///
    /// Pending grace periods are cut short.
    pub async fn finish(&self, live: Vec<Arc<ClientHandle>>) {
        self.cancel.cancel();

        let live_count = live.len();
        self.shutdown_all(live).await;
        let deferred = self.reap_deferred().await;

        self.tracker.close();
        self.tracker.wait().await;

        self.lifecycle.store(Lifecycle::Stopped as u8, Ordering::Release);
        self.status.send_replace(Lifecycle::Stopped);
        info!(clients = live_count, deferred, "Balancer state stopped");
    }

    async fn shutdown_all(&self, handles: Vec<Arc<ClientHandle>>) {
        let retries = self.shutdown_retries;
        let results = join_all(handles.iter().map(|handle| handle.shutdown(retries))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, "Some clients failed to shut down");
        }
    }
}
