use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{Proxy, Result};

/// How long `acquire` sleeps between scans when every proxy is busy.
const ACQUIRE_RETRY: Duration = Duration::from_millis(100);

/// Grace period after cancellation before remaining tasks are aborted.
const FORCE_GRACE: Duration = Duration::from_secs(5);

struct Slot {
    proxy: Proxy,
    busy: bool,
}

/// Busy/free flags for a fixed set of proxies, mutated only under its lock.
pub struct ProxyLedger {
    slots: Mutex<Vec<Slot>>,
}

impl ProxyLedger {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        Self {
            slots: Mutex::new(
                proxies
                    .into_iter()
                    .map(|proxy| Slot { proxy, busy: false })
                    .collect(),
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn busy_count(&self) -> usize {
        self.lock().iter().filter(|s| s.busy).count()
    }

    pub fn proxies(&self) -> Vec<Proxy> {
        self.lock().iter().map(|s| s.proxy.clone()).collect()
    }

    /// Mark the first free proxy busy and return its slot, if any.
    pub fn try_acquire(&self) -> Option<(usize, Proxy)> {
        let mut slots = self.lock();
        let (index, slot) = slots.iter_mut().enumerate().find(|(_, s)| !s.busy)?;
        slot.busy = true;
        Some((index, slot.proxy.clone()))
    }

    /// Wait until a proxy frees up. Waiters poll rather than queue, so there
    /// is no FIFO ordering between them.
    pub async fn acquire(self: &Arc<Self>) -> ProxyLease {
        loop {
            if let Some((index, proxy)) = self.try_acquire() {
                return ProxyLease {
                    ledger: Arc::clone(self),
                    index,
                    proxy,
                };
            }
            tokio::time::sleep(ACQUIRE_RETRY).await;
        }
    }

    pub fn release(&self, index: usize) {
        if let Some(slot) = self.lock().get_mut(index) {
            slot.busy = false;
        }
    }
}

/// A proxy held by one worker. Released on drop, whether the task
/// succeeded, failed or panicked.
pub struct ProxyLease {
    ledger: Arc<ProxyLedger>,
    index: usize,
    proxy: Proxy,
}

impl ProxyLease {
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        self.ledger.release(self.index);
    }
}

#[derive(Debug, Clone, Copy)]
enum TaskOutcome {
    Completed,
    Failed,
}

/// What happened to the units of work submitted to a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl PoolReport {
    fn record(&mut self, label: &str, joined: std::result::Result<TaskOutcome, JoinError>) {
        match joined {
            Ok(TaskOutcome::Completed) => self.completed += 1,
            Ok(TaskOutcome::Failed) => self.failed += 1,
            Err(e) if e.is_cancelled() => self.cancelled += 1,
            Err(e) => {
                error!(pool = %label, error = %e, "Worker panicked");
                self.failed += 1;
            }
        }
    }
}

/// Runs units of work across a set of egress proxies, one proxy per running
/// unit. With no usable proxies it degrades to a single direct worker.
///
/// A pool is scoped to one pipeline run: open it, submit, then `shutdown`.
pub struct ProxyPool {
    label: String,
    ledger: Option<Arc<ProxyLedger>>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    tasks: JoinSet<TaskOutcome>,
    cancel: CancellationToken,
}

impl ProxyPool {
    /// Open a pool, dropping proxies with a bad port or a host that does not
    /// resolve.
    pub async fn open(label: impl Into<String>, proxies: &[Proxy], cancel: CancellationToken) -> Self {
        let label = label.into();
        let mut usable = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            if !proxy.is_well_formed() {
                warn!(pool = %label, proxy = %proxy, "Skipping proxy with invalid address");
                continue;
            }
            match tokio::net::lookup_host((proxy.ip.trim(), proxy.port)).await {
                Ok(mut addrs) => {
                    if addrs.next().is_some() {
                        usable.push(proxy.clone())
                    } else {
                        warn!(pool = %label, proxy = %proxy, "Skipping proxy, host has no addresses")
                    }
                }
                Err(e) => warn!(pool = %label, proxy = %proxy, error = %e, "Skipping unresolvable proxy"),
            }
        }
        Self::with_proxies(label, usable, cancel)
    }

    /// Open a pool over proxies that are already known to be usable.
    pub fn with_proxies(label: impl Into<String>, proxies: Vec<Proxy>, cancel: CancellationToken) -> Self {
        let label = label.into();
        let (ledger, worker_count) = if proxies.is_empty() {
            info!(pool = %label, "No proxies configured, running a single direct worker");
            (None, 1)
        } else {
            let count = proxies.len();
            info!(pool = %label, proxies = count, "Proxy pool opened");
            (Some(Arc::new(ProxyLedger::new(proxies))), count)
        };

        Self {
            label,
            ledger,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            tasks: JoinSet::new(),
            cancel,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_direct(&self) -> bool {
        self.ledger.is_none()
    }

    pub fn busy_count(&self) -> usize {
        self.ledger.as_ref().map_or(0, |l| l.busy_count())
    }

    /// Proxies that survived validation; empty in direct mode.
    pub fn proxies(&self) -> Vec<Proxy> {
        self.ledger.as_ref().map(|l| l.proxies()).unwrap_or_default()
    }

    /// Token cancelled when the pool is forced down; hand it to fetchers so
    /// their backoff sleeps end early.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue a unit of work. `task` receives the proxy it must use (`None`
    /// in direct mode). Failures are logged here and never reach siblings.
    pub fn submit<F, Fut>(&mut self, unit: impl Into<String>, task: F)
    where
        F: FnOnce(Option<Proxy>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let unit = unit.into();
        let label = self.label.clone();
        let ledger = self.ledger.clone();
        let workers = Arc::clone(&self.workers);

        self.tasks.spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return TaskOutcome::Failed;
            };
            let lease = match &ledger {
                Some(ledger) => Some(ledger.acquire().await),
                None => None,
            };
            let proxy = lease.as_ref().map(|l| l.proxy().clone());
            let proxy_addr = proxy.as_ref().map(Proxy::address);

            debug!(pool = %label, %unit, proxy = ?proxy_addr, "Unit started");
            match task(proxy).await {
                Ok(()) => TaskOutcome::Completed,
                Err(e) => {
                    error!(pool = %label, %unit, proxy = ?proxy_addr, error = %e, "Unit failed");
                    TaskOutcome::Failed
                }
            }
        });
    }

    /// Wait up to `timeout` for queued work to finish, then cancel what is
    /// left and abort anything still running after a short grace period.
    pub async fn shutdown(mut self, timeout: Duration) -> PoolReport {
        let mut report = PoolReport::default();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(joined)) => report.record(&self.label, joined),
                Ok(None) => return self.finish(report),
                Err(_) => break,
            }
        }

        warn!(
            pool = %self.label,
            remaining = self.tasks.len(),
            "Pool did not drain in time, cancelling remaining work"
        );
        self.cancel.cancel();

        let grace = tokio::time::Instant::now() + FORCE_GRACE;
        loop {
            match tokio::time::timeout_at(grace, self.tasks.join_next()).await {
                Ok(Some(joined)) => report.record(&self.label, joined),
                Ok(None) => return self.finish(report),
                Err(_) => break,
            }
        }

        self.tasks.abort_all();
        while let Some(joined) = self.tasks.join_next().await {
            report.record(&self.label, joined);
        }
        self.finish(report)
    }

    fn finish(&self, report: PoolReport) -> PoolReport {
        info!(
            pool = %self.label,
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            "Pool shut down"
        );
        report
    }
}
