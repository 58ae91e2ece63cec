//! TCP accept loop and bounded worker pool.
//!
//! Each accepted connection becomes one [`Session`] running on the pool.
//! When every worker is busy, connections wait in a bounded queue; beyond
//! that they are closed at once and counted in [`PoolStats::rejected`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::audit::AuditStore;
use crate::classifier::Classifier;
use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::MllpError;
use crate::session::{Session, SessionContext};

/// Conventional port for this listener.
pub const DEFAULT_PORT: u16 = 6661;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_MAX_QUEUED: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const IDLE_POLL: Duration = Duration::from_millis(50);

// ── ListenerConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub bind_address: String,
    /// `0` binds an OS-assigned port.
    pub port: u16,
    /// Maximum concurrent sessions.
    pub workers: usize,
    /// Connections allowed to wait for a worker.
    pub max_queued: usize,
    pub max_frame_size: usize,
    /// `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// How long `run` waits for in-flight sessions after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            max_queued: DEFAULT_MAX_QUEUED,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ListenerConfig {
    /// Host and port in a form that resolves for IPv4 and IPv6 literals.
    pub fn address(&self) -> (&str, u16) {
        (self.bind_address.as_str(), self.port)
    }

    pub fn validate(&self) -> Result<(), MllpError> {
        if self.workers == 0 {
            return Err(MllpError::Config("workers must be at least 1".into()));
        }
        if self.max_frame_size == 0 {
            return Err(MllpError::Config("max_frame_size must be positive".into()));
        }
        Ok(())
    }
}

// ── WorkerPool ───────────────────────────────────────────────────

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub rejected: u64,
    pub completed: u64,
}

impl PoolStats {
    pub fn is_saturated(&self) -> bool {
        self.active >= self.capacity
    }

    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.queued == 0
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicUsize,
    queued: AtomicUsize,
    rejected: AtomicU64,
    completed: AtomicU64,
}

/// Decrements `active` and bumps `completed` even if the work panics.
struct ActiveGuard(Arc<PoolCounters>);

impl ActiveGuard {
    fn enter(counters: &Arc<PoolCounters>) -> Self {
        counters.active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counters))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fixed-capacity pool of session workers with a bounded wait queue.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    max_queued: usize,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(capacity: usize, max_queued: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_queued,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            active: self.counters.active.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
        }
    }

    /// Run `work` on a free worker, or queue it if the queue has room.
    ///
    /// Returns `Saturated` without spawning anything when both are full;
    /// `work` is dropped in that case.
    pub fn dispatch<F>(&self, work: F) -> Result<JoinHandle<()>, MllpError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                let guard = ActiveGuard::enter(&self.counters);
                Ok(tokio::spawn(async move {
                    work.await;
                    drop(guard);
                    drop(permit);
                }))
            }
            Err(TryAcquireError::NoPermits) => self.enqueue(work),
            Err(TryAcquireError::Closed) => Err(MllpError::PoolClosed),
        }
    }

    fn enqueue<F>(&self, work: F) -> Result<JoinHandle<()>, MllpError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let queued = self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if queued >= self.max_queued {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(MllpError::Saturated {
                active: self.counters.active.load(Ordering::SeqCst),
                queued,
            });
        }

        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);
        Ok(tokio::spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                counters.queued.fetch_sub(1, Ordering::SeqCst);
                return;
            };
            // Become active before leaving the queue so the pool never
            // looks idle in between.
            let guard = ActiveGuard::enter(&counters);
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            work.await;
            drop(guard);
            drop(permit);
        }))
    }

    /// Resolves once no session is running or waiting.
    pub async fn wait_idle(&self) {
        while !self.stats().is_idle() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Refuse further work. Queued sessions are dropped.
    pub fn close(&self) {
        self.permits.close();
    }
}

// ── Listener ─────────────────────────────────────────────────────

/// Owns the passive socket and dispatches sessions to the pool.
pub struct Listener {
    listener: TcpListener,
    config: ListenerConfig,
    ctx: SessionContext,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
}

impl Listener {
    /// Bind with the built-in classifier.
    pub async fn bind(
        config: ListenerConfig,
        store: Arc<dyn AuditStore>,
    ) -> Result<Self, MllpError> {
        Self::bind_with_classifier(config, store, Classifier::new()).await
    }

    pub async fn bind_with_classifier(
        config: ListenerConfig,
        store: Arc<dyn AuditStore>,
        classifier: Classifier,
    ) -> Result<Self, MllpError> {
        config.validate()?;
        let listener = TcpListener::bind(config.address()).await?;

        let ctx = SessionContext::new(store)
            .with_classifier(classifier)
            .with_max_frame_size(config.max_frame_size)
            .with_read_timeout(config.read_timeout);

        Ok(Self {
            listener,
            pool: Arc::new(WorkerPool::new(config.workers, config.max_queued)),
            config,
            ctx,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MllpError> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancel this token to stop accepting.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    /// Accept until the shutdown token is cancelled, then give in-flight
    /// sessions `shutdown_grace` to finish.
    pub async fn run(self) -> Result<(), MllpError> {
        let addr = self.local_addr()?;
        info!(
            %addr,
            workers = self.config.workers,
            max_queued = self.config.max_queued,
            "MLLP listener started"
        );

        let mut next_conn_id: u64 = 0;
        loop {
            let accept = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.listener.accept() => result,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            next_conn_id += 1;
            let span = info_span!("session", conn_id = next_conn_id, %peer);
            let session = Session::new(stream, self.ctx.clone());
            let work = async move {
                debug!("connection accepted");
                let report = session.run().await;
                debug!(phase = %report.phase, acknowledged = report.acknowledged(), "session finished");
            }
            .instrument(span);

            if let Err(e) = self.pool.dispatch(work) {
                warn!(%peer, error = %e, "closing connection without a session");
            }
        }

        info!("listener stopped accepting");
        if tokio::time::timeout(self.config.shutdown_grace, self.pool.wait_idle())
            .await
            .is_err()
        {
            let stats = self.pool.stats();
            warn!(
                active = stats.active,
                queued = stats.queued,
                "sessions still running after shutdown grace"
            );
        }
        self.pool.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn default_config() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.address(), ("0.0.0.0", 6661));
        assert!(cfg.read_timeout.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn ipv6_bind_address_resolves() {
        use std::net::ToSocketAddrs;

        let cfg = ListenerConfig {
            bind_address: "::".into(),
            ..Default::default()
        };
        let addr = cfg.address().to_socket_addrs().unwrap().next().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn zero_workers_invalid() {
        let cfg = ListenerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(MllpError::Config(_))));
    }

    #[tokio::test]
    async fn pool_runs_and_counts() {
        let pool = WorkerPool::new(2, 0);
        let handle = pool.dispatch(async {}).unwrap();
        handle.await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.completed, 1);
        assert!(stats.is_idle());
    }

    #[tokio::test]
    async fn pool_queues_then_rejects() {
        let pool = WorkerPool::new(1, 1);

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let busy = pool
            .dispatch(async move {
                let _ = release_rx.await;
            })
            .unwrap();
        assert!(pool.stats().is_saturated());

        let queued = pool.dispatch(async {}).unwrap();
        assert_eq!(pool.stats().queued, 1);

        let err = pool.dispatch(async {}).unwrap_err();
        assert!(matches!(err, MllpError::Saturated { active: 1, queued: 1 }));
        assert_eq!(pool.stats().rejected, 1);

        release_tx.send(()).unwrap();
        busy.await.unwrap();
        queued.await.unwrap();
        pool.wait_idle().await;
        let stats = pool.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn queued_work_never_looks_idle() {
        let pool = Arc::new(WorkerPool::new(1, 1));

        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.dispatch(async move {
            let _ = release_rx.await;
        })
        .unwrap();

        let (seen_tx, seen_rx) = oneshot::channel::<PoolStats>();
        let observer = Arc::clone(&pool);
        let queued = pool
            .dispatch(async move {
                let _ = seen_tx.send(observer.stats());
            })
            .unwrap();

        release_tx.send(()).unwrap();
        let seen = seen_rx.await.unwrap();
        assert_eq!(seen.active, 1);
        assert_eq!(seen.queued, 0);
        assert!(!seen.is_idle());

        queued.await.unwrap();
        assert!(pool.stats().is_idle());
    }

    #[tokio::test]
    async fn closed_pool_refuses_work() {
        let pool = WorkerPool::new(1, 1);
        pool.close();
        assert!(matches!(pool.dispatch(async {}), Err(MllpError::PoolClosed)));
    }
}
