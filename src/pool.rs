use std::collections::VecDeque;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::registry;
use crate::session::Session;

/// How long `close` keeps aborting idle connections before force-dropping
/// the rest.
const CLOSE_DEADLINE: Duration = Duration::from_secs(10);

/// Instrumentation counters, readable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub pending: usize,
}

struct IdleSession {
    session: Session,
    since: Instant,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct PoolInner {
    opts: Opts,
    tag: String,
    /// Idle connections, most recently used first
    idle: Mutex<VecDeque<IdleSession>>,
    idle_available: Condvar,
    total: AtomicUsize,
    pending: AtomicUsize,
    closing: AtomicBool,
    /// Coalesced refill requests; the single appender drains it
    refill_requests: ArrayQueue<()>,
    refill_signal: Mutex<bool>,
    refill_ready: Condvar,
    appender: Mutex<Option<thread::JoinHandle<()>>>,
    next_sweep: Mutex<Instant>,
}

impl PoolInner {
    fn sweep_interval(&self) -> Duration {
        (self.opts.max_idle_time / 2)
            .min(Duration::from_secs(60))
            .max(Duration::from_millis(100))
    }

    fn request_refill(&self) {
        // a pending request already covers this one
        let _ = self.refill_requests.push(());
        *lock(&self.refill_signal) = true;
        self.refill_ready.notify_one();
    }

    /// Grow until the minimum size is restored and no acquirer is waiting,
    /// bounded by the maximum size. Runs only on the appender thread.
    fn fill(&self) {
        loop {
            if self.closing.load(Ordering::Acquire) {
                return;
            }
            let total = self.total.load(Ordering::Acquire);
            let wanted = total < self.opts.min_pool_size()
                || self.pending.load(Ordering::Acquire) > 0;
            if !wanted || total >= self.opts.max_pool_size {
                return;
            }

            self.total.fetch_add(1, Ordering::AcqRel);
            match Session::connect(&self.opts) {
                Ok(session) => {
                    if self.closing.load(Ordering::Acquire) {
                        self.total.fetch_sub(1, Ordering::AcqRel);
                        session.close();
                        return;
                    }
                    lock(&self.idle).push_front(IdleSession {
                        session,
                        since: Instant::now(),
                    });
                    self.idle_available.notify_one();
                }
                Err(e) => {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    warn!(pool = %self.tag, error = %e, "could not grow pool");
                    // waiters re-request a refill and eventually time out;
                    // back off so a dead server is not hammered
                    self.idle_available.notify_all();
                    thread::sleep(Duration::from_millis(50));
                    return;
                }
            }
        }
    }

    fn discard(&self, session: Session) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        session.close();
        if !self.closing.load(Ordering::Acquire) {
            self.request_refill();
        }
    }

    /// Return a checked-out connection to the idle stack, resetting it
    /// first; broken connections are replaced instead.
    fn check_in(&self, mut session: Session) {
        if self.closing.load(Ordering::Acquire) || session.is_broken() {
            self.total.fetch_sub(1, Ordering::AcqRel);
            session.close();
            return;
        }
        if session.reset().is_err() {
            self.discard(session);
            return;
        }
        lock(&self.idle).push_front(IdleSession {
            session,
            since: Instant::now(),
        });
        self.idle_available.notify_one();
    }

    /// Release idle connections that outlived the server wait_timeout
    /// margin, or that exceeded the idle limit while the pool is above its
    /// minimum size. Walks oldest to newest.
    fn sweep(&self) {
        let min_size = self.opts.min_pool_size();
        let mut released = Vec::new();
        {
            let mut idle = lock(&self.idle);
            while let Some(oldest) = idle.back() {
                let age = oldest.since.elapsed();
                let over_wait = oldest
                    .session
                    .context()
                    .wait_timeout
                    .is_some_and(|wait| age.as_secs() + 45 >= wait);
                let over_idle = age >= self.opts.max_idle_time
                    && self.total.load(Ordering::Acquire) > min_size;
                if !(over_wait || over_idle) {
                    break;
                }
                if let Some(entry) = idle.pop_back() {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    released.push(entry.session);
                }
            }
        }

        if !released.is_empty() {
            debug!(pool = %self.tag, count = released.len(), "sweeping idle connections");
            for session in released {
                session.close();
            }
            self.request_refill();
        }
    }

    pub(crate) fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let mut next = lock(&self.next_sweep);
            if now < *next {
                return;
            }
            *next = now + self.sweep_interval();
        }
        self.sweep();
    }
}

/// A bounded connection pool: fixed minimum kept warm by an asynchronous
/// appender, validation on acquire, periodic idle sweeping, and counters
/// for instrumentation.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool and register it with the process-wide registry; the
    /// minimum connection count is filled asynchronously.
    pub fn new(opts: Opts) -> Pool {
        let tag = registry::next_pool_tag(&opts);
        let inner = Arc::new(PoolInner {
            next_sweep: Mutex::new(Instant::now() + Duration::from_secs(1)),
            idle: Mutex::new(VecDeque::with_capacity(opts.max_pool_size)),
            idle_available: Condvar::new(),
            total: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            refill_requests: ArrayQueue::new(1),
            refill_signal: Mutex::new(false),
            refill_ready: Condvar::new(),
            appender: Mutex::new(None),
            tag,
            opts,
        });

        let appender_inner = inner.clone();
        let handle = thread::Builder::new()
            .name(format!("marlin-appender-{}", inner.tag))
            .spawn(move || {
                loop {
                    {
                        let mut signaled = lock(&appender_inner.refill_signal);
                        while !*signaled && !appender_inner.closing.load(Ordering::Acquire) {
                            signaled = appender_inner
                                .refill_ready
                                .wait(signaled)
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                        }
                        *signaled = false;
                    }
                    if appender_inner.closing.load(Ordering::Acquire) {
                        return;
                    }
                    while appender_inner.refill_requests.pop().is_some() {}
                    appender_inner.fill();
                }
            });
        match handle {
            Ok(handle) => {
                *lock(&inner.appender) = Some(handle);
            }
            Err(e) => warn!(pool = %inner.tag, error = %e, "could not spawn pool appender"),
        }

        let pool = Pool { inner };
        pool.inner.request_refill();
        registry::register(&pool);
        pool
    }

    /// Fetch the pool registered for this configuration, creating it on
    /// first use.
    pub fn get_or_create(opts: &Opts) -> Pool {
        registry::pool_for(opts)
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub(crate) fn register_public(&self) -> bool {
        self.inner.opts.register_pool
    }

    pub(crate) fn config_key(&self) -> String {
        self.inner.opts.pool_key()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.inner.total.load(Ordering::Acquire),
            idle: lock(&self.inner.idle).len(),
            pending: self.inner.pending.load(Ordering::Acquire),
        }
    }

    pub(crate) fn sweep_if_due(&self) {
        self.inner.sweep_if_due();
    }

    /// Acquire a connection, waiting up to the configured connect timeout.
    pub fn get_connection(&self) -> Result<PooledConn> {
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::Connection("pool is closed".into()));
        }
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let result = self.acquire(Instant::now() + self.inner.opts.connect_timeout);
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn acquire(&self, deadline: Instant) -> Result<PooledConn> {
        let inner = &self.inner;
        loop {
            if inner.closing.load(Ordering::Acquire) {
                return Err(Error::Connection("pool is closed".into()));
            }

            let candidate = lock(&inner.idle).pop_front();
            match candidate {
                Some(IdleSession { mut session, since }) => {
                    // young connections skip the validation round-trip
                    if since.elapsed() <= inner.opts.pool_valid_min_delay
                        || session.is_valid(Session::validation_timeout())
                    {
                        session.last_used = Instant::now();
                        return Ok(PooledConn {
                            session: ManuallyDrop::new(session),
                            pool: Some(inner.clone()),
                        });
                    }

                    debug!(pool = %inner.tag, "discarding idle connection that failed validation");
                    inner.total.fetch_sub(1, Ordering::AcqRel);
                    if let Ok(handle) = session.abort_handle() {
                        handle.abort();
                    }
                    thread::spawn(move || session.close());
                    inner.request_refill();
                }
                None => {
                    inner.request_refill();
                    let guard = lock(&inner.idle);
                    let now = Instant::now();
                    if now >= deadline {
                        if guard.is_empty() {
                            return Err(Error::PoolTimeout);
                        }
                    } else if guard.is_empty() {
                        let waited = inner.idle_available.wait_timeout(guard, deadline - now);
                        drop(waited.unwrap_or_else(|poisoned| poisoned.into_inner()));
                    }
                }
            }
        }
    }

    /// Acquire with different credentials: a one-off connection that is
    /// never pooled.
    pub fn get_connection_as(&self, user: &str, password: Option<&str>) -> Result<PooledConn> {
        let opts = &self.inner.opts;
        if user == opts.user && password == opts.password.as_deref() {
            return self.get_connection();
        }

        let mut one_off = opts.clone();
        one_off.user = user.to_string();
        one_off.password = password.map(str::to_string);
        one_off.credential_provider = None;

        let session = Session::connect(&one_off)?;
        Ok(PooledConn {
            session: ManuallyDrop::new(session),
            pool: None,
        })
    }

    /// Close the pool: wake every waiter, stop the appender and sweeper,
    /// and drain the idle connections destructively. Idle connections are
    /// aborted and closed until a deadline, then force-dropped.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(pool = %inner.tag, "closing pool");

        registry::unregister(&inner.tag);

        *lock(&inner.refill_signal) = true;
        inner.refill_ready.notify_all();
        if let Some(handle) = lock(&inner.appender).take() {
            let _ = handle.join();
        }

        inner.idle_available.notify_all();

        let deadline = Instant::now() + CLOSE_DEADLINE;
        loop {
            let entry = lock(&inner.idle).pop_front();
            let Some(IdleSession { session, .. }) = entry else {
                break;
            };
            inner.total.fetch_sub(1, Ordering::AcqRel);
            if Instant::now() < deadline {
                if let Ok(handle) = session.abort_handle() {
                    handle.abort();
                }
                session.close();
            } else {
                drop(session);
            }
        }
    }
}

/// A connection checked out of the pool. Dropping it returns the
/// connection to the idle stack (after a reset) or discards it when broken.
pub struct PooledConn {
    session: ManuallyDrop<Session>,
    pool: Option<Arc<PoolInner>>,
}

impl fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("is_pooled", &self.pool.is_some())
            .finish()
    }
}

impl PooledConn {
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for PooledConn {
    type Target = Session;
    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: session is never accessed after this
        let session = unsafe { ManuallyDrop::take(&mut self.session) };
        match &self.pool {
            Some(pool) => pool.check_in(session),
            None => session.close(),
        }
    }
}
