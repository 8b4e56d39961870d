//! Process-wide pool registry, the shared sweeper scheduler, and the
//! per-host cache of server limits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::opts::Opts;
use crate::pool::Pool;

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RegisteredPool {
    pool: Pool,
    /// Listed by [`pools`] for instrumentation
    public: bool,
    config_key: String,
}

struct SchedulerHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: thread::JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    pools: HashMap<String, RegisteredPool>,
    scheduler: Option<SchedulerHandle>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
static POOL_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

pub(crate) fn next_pool_tag(opts: &Opts) -> String {
    let n = POOL_COUNTER.fetch_add(1, Ordering::AcqRel);
    match &opts.pool_name {
        Some(name) => format!("{name}-{n}"),
        None => format!("marlin-pool-{n}"),
    }
}

/// All sweeping runs on one shared scheduler thread, started with the
/// first pool and stopped when the last pool unregisters.
fn ensure_scheduler(reg: &mut Registry) {
    if reg.scheduler.is_some() {
        return;
    }

    let stop = Arc::new((Mutex::new(false), Condvar::new()));
    let stop_for_thread = stop.clone();
    let spawned = thread::Builder::new()
        .name("marlin-pool-sweeper".to_string())
        .spawn(move || {
            let (flag, condvar) = &*stop_for_thread;
            loop {
                {
                    let guard = lock(flag);
                    if *guard {
                        return;
                    }
                    let (guard, _) = condvar
                        .wait_timeout(guard, Duration::from_secs(1))
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if *guard {
                        return;
                    }
                }

                let pools: Vec<Pool> = lock(registry())
                    .pools
                    .values()
                    .map(|entry| entry.pool.clone())
                    .collect();
                for pool in pools {
                    pool.sweep_if_due();
                }
            }
        });

    if let Ok(thread) = spawned {
        reg.scheduler = Some(SchedulerHandle { stop, thread });
    }
}

pub(crate) fn register(pool: &Pool) {
    let mut reg = lock(registry());
    ensure_scheduler(&mut reg);
    reg.pools.insert(
        pool.tag().to_string(),
        RegisteredPool {
            pool: pool.clone(),
            public: pool.register_public(),
            config_key: pool.config_key(),
        },
    );
    debug!(pool = pool.tag(), "pool registered");
}

pub(crate) fn unregister(tag: &str) {
    let handle = {
        let mut reg = lock(registry());
        reg.pools.remove(tag);
        if reg.pools.is_empty() {
            reg.scheduler.take()
        } else {
            None
        }
    };

    // the last pool's close shuts the shared scheduler down
    if let Some(SchedulerHandle { stop, thread }) = handle {
        let (flag, condvar) = &*stop;
        *lock(flag) = true;
        condvar.notify_all();
        let _ = thread.join();
    }
    debug!(pool = tag, "pool unregistered");
}

/// Pool shared per configuration identity.
pub(crate) fn pool_for(opts: &Opts) -> Pool {
    let key = opts.pool_key();
    {
        let reg = lock(registry());
        if let Some(entry) = reg.pools.values().find(|entry| entry.config_key == key) {
            return entry.pool.clone();
        }
    }
    // benign race: simultaneous first users may build two pools; both are
    // registered and swept, later lookups return one of them
    Pool::new(opts.clone())
}

/// Registered pools with instrumentation enabled.
pub fn pools() -> Vec<Pool> {
    lock(registry())
        .pools
        .values()
        .filter(|entry| entry.public)
        .map(|entry| entry.pool.clone())
        .collect()
}

// ----------------------------------------------------------------------------
// per-host server limits
// ----------------------------------------------------------------------------

static HOST_LIMITS: OnceLock<Mutex<HashMap<String, (u64, Option<u64>)>>> = OnceLock::new();

fn host_limits_map() -> &'static Mutex<HashMap<String, (u64, Option<u64>)>> {
    HOST_LIMITS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn host_key(opts: &Opts) -> String {
    match &opts.socket {
        Some(path) => format!("unix:{path}"),
        None => format!("{}:{}", opts.host, opts.port),
    }
}

/// `(max_allowed_packet, wait_timeout)` recorded by the last successful
/// handshake against this host.
pub(crate) fn host_limits(key: &str) -> Option<(u64, Option<u64>)> {
    lock(host_limits_map()).get(key).copied()
}

pub(crate) fn store_host_limits(key: &str, max_allowed_packet: u64, wait_timeout: Option<u64>) {
    lock(host_limits_map()).insert(key.to_string(), (max_allowed_packet, wait_timeout));
}
