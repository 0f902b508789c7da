//! Generic pool of expensive-to-create resources.
//!
//! Logic realms and render surfaces are slow to bring up, so the engine keeps
//! a few idle ones around and hands them out as [`Lease`]s. A lease is owned
//! by exactly one caller until it goes back through [`ResourcePool::release`]
//! or [`ResourcePool::discard`].

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::PoolConfig;
use crate::error::{Result, RuntimeError};

/// Creates one resource for a pool.
pub type Factory<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Tells whether a resource may still be handed out.
pub type HealthCheck<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);

/// A resource handed out by a pool.
#[derive(Debug)]
pub struct Lease<T> {
    pool: u64,
    id: u64,
    resource: T,
}

impl<T> Lease<T> {
    /// Identifier of this resource within its pool. Stable across reuse.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

/// Counters reported by [`ResourcePool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    /// Resources the factory produced over the pool's lifetime.
    pub created: u64,
}

/// Outcome of the locked part of `acquire`.
enum Next<T> {
    Reuse(Lease<T>),
    Create(u64),
    Exhausted,
}

struct PoolState<T> {
    idle: Vec<(u64, T)>,
    in_use: HashSet<u64>,
    created: u64,
    next_id: u64,
}

/// Idle/in-use pool guarded by a pool-local mutex.
///
/// The factory always runs outside the lock, so a slow factory does not stall
/// concurrent releases, and a failing one leaves the idle set untouched.
/// With a health check installed, an unhealthy resource is never parked and
/// never handed out.
pub struct ResourcePool<T> {
    name: &'static str,
    instance: u64,
    config: PoolConfig,
    factory: Factory<T>,
    healthy: Option<HealthCheck<T>>,
    state: Mutex<PoolState<T>>,
}

impl<T> ResourcePool<T> {
    pub fn new(name: &'static str, config: PoolConfig, factory: Factory<T>) -> Self {
        Self {
            name,
            instance: NEXT_POOL.fetch_add(1, Ordering::Relaxed),
            config,
            factory,
            healthy: None,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                in_use: HashSet::new(),
                created: 0,
                next_id: 0,
            }),
        }
    }

    /// Install a check run on idle resources before reuse.
    pub fn with_health_check(mut self, check: HealthCheck<T>) -> Self {
        self.healthy = Some(check);
        self
    }

    fn is_healthy(&self, resource: &T) -> bool {
        self.healthy.as_ref().map_or(true, |check| check(resource))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self) -> Result<T> {
        (self.factory)().map_err(|e| {
            tracing::warn!(pool = self.name, error = %e, "resource factory failed");
            RuntimeError::Factory {
                pool: self.name,
                message: e.to_string(),
            }
        })
    }

    /// Create `n` resources and park them as idle.
    ///
    /// Stops at the first factory failure; what was created before it stays
    /// parked.
    pub fn preload(&self, n: usize) -> Result<()> {
        for _ in 0..n {
            let resource = self.create()?;
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.created += 1;
            state.idle.push((id, resource));
        }
        tracing::debug!(pool = self.name, n, "pool preloaded");
        Ok(())
    }

    /// Take an idle resource, or create one if the policy allows.
    ///
    /// Idle resources failing the health check are dropped on the way.
    pub fn acquire(&self) -> Result<Lease<T>> {
        let mut stale = Vec::new();
        let next = {
            let mut state = self.lock();
            let mut next = None;
            while let Some((id, resource)) = state.idle.pop() {
                if self.is_healthy(&resource) {
                    state.in_use.insert(id);
                    next = Some(Next::Reuse(self.lease(id, resource)));
                    break;
                }
                stale.push(resource);
            }
            next.unwrap_or_else(|| {
                if self.config.auto_generate {
                    let id = state.next_id;
                    state.next_id += 1;
                    Next::Create(id)
                } else {
                    Next::Exhausted
                }
            })
        };
        if !stale.is_empty() {
            tracing::debug!(
                pool = self.name,
                count = stale.len(),
                "unhealthy idle resources dropped"
            );
            drop(stale);
        }
        let id = match next {
            Next::Reuse(lease) => return Ok(lease),
            Next::Exhausted => return Err(RuntimeError::PoolExhausted(self.name)),
            Next::Create(id) => id,
        };

        let resource = self.create()?;
        let mut state = self.lock();
        state.created += 1;
        state.in_use.insert(id);
        tracing::debug!(pool = self.name, lease = id, "resource created");
        Ok(self.lease(id, resource))
    }

    fn lease(&self, id: u64, resource: T) -> Lease<T> {
        Lease {
            pool: self.instance,
            id,
            resource,
        }
    }

    fn check_out(&self, state: &mut PoolState<T>, lease: &Lease<T>) -> Result<()> {
        if lease.pool == self.instance && state.in_use.remove(&lease.id) {
            return Ok(());
        }
        debug_assert!(
            false,
            "lease {} released to pool `{}` that does not hold it",
            lease.id, self.name
        );
        Err(RuntimeError::LeaseNotHeld {
            pool: self.name,
            lease: lease.id,
        })
    }

    /// Return a resource to the idle set. Past `max_idle`, or when it fails
    /// the health check, it is dropped instead.
    pub fn release(&self, lease: Lease<T>) -> Result<()> {
        let overflow = {
            let mut state = self.lock();
            self.check_out(&mut state, &lease)?;
            if state.idle.len() < self.config.max_idle && self.is_healthy(&lease.resource) {
                state.idle.push((lease.id, lease.resource));
                None
            } else {
                Some(lease.resource)
            }
        };
        // Dropped outside the lock.
        drop(overflow);
        Ok(())
    }

    /// Drop an in-use resource that must not be reused.
    pub fn discard(&self, lease: Lease<T>) -> Result<()> {
        {
            let mut state = self.lock();
            self.check_out(&mut state, &lease)?;
        }
        tracing::debug!(pool = self.name, lease = lease.id, "resource discarded");
        drop(lease);
        Ok(())
    }

    /// Drop every idle resource, returning how many went.
    pub fn drain_idle(&self) -> usize {
        let drained = std::mem::take(&mut self.lock().idle);
        tracing::info!(pool = self.name, count = drained.len(), "idle resources drained");
        drained.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            created: state.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_pool(config: PoolConfig) -> ResourcePool<usize> {
        let counter = AtomicUsize::new(0);
        ResourcePool::new(
            "test",
            config,
            Box::new(move || Ok(counter.fetch_add(1, Ordering::SeqCst))),
        )
    }

    #[test]
    fn acquire_reuses_released() {
        let pool = counting_pool(PoolConfig::default());
        let a = pool.acquire().unwrap();
        let first = *a;
        pool.release(a).unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(*b, first);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn exhausted_without_auto_generate() {
        let pool = counting_pool(PoolConfig {
            preload: 0,
            auto_generate: false,
            max_idle: 4,
        });
        assert!(matches!(
            pool.acquire(),
            Err(RuntimeError::PoolExhausted("test"))
        ));
        pool.preload(1).unwrap();
        let lease = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
        pool.release(lease).unwrap();
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn factory_failure_leaves_pool_intact() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fail.clone();
        let pool: ResourcePool<u8> = ResourcePool::new(
            "flaky",
            PoolConfig::default(),
            Box::new(move || {
                if flag.load(Ordering::SeqCst) {
                    Err(RuntimeError::RealmClosed)
                } else {
                    Ok(7)
                }
            }),
        );
        pool.preload(1).unwrap();
        fail.store(true, Ordering::SeqCst);
        let held = pool.acquire().unwrap();
        match pool.acquire() {
            Err(RuntimeError::Factory { pool: name, .. }) => assert_eq!(name, "flaky"),
            other => panic!("unexpected {:?}", other.map(|l| *l)),
        }
        assert_eq!(
            pool.stats(),
            PoolStats {
                idle: 0,
                in_use: 1,
                created: 1
            }
        );
        pool.release(held).unwrap();
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn max_idle_caps_release() {
        let pool = counting_pool(PoolConfig {
            preload: 0,
            auto_generate: true,
            max_idle: 1,
        });
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.drain_idle(), 1);
        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn discard_never_returns_to_idle() {
        let pool = counting_pool(PoolConfig::default());
        let a = pool.acquire().unwrap();
        pool.discard(a).unwrap();
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(*pool.acquire().unwrap(), 1);
    }

    #[test]
    fn unhealthy_resources_are_never_reused() {
        let broken = Arc::new(std::sync::Mutex::new(HashSet::new()));
        let flagged = broken.clone();
        let counter = AtomicUsize::new(0);
        let pool = ResourcePool::new(
            "checked",
            PoolConfig::default(),
            Box::new(move || Ok(counter.fetch_add(1, Ordering::SeqCst))),
        )
        .with_health_check(Box::new(move |n: &usize| !flagged.lock().unwrap().contains(n)));
        pool.preload(2).unwrap();

        // An idle resource that went bad is skipped.
        broken.lock().unwrap().insert(1);
        let lease = pool.acquire().unwrap();
        assert_eq!(*lease, 0);
        assert_eq!(pool.stats().idle, 0);

        // A bad resource handed back is dropped instead of parked.
        broken.lock().unwrap().insert(0);
        pool.release(lease).unwrap();
        assert_eq!(pool.stats(), PoolStats { idle: 0, in_use: 0, created: 2 });
        assert_eq!(*pool.acquire().unwrap(), 2);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn foreign_lease_is_rejected() {
        let a = counting_pool(PoolConfig::default());
        let b = counting_pool(PoolConfig::default());
        let lease = a.acquire().unwrap();
        assert!(matches!(
            b.release(lease),
            Err(RuntimeError::LeaseNotHeld { .. })
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not hold it")]
    fn foreign_lease_trips_assertion() {
        let a = counting_pool(PoolConfig::default());
        let b = counting_pool(PoolConfig::default());
        let lease = a.acquire().unwrap();
        let _ = b.release(lease);
    }

    #[test]
    fn concurrent_acquire_never_shares() {
        let pool = Arc::new(counting_pool(PoolConfig {
            preload: 0,
            auto_generate: true,
            max_idle: 2,
        }));
        pool.preload(2).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..50 {
                        let lease = pool.acquire().unwrap();
                        seen.push(lease.id());
                        pool.release(lease).unwrap();
                    }
                    seen
                })
            })
            .collect();
        let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        let mut ids: Vec<_> = held.iter().map(|l| l.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        for lease in held {
            pool.release(lease).unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.stats().in_use, 0);
    }
}
