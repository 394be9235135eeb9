//! Object pools for payload instances.
//!
//! An [`ObjectPool`] is a stack of pre-constructed, reset instances of one
//! payload type. Hot paths borrow from it instead of allocating, and the
//! engine returns every fully consumed item. An instance is either free (on
//! the stack) or referenced (checked out), so `referenced + free == size`
//! holds between calls.
//!
//! [`PoolRegistry`] keys pools by payload type so dataflow adapters, which
//! are assembled at graph-build time, can find the pool for their item type
//! at run time.

use crate::config::PoolConfig;
use crate::error::{EngineError, Result};
use crate::graph::row::NodeOutput;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Snapshot of pool counters. Momentarily consistent, not atomic across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub size: usize,
    pub referenced: usize,
    pub free: usize,
}

struct PoolState<T> {
    initialized: bool,
    free: Vec<Box<T>>,
    size: usize,
    referenced: usize,
}

/// Thread-safe pool of reusable `T` instances.
pub struct ObjectPool<T: NodeOutput> {
    config: PoolConfig,
    state: Mutex<PoolState<T>>,
}

impl<T: NodeOutput> ObjectPool<T> {
    /// Create an uninitialized pool. Call [`initialize`](Self::initialize) before use.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                initialized: false,
                free: Vec::new(),
                size: 0,
                referenced: 0,
            }),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn type_name(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-allocate `config.size` instances.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock();
        if state.initialized {
            return Err(EngineError::PoolAlreadyInitialized {
                type_name: self.type_name(),
            });
        }
        state.free = (0..self.config.size)
            .map(|_| Box::new(T::default()))
            .collect();
        state.size = self.config.size;
        state.referenced = 0;
        state.initialized = true;
        tracing::debug!(
            "Pool<{}> initialized with {} instances",
            self.type_name(),
            self.config.size
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Check out a reset instance.
    ///
    /// An exhausted pool without auto-grow is a logic error and fails fast.
    pub fn borrow(&self) -> Result<Box<T>> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(EngineError::PoolNotInitialized {
                type_name: self.type_name(),
            });
        }
        if let Some(obj) = state.free.pop() {
            state.referenced += 1;
            return Ok(obj);
        }
        if !self.config.auto_grow {
            return Err(EngineError::PoolExhausted {
                type_name: self.type_name(),
                size: state.size,
            });
        }
        state.size += 1;
        state.referenced += 1;
        Ok(Box::new(T::default()))
    }

    /// Reset `obj` and make it available again.
    ///
    /// Returns beyond the referenced count (instances the pool never handed
    /// out) are dropped, so the pool never grows from foreign allocations.
    pub fn recycle(&self, mut obj: Box<T>) -> Result<()> {
        obj.reset();
        let mut state = self.lock();
        if !state.initialized {
            return Err(EngineError::PoolNotInitialized {
                type_name: self.type_name(),
            });
        }
        if state.referenced == 0 {
            tracing::trace!(
                "Pool<{}> dropped a foreign instance (nothing referenced)",
                self.type_name()
            );
            return Ok(());
        }
        state.referenced -= 1;
        state.free.push(obj);
        Ok(())
    }

    /// Drop all free instances and reset counts. The pool must be
    /// re-initialized before reuse.
    pub fn deallocate(&self) {
        let mut state = self.lock();
        if state.referenced > 0 {
            tracing::debug!(
                "Pool<{}> deallocated with {} instances still referenced",
                self.type_name(),
                state.referenced
            );
        }
        state.free.clear();
        state.free.shrink_to_fit();
        state.size = 0;
        state.referenced = 0;
        state.initialized = false;
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            size: state.size,
            referenced: state.referenced,
            free: state.free.len(),
        }
    }
}

/// Last path segment of a type name, for diagnostics.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

// ── Registry ──

/// Type-erased lifecycle view of a pool.
trait ManagedPool: Send + Sync {
    fn initialize(&self) -> Result<()>;
    fn deallocate(&self);
    fn is_initialized(&self) -> bool;
    fn type_name(&self) -> &'static str;
    fn stats(&self) -> PoolStats;
}

impl<T: NodeOutput> ManagedPool for ObjectPool<T> {
    fn initialize(&self) -> Result<()> {
        ObjectPool::initialize(self)
    }

    fn deallocate(&self) {
        ObjectPool::deallocate(self)
    }

    fn is_initialized(&self) -> bool {
        ObjectPool::is_initialized(self)
    }

    fn type_name(&self) -> &'static str {
        ObjectPool::type_name(self)
    }

    fn stats(&self) -> PoolStats {
        ObjectPool::stats(self)
    }
}

struct RegisteredPool {
    managed: Arc<dyn ManagedPool>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Pools keyed by payload type.
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<TypeId, RegisteredPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool for `T`. If one exists it is kept and returned.
    pub fn register<T: NodeOutput>(&self, config: PoolConfig) -> Arc<ObjectPool<T>> {
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pools
            .get(&TypeId::of::<T>())
            .and_then(|p| p.typed.clone().downcast::<ObjectPool<T>>().ok())
        {
            return existing;
        }
        let pool = Arc::new(ObjectPool::<T>::new(config));
        pools.insert(
            TypeId::of::<T>(),
            RegisteredPool {
                managed: pool.clone(),
                typed: pool.clone(),
            },
        );
        pool
    }

    /// The pool registered for `T`, if any.
    pub fn get<T: NodeOutput>(&self) -> Option<Arc<ObjectPool<T>>> {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        pools
            .get(&TypeId::of::<T>())
            .and_then(|p| p.typed.clone().downcast::<ObjectPool<T>>().ok())
    }

    /// The pool for `T` if it is registered and currently initialized.
    pub fn active<T: NodeOutput>(&self) -> Option<Arc<ObjectPool<T>>> {
        self.get::<T>().filter(|p| p.is_initialized())
    }

    /// Initialize every registered pool that is not yet initialized.
    pub fn initialize_all(&self) -> Result<()> {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        for pool in pools.values() {
            if !pool.managed.is_initialized() {
                pool.managed.initialize()?;
            }
        }
        Ok(())
    }

    pub fn deallocate_all(&self) {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        for pool in pools.values() {
            pool.managed.deallocate();
        }
    }

    /// Initialize every pool for the lifetime of the returned guard. The
    /// pools are deallocated when it drops, including during unwinding.
    pub fn session(&self) -> Result<PoolSession<'_>> {
        self.initialize_all()?;
        Ok(PoolSession { registry: self })
    }

    /// Counters of every registered pool, keyed by type name.
    pub fn stats(&self) -> Vec<(&'static str, PoolStats)> {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<_> = pools
            .values()
            .map(|p| (p.managed.type_name(), p.managed.stats()))
            .collect();
        stats.sort_by_key(|(name, _)| *name);
        stats
    }

    pub fn len(&self) -> usize {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a registry's pools initialized; see [`PoolRegistry::session`].
#[must_use = "the pools are deallocated as soon as the session drops"]
pub struct PoolSession<'a> {
    registry: &'a PoolRegistry,
}

impl Drop for PoolSession<'_> {
    fn drop(&mut self) {
        self.registry.deallocate_all();
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.stats())
            .finish()
    }
}
