//! Shared run context.
//!
//! One [`Context`] is threaded through every step of a pipeline run and every
//! node of a process. It carries the engine configuration, a string-keyed
//! state bag, the object pools, the named-connection registry, the error
//! policy and the run journal. Concurrent steps inside a parallel group share
//! it; the state bag is lock-protected per call, but read-modify-write
//! sequences across calls are the caller's business (use [`Context::update`]).

use crate::config::EngineConfig;
use crate::graph::fault::Fault;
use crate::graph::pool::{ObjectPool, PoolRegistry};
use crate::graph::row::{NodeOutput, Row};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Decides whether a pipeline continues after failures. Returning `false`
/// aborts the remaining steps.
pub type ErrorPolicy = Arc<dyn Fn(&Context, &[Fault]) -> bool + Send + Sync>;

/// Named live handles (database clients, bucket handles, ...) for connectors.
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `name`, replacing any previous handle.
    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, handle: T) {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(handle));
    }

    /// Look up `name` as a `T`. `None` if missing or of another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .and_then(|h| h.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// State shared by all steps of one run.
pub struct Context {
    config: EngineConfig,
    state: RwLock<HashMap<String, Value>>,
    pools: PoolRegistry,
    connections: ConnectionRegistry,
    policy: ErrorPolicy,
    journal: Mutex<Vec<String>>,
}

impl Context {
    /// Create a context and register the default `Row` pool from `config.pool`.
    pub fn new(config: EngineConfig) -> Self {
        let pools = PoolRegistry::new();
        pools.register::<Row>(config.pool);
        let stop_on_error = config.stop_on_error;
        Self {
            config,
            state: RwLock::new(HashMap::new()),
            pools,
            connections: ConnectionRegistry::new(),
            policy: Arc::new(move |_, _| !stop_on_error),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Replace the error policy.
    pub fn with_error_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&Context, &[Fault]) -> bool + Send + Sync + 'static,
    {
        self.policy = Arc::new(policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── State bag ──

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Deserialize the value under `key`. `None` if missing or not a `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Replace the value under `key` with `f(current)` under one write lock.
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(state.get(key));
        state.insert(key.to_string(), next.clone());
        next
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    // ── Pools and connections ──

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    /// Register a pool for a custom payload type. Initialized with the others
    /// at the start of a pipeline run.
    pub fn register_pool<T: NodeOutput>(&self, config: crate::config::PoolConfig) -> Arc<ObjectPool<T>> {
        self.pools.register::<T>(config)
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    // ── Error policy and journal ──

    /// Ask the error policy whether to continue after `faults`.
    ///
    /// A panic inside the policy propagates to the caller.
    pub fn should_continue(&self, faults: &[Fault]) -> bool {
        (self.policy)(self, faults)
    }

    pub(crate) fn record_step(&self, name: &str) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
    }

    /// Names of the steps executed so far, in completion order.
    pub fn executed_steps(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn take_journal(&self) -> Vec<String> {
        std::mem::take(&mut *self.journal.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("pools", &self.pools)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}
