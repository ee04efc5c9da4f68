//! In-memory collaborators for tests and local experiments.
//!
//! `MemStore` behaves like the API server for the parts the reconciler
//! relies on: objects are kept as serialized JSON, every write advances
//! `resourceVersion`, and a status write whose version does not match the
//! stored one is rejected with `Conflict`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use echo_core::{Echo, EchoError, EchoResult, EchoStore, ObjectKey, Resolver, TargetRef};
use serde_json::Value;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Interference = Box<dyn FnOnce(&mut Echo) + Send>;

#[derive(Default)]
struct MemInner {
    objects: HashMap<ObjectKey, Vec<u8>>,
    last_rv: u64,
    writes: u64,
    conflicts: u64,
    interfere: VecDeque<Interference>,
}

impl MemInner {
    fn load(&self, key: &ObjectKey) -> EchoResult<Option<Echo>> {
        match self.objects.get(key) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    /// Assign the next resourceVersion and persist the encoded object.
    fn save(&mut self, mut echo: Echo) -> EchoResult<Echo> {
        self.last_rv += 1;
        echo.metadata.resource_version = Some(self.last_rv.to_string());
        let bytes = serde_json::to_vec(&echo)?;
        self.objects.insert(echo.key(), bytes);
        Ok(echo)
    }
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an object, assigning a fresh resourceVersion.
    pub fn insert(&self, echo: Echo) -> EchoResult<Echo> {
        lock(&self.inner).save(echo)
    }

    pub fn remove(&self, key: &ObjectKey) -> bool {
        lock(&self.inner).objects.remove(key).is_some()
    }

    /// Decode the stored copy, as a fresh `get` would see it.
    pub fn snapshot(&self, key: &ObjectKey) -> EchoResult<Option<Echo>> {
        lock(&self.inner).load(key)
    }

    /// Owner-side edit: applies `f` and advances the resourceVersion.
    pub fn mutate(&self, key: &ObjectKey, f: impl FnOnce(&mut Echo)) -> EchoResult<bool> {
        let mut g = lock(&self.inner);
        let mut echo = match g.load(key)? {
            Some(echo) => echo,
            None => return Ok(false),
        };
        f(&mut echo);
        g.save(echo)?;
        Ok(true)
    }

    /// Queue a concurrent write that lands just before the next status write is
    /// checked, so that write races against it.
    pub fn interfere_once(&self, f: impl FnOnce(&mut Echo) + Send + 'static) {
        lock(&self.inner).interfere.push_back(Box::new(f));
    }

    /// Successful status writes so far.
    pub fn writes(&self) -> u64 {
        lock(&self.inner).writes
    }

    /// Status writes rejected for a stale resourceVersion.
    pub fn conflicts(&self) -> u64 {
        lock(&self.inner).conflicts
    }
}

#[async_trait]
impl EchoStore for MemStore {
    async fn get(&self, key: &ObjectKey) -> EchoResult<Option<Echo>> {
        self.snapshot(key)
    }

    async fn update_status(&self, echo: &Echo) -> EchoResult<Echo> {
        // the request body goes over the wire too
        let body: Echo = serde_json::from_slice(&serde_json::to_vec(echo)?)?;
        let key = body.key();
        let mut g = lock(&self.inner);
        if let Some(f) = g.interfere.pop_front() {
            if let Some(mut cur) = g.load(&key)? {
                f(&mut cur);
                g.save(cur)?;
            }
        }
        let mut next = match g.load(&key)? {
            Some(cur) => cur,
            None => return Err(EchoError::NotFound(format!("echo {}", key))),
        };
        if next.metadata.resource_version != body.metadata.resource_version {
            g.conflicts += 1;
            return Err(EchoError::Conflict(format!(
                "echo {}: resourceVersion {:?} is stale (current {:?})",
                key, body.metadata.resource_version, next.metadata.resource_version
            )));
        }
        next.status = body.status;
        let saved = g.save(next)?;
        g.writes += 1;
        Ok(saved)
    }
}

/// Resolver over a fixed set of targets, with injectable failures.
#[derive(Default)]
pub struct MemResolver {
    objects: Mutex<HashMap<TargetRef, Value>>,
    failures: Mutex<VecDeque<EchoError>>,
    calls: Mutex<u64>,
}

impl MemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, target: TargetRef, object: Value) {
        lock(&self.objects).insert(target, object);
    }

    pub fn remove(&self, target: &TargetRef) -> Option<Value> {
        lock(&self.objects).remove(target)
    }

    /// The next `resolve` call fails with `err`, whatever the target.
    pub fn fail_next(&self, err: EchoError) {
        lock(&self.failures).push_back(err);
    }

    pub fn calls(&self) -> u64 {
        *lock(&self.calls)
    }
}

#[async_trait]
impl Resolver for MemResolver {
    async fn resolve(&self, target: &TargetRef) -> EchoResult<Value> {
        *lock(&self.calls) += 1;
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        lock(&self.objects)
            .get(target)
            .cloned()
            .ok_or_else(|| EchoError::NotFound(format!("{}", target)))
    }
}
