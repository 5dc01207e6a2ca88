//! Process-wide provider handles: the object store backing blob files, the
//! queue carrying function calls, and the shared key-value store.
//!
//! The core treats these as opaque collaborators; everything behind the
//! traits (wire protocol, retries, auth) belongs to the concrete client.
//! In-memory implementations back the test suite and single-node use.

use crate::call::FunctionCall;
use anyhow::Result;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Blob storage addressed by key below a configured bucket.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Call transport. `push` enqueues work (also used for chained children);
/// `pop` blocks up to the timeout; results are published for collection by
/// the caller's edge.
pub trait Queue: Send + Sync {
    fn push(&self, call: FunctionCall) -> Result<()>;
    fn pop(&self, timeout: Duration) -> Result<Option<FunctionCall>>;
    fn push_result(&self, call: FunctionCall) -> Result<()>;
}

/// Shared state access for guests; untouched by the filesystem path.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    calls: Mutex<VecDeque<FunctionCall>>,
    results: Mutex<Vec<FunctionCall>>,
    ready: Condvar,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything published so far, in publication order.
    pub fn drain_calls(&self) -> Vec<FunctionCall> {
        self.calls.lock().unwrap().drain(..).collect()
    }

    pub fn drain_results(&self) -> Vec<FunctionCall> {
        std::mem::take(&mut self.results.lock().unwrap())
    }
}

impl Queue for MemoryQueue {
    fn push(&self, call: FunctionCall) -> Result<()> {
        self.calls.lock().unwrap().push_back(call);
        self.ready.notify_one();
        Ok(())
    }

    fn pop(&self, timeout: Duration) -> Result<Option<FunctionCall>> {
        let mut calls = self.calls.lock().unwrap();
        if calls.is_empty() {
            let (guard, _) = self.ready.wait_timeout(calls, timeout).unwrap();
            calls = guard;
        }
        Ok(calls.pop_front())
    }

    fn push_result(&self, call: FunctionCall) -> Result<()> {
        self.results.lock().unwrap().push(call);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Handles shared by every executor in the process. Installed once at
/// startup, read-only afterwards.
pub struct Providers {
    pub object_store: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn Queue>,
    pub kv_store: Arc<dyn KvStore>,
}

static PROVIDERS: OnceCell<Providers> = OnceCell::new();

pub fn install(providers: Providers) -> Result<()> {
    PROVIDERS
        .set(providers)
        .map_err(|_| anyhow::anyhow!("providers already installed"))
}

pub fn installed() -> Option<&'static Providers> {
    PROVIDERS.get()
}
