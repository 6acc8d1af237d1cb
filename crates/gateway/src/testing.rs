//! In-memory doubles for driving the gateway without a network.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{clock::Clock, error::TransportError, transport::Transport};

type Handler = Arc<dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync>;

/// Scriptable [`Transport`].
///
/// Nodes are unreachable unless marked otherwise. Requests are answered by
/// the handler registered for the method; unknown methods fail.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    reachable: Mutex<HashSet<String>>,
    handlers: Mutex<HashMap<String, Handler>>,
    rejections: Mutex<HashMap<String, (i32, String)>>,
    requests: Mutex<Vec<(String, String, Value)>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("reachable", &*self.inner.reachable.lock())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reachable(self, url: &str) -> Self {
        self.inner.reachable.lock().insert(url.to_string());
        self
    }

    pub fn set_reachable(&self, url: &str, reachable: bool) {
        let mut nodes = self.inner.reachable.lock();
        if reachable {
            nodes.insert(url.to_string());
        } else {
            nodes.remove(url);
        }
    }

    /// Answers `method` with `f(url, params)`.
    pub fn on<F>(self, method: &str, f: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .insert(method.to_string(), Arc::new(f));
        self
    }

    /// Answers `method` with a JSON-RPC error object.
    pub fn reject(self, method: &str, code: i32, message: &str) -> Self {
        self.inner
            .rejections
            .lock()
            .insert(method.to_string(), (code, message.to_string()));
        self
    }

    /// Answers `method` with a fixed value.
    pub fn respond(self, method: &str, value: Value) -> Self {
        self.on(method, move |_, _| Ok(value.clone()))
    }

    /// Number of requests for `method` that reached a node.
    pub fn calls(&self, method: &str) -> usize {
        self.inner
            .requests
            .lock()
            .iter()
            .filter(|(_, m, _)| m == method)
            .count()
    }

    /// URLs that served requests, in order.
    pub fn served_by(&self) -> Vec<String> {
        self.inner
            .requests
            .lock()
            .iter()
            .map(|(url, _, _)| url.clone())
            .collect()
    }

    /// Params of every request for `method`, in order.
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.inner
            .requests
            .lock()
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(_, _, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn probe(&self, url: &str) -> bool {
        self.inner.reachable.lock().contains(url)
    }

    async fn request(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        self.inner
            .requests
            .lock()
            .push((url.to_string(), method.to_string(), params.clone()));
        if let Some((code, message)) = self.inner.rejections.lock().get(method).cloned() {
            return Err(TransportError::Call {
                url: url.to_string(),
                method: method.to_string(),
                code,
                message,
            });
        }
        let handler = self.inner.handlers.lock().get(method).cloned();
        let failed = |message: String| TransportError::Request {
            url: url.to_string(),
            method: method.to_string(),
            message,
        };
        match handler {
            Some(handler) => handler(url, &params).map_err(failed),
            None => Err(failed("no handler".to_string())),
        }
    }
}

/// A [`Clock`] that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now.as_millisecond())),
        }
    }

    pub fn advance(&self, by: SignedDuration) {
        self.now
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_millisecond(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millisecond(self.now.load(Ordering::SeqCst))
            .unwrap_or(Timestamp::UNIX_EPOCH)
    }
}
