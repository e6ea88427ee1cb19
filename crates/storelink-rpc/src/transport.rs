//! The transport seam between the RPC client and a concrete wire protocol.
//!
//! Production nodes speak SOAP or XML-RPC to the storefront; tests script a
//! [`MockTransport`]. Either way, the client only sees `call(method, params)`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// A transport-level failure: the call never produced a storefront response.
///
/// Application faults (the storefront answered with an error payload) are the
/// transport's responsibility to surface here too; the client classifies the
/// message into a [`crate::FaultKind`] afterwards.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// True when the storefront produced the error body itself, false for
    /// connection-level failures.
    pub application: bool,
}

impl TransportError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            application: false,
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            application: true,
        }
    }
}

/// One storefront RPC round trip.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<JsonValue>)
        -> Result<JsonValue, TransportError>;
}

type ScriptedResult = Result<JsonValue, TransportError>;

/// In-memory transport for tests.
///
/// Responses are scripted per method name. `enqueue` pushes one-shot results
/// consumed in order; `respond_always` installs a fallback returned once the
/// queue for that method is empty. Calls to a method with neither are an
/// error, so a test fails loudly on an unexpected RPC.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockInner>,
}

#[derive(Default)]
struct MockInner {
    queued: HashMap<String, VecDeque<ScriptedResult>>,
    fallback: HashMap<String, ScriptedResult>,
    calls: Vec<(String, Vec<JsonValue>)>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot successful response for `method`.
    pub fn enqueue(&self, method: &str, result: JsonValue) {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(result));
    }

    /// Queue a one-shot application fault for `method`.
    pub fn enqueue_fault(&self, method: &str, message: &str) {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(Err(TransportError::application(message)));
    }

    /// Queue a one-shot connection failure for `method`.
    pub fn enqueue_connection_error(&self, method: &str, message: &str) {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(Err(TransportError::connection(message)));
    }

    /// Respond with `result` for every call to `method` not covered by the
    /// queue.
    pub fn respond_always(&self, method: &str, result: JsonValue) {
        self.lock()
            .fallback
            .insert(method.to_string(), Ok(result));
    }

    /// Every recorded `(method, params)` pair, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Vec<JsonValue>)> {
        self.lock().calls.clone()
    }

    /// Recorded parameter lists for one method.
    #[must_use]
    pub fn calls_to(&self, method: &str) -> Vec<Vec<JsonValue>> {
        self.lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn call(
        &self,
        method: &str,
        params: Vec<JsonValue>,
    ) -> Result<JsonValue, TransportError> {
        let mut inner = self.lock();
        inner.calls.push((method.to_string(), params));
        if let Some(queue) = inner.queued.get_mut(method) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        match inner.fallback.get(method) {
            Some(result) => result.clone(),
            None => Err(TransportError::connection(format!(
                "no scripted response for {method}"
            ))),
        }
    }
}
