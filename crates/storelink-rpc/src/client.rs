//! The storefront RPC client.
//!
//! Wraps a [`RpcTransport`] with local deadlines, response envelope
//! unwrapping, and fault classification, so callers get either a JSON payload
//! or a typed [`RpcFault`].

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::fault::{FaultTranslator, RpcFault};
use crate::settings::RpcSettings;
use crate::transport::RpcTransport;

#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    settings: RpcSettings,
    translator: FaultTranslator,
}

impl RpcClient {
    #[must_use]
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            settings: RpcSettings::default(),
            translator: FaultTranslator::builtin(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RpcSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_translator(mut self, translator: FaultTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// Perform one storefront call.
    ///
    /// Applies the configured deadline, strips a `{"result": ...}` envelope
    /// when the endpoint wraps its payload, and classifies failures.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<JsonValue>,
    ) -> Result<JsonValue, RpcFault> {
        let deadline = self.settings.timeout_for(method);
        debug!(call = method, params = params.len(), "Storefront call");

        let outcome = tokio::time::timeout(deadline, self.transport.call(method, params)).await;
        match outcome {
            Err(_) => {
                let fault = RpcFault::timeout(method, deadline);
                warn!(call = method, code = fault.kind.code(), "Storefront call timed out");
                Err(fault)
            }
            Ok(Err(error)) if !error.application => {
                let fault = RpcFault::transport(method, error.message);
                warn!(
                    call = method,
                    code = fault.kind.code(),
                    error = %fault.message,
                    "Storefront call failed in transit"
                );
                Err(fault)
            }
            Ok(Err(error)) => {
                let kind = self.translator.classify(&error.message);
                let fault = RpcFault {
                    kind,
                    call: method.to_string(),
                    message: error.message,
                };
                warn!(
                    call = method,
                    code = fault.kind.code(),
                    error = %fault.message,
                    "Storefront returned a fault"
                );
                Err(fault)
            }
            Ok(Ok(value)) => Ok(unwrap_envelope(value)),
        }
    }
}

/// Some endpoints wrap their payload as `{"result": ...}`; callers always
/// want the inner value.
fn unwrap_envelope(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(JsonValue::Null)
        }
        other => other,
    }
}
