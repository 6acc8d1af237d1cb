use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    Chain, Endpoints,
    error::{GatewayError, TransportError},
    transport::{HttpTransport, Transport},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upper bound for a single JSON-RPC round trip, in seconds.
    pub request_timeout_secs: u64,
    /// Upper bound for a liveness probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Attempts made by [`Gateway::call_with_retry`] before giving up.
    pub retry_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            probe_timeout_secs: 5,
            retry_attempts: 3,
        }
    }
}

/// Remote-call access to the configured chains with failover across each
/// chain's endpoint list.
#[derive(Clone)]
pub struct Gateway {
    endpoints: Arc<Endpoints>,
    transport: Arc<dyn Transport>,
    retry_attempts: u32,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("endpoints", &self.endpoints)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(endpoints: Endpoints, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            transport,
            retry_attempts: GatewayConfig::default().retry_attempts,
        }
    }

    /// Builds a gateway that talks HTTP to the given endpoints.
    pub fn http(endpoints: Endpoints, config: &GatewayConfig) -> reqwest::Result<Self> {
        let transport = HttpTransport::new(
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.probe_timeout_secs),
        )?;
        Ok(Self::new(endpoints, Arc::new(transport)).with_retry_attempts(config.retry_attempts))
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Liveness probe. Never fails; an error is reported as unreachable.
    pub async fn reachable(&self, url: &str) -> bool {
        self.transport.probe(url).await
    }

    /// Issues `method` against the first node of `chain` that is reachable
    /// and answers successfully.
    ///
    /// Every call starts again from the head of the endpoint list. A JSON-RPC
    /// error object ends the call without trying further nodes.
    pub async fn call_raw(
        &self,
        chain: Chain,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let nodes = self.endpoints.nodes(chain);
        if nodes.is_empty() {
            return Err(GatewayError::NoEndpoints { chain });
        }

        for url in nodes {
            if !self.reachable(url).await {
                let err = TransportError::Unreachable { url: url.clone() };
                tracing::warn!(%chain, %err, "skipping node");
                continue;
            }
            match self.transport.request(url, method, params.clone()).await {
                Ok(result) => {
                    tracing::trace!(%chain, %url, method, "rpc call served");
                    return Ok(result);
                }
                Err(TransportError::Call {
                    url, code, message, ..
                }) => {
                    tracing::warn!(%chain, %url, method, code, %message, "rpc call rejected");
                    return Err(GatewayError::Rpc {
                        chain,
                        method: method.to_string(),
                        code,
                        message,
                    });
                }
                Err(err) => {
                    tracing::warn!(%chain, %err, "rpc call failed; trying next node");
                }
            }
        }

        Err(GatewayError::NoAvailableNode {
            chain,
            method: method.to_string(),
        })
    }

    /// Like [`Self::call_raw`], decoding the result into `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        chain: Chain,
        method: &str,
        params: Value,
    ) -> Result<R, GatewayError> {
        let value = self.call_raw(chain, method, params).await?;
        serde_json::from_value(value).map_err(|source| GatewayError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Repeats [`Self::call`] up to the configured number of attempts.
    pub async fn call_with_retry<R: DeserializeOwned>(
        &self,
        chain: Chain,
        method: &str,
        params: Value,
    ) -> Result<R, GatewayError> {
        let mut attempt = 1;
        loop {
            match self.call(chain, method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) if attempt >= self.retry_attempts => {
                    return Err(GatewayError::RetriesExhausted {
                        method: method.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::debug!(%chain, method, attempt, %err, "retrying call");
                    attempt += 1;
                }
            }
        }
    }
}
