//! The seam between the gateway and the network.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use jsonrpsee::{
    core::{ClientError, client::ClientT, params::ArrayParams},
    http_client::{HttpClient, HttpClientBuilder},
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TransportError;

/// Performs JSON-RPC requests against one node at a time.
///
/// Implementations must not panic on network failures; a failed probe is
/// reported as `false` and a failed request as a [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bounded-timeout liveness probe.
    async fn probe(&self, url: &str) -> bool;

    /// Issues `method` with positional `params` and returns the `result`
    /// member of the response.
    async fn request(&self, url: &str, method: &str, params: Value)
    -> Result<Value, TransportError>;
}

/// JSON-RPC 2.0 over HTTP, one client per node.
#[derive(Debug)]
pub struct HttpTransport {
    probe_client: reqwest::Client,
    request_timeout: Duration,
    probe_timeout: Duration,
    clients: Mutex<HashMap<String, HttpClient>>,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> reqwest::Result<Self> {
        let probe_client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        Ok(Self {
            probe_client,
            request_timeout,
            probe_timeout,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// The client of `url`, built on first use.
    fn client(&self, url: &str) -> Result<HttpClient, ClientError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(url) {
            return Ok(client.clone());
        }
        let client = HttpClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(url)?;
        clients.insert(url.to_string(), client.clone());
        Ok(client)
    }
}

/// Spreads a JSON array over positional params. Any other value is sent as
/// the single param, `null` as none.
fn positional(params: Value) -> Result<ArrayParams, serde_json::Error> {
    let mut positional = ArrayParams::new();
    match params {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                positional.insert(item)?;
            }
        }
        other => positional.insert(other)?,
    }
    Ok(positional)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, url: &str) -> bool {
        match self
            .probe_client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(%url, %err, "node probe failed");
                false
            }
        }
    }

    async fn request(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let failed = |message: String| TransportError::Request {
            url: url.to_string(),
            method: method.to_string(),
            message,
        };
        let params = positional(params).map_err(|e| failed(e.to_string()))?;
        let client = self.client(url).map_err(|e| failed(e.to_string()))?;

        client
            .request::<Value, _>(method, params)
            .await
            .map_err(|err| match err {
                ClientError::Call(error) => TransportError::Call {
                    url: url.to_string(),
                    method: method.to_string(),
                    code: error.code(),
                    message: error.message().to_string(),
                },
                other => failed(other.to_string()),
            })
    }
}
