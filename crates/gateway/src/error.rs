use crate::Chain;

/// Failure of a single request against a single node.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("node `{url}` is unreachable")]
    Unreachable { url: String },
    #[error("request `{method}` to `{url}` failed: {message}")]
    Request {
        url: String,
        method: String,
        message: String,
    },
    /// The node answered with a JSON-RPC error object.
    #[error("`{method}` rejected by `{url}` with code {code}: {message}")]
    Call {
        url: String,
        method: String,
        code: i32,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Every endpoint configured for the chain failed for this call.
    #[error("no {chain} node available for `{method}`")]
    NoAvailableNode { chain: Chain, method: String },
    #[error("no endpoints configured for {chain}")]
    NoEndpoints { chain: Chain },
    /// A node rejected the request itself; other nodes would too.
    #[error("{chain} node rejected `{method}` with code {code}: {message}")]
    Rpc {
        chain: Chain,
        method: String,
        code: i32,
        message: String,
    },
    #[error("failed decoding `{method}` response")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{method}` still failing after {attempts} attempts")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        #[source]
        last: Box<GatewayError>,
    },
    #[error("account `{0}` does not exist")]
    AccountNotFound(String),
    #[error("post `@{author}/{permlink}` does not exist")]
    PostNotFound { author: String, permlink: String },
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl GatewayError {
    /// Whether the failure means "cannot evaluate right now" rather than a
    /// problem with the request itself.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NoAvailableNode { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_transient(),
            _ => false,
        }
    }
}

/// A chain payload did not have the expected shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed asset `{0}`")]
    Asset(String),
    #[error("malformed number `{0}`")]
    Number(String),
    #[error("malformed timestamp `{0}`")]
    Timestamp(String),
    #[error("unrecognized reward fund payload: {0}")]
    RewardFund(String),
}
