//! Failover JSON-RPC access to Steem-protocol chains and the typed data
//! lookups built on it.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod chain;
pub mod clock;
pub mod data;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod history;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;


pub use chain::{Chain, UnknownChain};
pub use clock::{Clock, SystemClock};
pub use data::ChainData;
pub use endpoints::Endpoints;
pub use error::{GatewayError, PayloadError, TransportError};
pub use gateway::{Gateway, GatewayConfig};
pub use history::{Delegation, HistoryConfig, HistoryScan, filter_delegations};
