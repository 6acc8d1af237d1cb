//! Hands votes to a signing sidecar that owns transaction construction.

use std::time::Duration;

use async_trait::async_trait;
use curator::collaborators::{BroadcastError, VoteBroadcaster, VoteRequest};
use serde::{Deserialize, Serialize};
use url::Url;

/// Body posted to `<signer_url>/vote`. The sidecar is expected to listen on
/// a local interface since the body carries the posting key.
#[derive(Serialize)]
struct SignRequest<'a> {
    chain: &'a str,
    voter: &'a str,
    author: &'a str,
    permlink: &'a str,
    weight: i16,
    posting_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SignReply {
    Broadcast { transaction_id: String },
    Rejected { reason: String },
    SigningFailed { reason: String },
}

#[derive(Debug)]
pub(crate) struct SidecarBroadcaster {
    client: reqwest::Client,
    endpoint: Option<Url>,
}

impl SidecarBroadcaster {
    pub(crate) fn new(signer_url: Option<&Url>) -> eyre::Result<Self> {
        let endpoint = signer_url.map(|url| url.join("vote")).transpose()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl VoteBroadcaster for SidecarBroadcaster {
    async fn cast_vote(&self, request: &VoteRequest) -> Result<(), BroadcastError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(BroadcastError::Transport(
                "no signer_url configured for broadcasting".to_string(),
            ));
        };
        let body = SignRequest {
            chain: request.chain.as_str(),
            voter: &request.voter,
            author: &request.author,
            permlink: &request.permlink,
            weight: request.weight,
            posting_key: &request.posting_key,
        };
        let reply: SignReply = self
            .client
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BroadcastError::Transport(err.to_string()))?
            .json()
            .await
            .map_err(|err| BroadcastError::Transport(err.to_string()))?;

        match reply {
            SignReply::Broadcast { transaction_id } => {
                tracing::info!(
                    chain = %request.chain,
                    author = %request.author,
                    permlink = %request.permlink,
                    %transaction_id,
                    "vote transaction accepted"
                );
                Ok(())
            }
            SignReply::Rejected { reason } => Err(BroadcastError::Rejected(reason)),
            SignReply::SigningFailed { reason } => Err(BroadcastError::Signing(reason)),
        }
    }
}
