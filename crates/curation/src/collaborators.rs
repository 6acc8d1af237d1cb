//! Capabilities the curator consumes from its host: settings, subscribed
//! users, vote broadcasting and notifications.

use async_trait::async_trait;
use curator_gateway::Chain;
use serde::{Deserialize, Serialize};

use crate::post_ref::PostRef;

/// Failure reported by a settings or user store.
#[derive(Debug, thiserror::Error)]
#[error("{context}: {message}")]
pub struct StoreError {
    pub context: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(context: &'static str, message: impl ToString) -> Self {
        Self {
            context,
            message: message.to_string(),
        }
    }
}

/// Key/value settings, optionally scoped to a chain.
#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn get(&self, key: &str, chain: Option<Chain>) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, chain: Option<Chain>) -> Result<bool, StoreError>;
}

/// How a subscribed author wants their posts voted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserVoteConfig {
    /// Vote weight in percent, `-100.0..=100.0`.
    pub vote_weight: f64,
    /// Minutes after creation to vote at. Absent means optimal timing.
    #[serde(default)]
    pub vote_delay: Option<f64>,
    #[serde(default)]
    pub use_optimal_time: bool,
    #[serde(default = "default_max_votes_per_day")]
    pub max_votes_per_day: u32,
}

fn default_max_votes_per_day() -> u32 {
    3
}

impl UserVoteConfig {
    pub fn uses_optimal_time(&self) -> bool {
        self.use_optimal_time || self.vote_delay.is_none()
    }

    /// Weight on the chain's 10000 = 100% scale.
    pub fn weight_bps(&self) -> i16 {
        (self.vote_weight.clamp(-100.0, 100.0) * 100.0).round() as i16
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Accounts monitored on `chain`.
    async fn usernames(&self, chain: Chain) -> Result<Vec<String>, StoreError>;

    /// Vote configuration of the author of `post`, if subscribed.
    async fn config_for_post(&self, post: &PostRef) -> Result<Option<UserVoteConfig>, StoreError>;
}

/// The curating account of one chain.
#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct CuratorInfo {
    pub username: String,
    #[debug(skip)]
    pub posting_key: String,
    #[debug(skip)]
    pub active_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    #[error("no curator account configured for {0}")]
    MissingUsername(Chain),
    #[error("no posting key configured for {0}")]
    MissingPostingKey(Chain),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The curating account of `chain`, read from `<chain>_curator`.
pub async fn curator_username(
    settings: &dyn SettingsStore,
    chain: Chain,
) -> Result<String, CuratorError> {
    let username = non_empty(settings.get(&format!("{chain}_curator"), Some(chain)).await?)
        .ok_or(CuratorError::MissingUsername(chain))?;
    Ok(username.trim().to_lowercase())
}

impl CuratorInfo {
    /// Reads `<chain>_curator`, `<chain>_curator_posting_key` and, on
    /// Steem, `steem_active_key`.
    pub async fn load(settings: &dyn SettingsStore, chain: Chain) -> Result<Self, CuratorError> {
        let username = curator_username(settings, chain).await?;
        let posting_key = non_empty(
            settings
                .get(&format!("{chain}_curator_posting_key"), Some(chain))
                .await?,
        )
        .ok_or(CuratorError::MissingPostingKey(chain))?;
        let active_key = match chain {
            Chain::Steem => non_empty(settings.get("steem_active_key", Some(chain)).await?),
            Chain::Hive => None,
        };
        Ok(Self {
            username,
            posting_key,
            active_key,
        })
    }
}

/// A vote ready to be signed and broadcast.
#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct VoteRequest {
    pub chain: Chain,
    pub voter: String,
    pub author: String,
    pub permlink: String,
    #[debug(skip)]
    pub posting_key: String,
    /// Weight on the 10000 = 100% scale.
    pub weight: i16,
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("failed signing vote: {0}")]
    Signing(String),
    #[error("failed submitting vote: {0}")]
    Transport(String),
    #[error("vote rejected by the chain: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait VoteBroadcaster: Send + Sync + 'static {
    async fn cast_vote(&self, request: &VoteRequest) -> Result<(), BroadcastError>;
}

/// Best-effort delivery of human-readable reports. Implementations log
/// their own failures.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, message: &str);
}

/// Interprets the `test_mode` setting; anything but an explicit false value
/// keeps test mode on.
pub fn parse_test_mode(value: Option<&str>) -> bool {
    !matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("false" | "0" | "no" | "off")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_not_debug_printed() {
        let curator = CuratorInfo {
            username: "curator".to_string(),
            posting_key: "5Jposting".to_string(),
            active_key: Some("5Jactive".to_string()),
        };
        let printed = format!("{curator:?}");
        assert!(printed.contains("curator"));
        assert!(!printed.contains("5J"));

        let request = VoteRequest {
            chain: Chain::Steem,
            voter: "curator".to_string(),
            author: "alice".to_string(),
            permlink: "hello".to_string(),
            posting_key: "5Jposting".to_string(),
            weight: 5000,
        };
        assert!(!format!("{request:?}").contains("5J"));
    }

    #[test]
    fn weight_and_timing_mode() {
        let config = UserVoteConfig {
            vote_weight: 50.0,
            vote_delay: Some(4.0),
            use_optimal_time: false,
            max_votes_per_day: 3,
        };
        assert_eq!(config.weight_bps(), 5000);
        assert!(!config.uses_optimal_time());
        assert!(
            UserVoteConfig {
                vote_delay: None,
                ..config
            }
            .uses_optimal_time()
        );
    }

    #[test]
    fn test_mode_defaults_on() {
        assert!(parse_test_mode(None));
        assert!(parse_test_mode(Some("true")));
        assert!(parse_test_mode(Some("garbage")));
        assert!(!parse_test_mode(Some(" False ")));
        assert!(!parse_test_mode(Some("0")));
    }
}
