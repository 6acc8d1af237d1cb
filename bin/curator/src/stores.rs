//! Settings and user stores backed by the config file.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use curator::{
    PostRef,
    collaborators::{SettingsStore, StoreError, UserDirectory, UserVoteConfig},
};
use curator_gateway::Chain;
use parking_lot::RwLock;

/// Settings held in memory. Writes last for the process lifetime.
#[derive(derive_more::Debug)]
pub(crate) struct MemorySettings {
    #[debug(skip)]
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub(crate) fn new(seed: BTreeMap<String, String>) -> Self {
        Self {
            values: RwLock::new(seed.into_iter().collect()),
        }
    }

    /// A setting parsed as a number, if present and well formed.
    pub(crate) fn number(&self, key: &str) -> Option<f64> {
        let value = self.values.read().get(key).cloned()?;
        match value.trim().parse() {
            Ok(number) => Some(number),
            Err(_) => {
                tracing::warn!(%key, %value, "ignoring non-numeric setting");
                None
            }
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    /// Chain-scoped keys carry their chain as a prefix, so `chain` only
    /// narrows the lookup to `<chain>_<key>` when such a key exists.
    async fn get(&self, key: &str, chain: Option<Chain>) -> Result<Option<String>, StoreError> {
        let values = self.values.read();
        let scoped = chain.and_then(|chain| values.get(&format!("{chain}_{key}")));
        Ok(scoped.or_else(|| values.get(key)).cloned())
    }

    async fn set(&self, key: &str, value: &str, chain: Option<Chain>) -> Result<bool, StoreError> {
        let key = match chain {
            Some(chain) if !key.starts_with(chain.as_str()) => format!("{chain}_{key}"),
            _ => key.to_string(),
        };
        self.values.write().insert(key, value.to_string());
        Ok(true)
    }
}

/// Authors listed under `[users.<chain>]`.
#[derive(Debug, Default)]
pub(crate) struct ConfiguredUsers {
    users: BTreeMap<Chain, BTreeMap<String, UserVoteConfig>>,
}

impl ConfiguredUsers {
    pub(crate) fn new(users: BTreeMap<Chain, BTreeMap<String, UserVoteConfig>>) -> Self {
        let users = users
            .into_iter()
            .map(|(chain, users)| {
                let users = users
                    .into_iter()
                    .map(|(name, config)| (name.trim().to_lowercase(), config))
                    .collect();
                (chain, users)
            })
            .collect();
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for ConfiguredUsers {
    async fn usernames(&self, chain: Chain) -> Result<Vec<String>, StoreError> {
        Ok(self
            .users
            .get(&chain)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn config_for_post(&self, post: &PostRef) -> Result<Option<UserVoteConfig>, StoreError> {
        Ok(self
            .users
            .get(&post.chain)
            .and_then(|users| users.get(&post.author))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settings_prefer_chain_scoped_keys() {
        let settings = MemorySettings::new(BTreeMap::from([
            ("steem_test_mode".to_string(), "false".to_string()),
            ("test_mode".to_string(), "true".to_string()),
        ]));
        assert_eq!(
            settings.get("test_mode", Some(Chain::Steem)).await.unwrap().as_deref(),
            Some("false")
        );
        assert_eq!(
            settings.get("test_mode", Some(Chain::Hive)).await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            settings.get("steem_test_mode", Some(Chain::Steem)).await.unwrap().as_deref(),
            Some("false")
        );

        settings.set("curator", "bob", Some(Chain::Hive)).await.unwrap();
        assert_eq!(
            settings.get("hive_curator", None).await.unwrap().as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn numbers_are_parsed_leniently() {
        let settings = MemorySettings::new(BTreeMap::from([
            ("delegation_min_sp".to_string(), " 50 ".to_string()),
            ("delegation_max_sp".to_string(), "lots".to_string()),
        ]));
        assert_eq!(settings.number("delegation_min_sp"), Some(50.0));
        assert_eq!(settings.number("delegation_max_sp"), None);
        assert_eq!(settings.number("absent"), None);
    }

    #[tokio::test]
    async fn users_are_matched_case_insensitively() {
        let config = UserVoteConfig {
            vote_weight: 25.0,
            vote_delay: Some(3.0),
            use_optimal_time: false,
            max_votes_per_day: 3,
        };
        let users = ConfiguredUsers::new(BTreeMap::from([(
            Chain::Steem,
            BTreeMap::from([("Alice".to_string(), config.clone())]),
        )]));

        assert_eq!(users.usernames(Chain::Steem).await.unwrap(), ["alice"]);
        assert!(users.usernames(Chain::Hive).await.unwrap().is_empty());

        let post = PostRef::new(Chain::Steem, "ALICE", "hello").unwrap();
        assert_eq!(users.config_for_post(&post).await.unwrap(), Some(config));
        let elsewhere = PostRef::new(Chain::Hive, "alice", "hello").unwrap();
        assert_eq!(users.config_for_post(&elsewhere).await.unwrap(), None);
    }
}
