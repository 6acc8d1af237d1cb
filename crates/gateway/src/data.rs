//! Typed chain data access on top of the failover [`Gateway`].

use std::{collections::HashMap, sync::Arc};

use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{
    Chain, Gateway,
    clock::Clock,
    error::GatewayError,
    history::{Delegation, HistoryConfig, HistoryScan, delegations_to, latest_per_delegator},
    types::{
        Account, ActiveVote, DynamicGlobalProperties, HistoryEntry, Operation, Post, Price,
        RewardFund,
    },
};

/// Key of the same-day vote count cache: curator, author, chain.
type VotesTodayKey = (String, String, Chain);

/// Account, post, vote, economics and history lookups for every configured
/// chain.
pub struct ChainData {
    gateway: Gateway,
    clock: Arc<dyn Clock>,
    config: HistoryConfig,
    votes_today: Mutex<HashMap<VotesTodayKey, (Timestamp, u32)>>,
}

impl std::fmt::Debug for ChainData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainData")
            .field("gateway", &self.gateway)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChainData {
    pub fn new(gateway: Gateway, clock: Arc<dyn Clock>, config: HistoryConfig) -> Self {
        Self {
            gateway,
            clock,
            config,
            votes_today: Mutex::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn history_config(&self) -> &HistoryConfig {
        &self.config
    }

    pub async fn account_info(&self, chain: Chain, name: &str) -> Result<Account, GatewayError> {
        let accounts: Vec<Account> = self
            .gateway
            .call(chain, "condenser_api.get_accounts", json!([[name]]))
            .await?;
        accounts
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::AccountNotFound(name.to_string()))
    }

    /// Fetches a post. Nodes answer unknown posts with an empty author
    /// rather than an error.
    pub async fn post(
        &self,
        chain: Chain,
        author: &str,
        permlink: &str,
    ) -> Result<Post, GatewayError> {
        let value = self
            .gateway
            .call_raw(chain, "condenser_api.get_content", json!([author, permlink]))
            .await?;
        let missing = value
            .get("author")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty);
        if missing {
            return Err(GatewayError::PostNotFound {
                author: author.to_string(),
                permlink: permlink.to_string(),
            });
        }
        serde_json::from_value(value).map_err(|source| GatewayError::Decode {
            method: "condenser_api.get_content".to_string(),
            source,
        })
    }

    pub async fn active_votes(
        &self,
        chain: Chain,
        author: &str,
        permlink: &str,
    ) -> Result<Vec<ActiveVote>, GatewayError> {
        self.gateway
            .call(
                chain,
                "condenser_api.get_active_votes",
                json!([author, permlink]),
            )
            .await
    }

    /// The post together with its full vote list.
    ///
    /// Some nodes trim `active_votes` from content responses; the dedicated
    /// vote call is used when the embedded list is empty.
    pub async fn post_votes(
        &self,
        chain: Chain,
        author: &str,
        permlink: &str,
    ) -> Result<(Post, Vec<ActiveVote>), GatewayError> {
        let mut post = self.post(chain, author, permlink).await?;
        let mut votes = std::mem::take(&mut post.active_votes);
        if votes.is_empty() {
            votes = self.active_votes(chain, author, permlink).await?;
        }
        post.active_votes = votes.clone();
        Ok((post, votes))
    }

    /// The vote `voter` cast on the post, if any.
    pub async fn vote(
        &self,
        chain: Chain,
        author: &str,
        permlink: &str,
        voter: &str,
    ) -> Result<Option<ActiveVote>, GatewayError> {
        let votes = self.active_votes(chain, author, permlink).await?;
        Ok(votes
            .into_iter()
            .find(|vote| vote.voter.eq_ignore_ascii_case(voter)))
    }

    /// Blog feed of `account`, newest first. Includes reblogs.
    pub async fn blog(
        &self,
        chain: Chain,
        account: &str,
        limit: u32,
    ) -> Result<Vec<Post>, GatewayError> {
        self.gateway
            .call(
                chain,
                "condenser_api.get_discussions_by_blog",
                json!([{ "tag": account, "limit": limit }]),
            )
            .await
    }

    /// Up to `limit` of the author's own posts preceding the newest one.
    pub async fn previous_posts(
        &self,
        chain: Chain,
        author: &str,
        limit: u32,
    ) -> Result<Vec<Post>, GatewayError> {
        let blog = self.blog(chain, author, limit + 1).await?;
        Ok(blog
            .into_iter()
            .filter(|post| post.author.eq_ignore_ascii_case(author))
            .skip(1)
            .take(limit as usize)
            .collect())
    }

    /// The newest post of every account in `accounts` created within
    /// `max_age`. Accounts whose feed cannot be read are skipped.
    pub async fn fresh_posts(
        &self,
        chain: Chain,
        accounts: &[String],
        max_age: SignedDuration,
    ) -> Vec<Post> {
        let now = self.clock.now();
        let mut fresh = Vec::new();
        for account in accounts {
            let latest = match self.blog(chain, account, 1).await {
                Ok(mut posts) if !posts.is_empty() => posts.swap_remove(0),
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(%chain, %account, %err, "failed reading blog");
                    continue;
                }
            };
            let age = now.duration_since(latest.created);
            if age <= max_age && latest.author.eq_ignore_ascii_case(account) {
                fresh.push(latest);
            }
        }
        fresh
    }

    pub async fn dynamic_global_properties(
        &self,
        chain: Chain,
    ) -> Result<DynamicGlobalProperties, GatewayError> {
        self.gateway
            .call(
                chain,
                "condenser_api.get_dynamic_global_properties",
                json!([]),
            )
            .await
    }

    pub async fn reward_fund(&self, chain: Chain, name: &str) -> Result<RewardFund, GatewayError> {
        let value: Value = self
            .gateway
            .call_with_retry(chain, "condenser_api.get_reward_fund", json!([name]))
            .await?;
        Ok(RewardFund::from_value(&value)?)
    }

    pub async fn median_price(&self, chain: Chain) -> Result<Price, GatewayError> {
        self.gateway
            .call_with_retry(
                chain,
                "condenser_api.get_current_median_history_price",
                json!([]),
            )
            .await
    }

    /// Index of the newest operation in the account's history.
    pub async fn history_head(
        &self,
        chain: Chain,
        account: &str,
    ) -> Result<Option<u64>, GatewayError> {
        let newest = self.account_history(chain, account, u64::MAX, 1).await?;
        Ok(newest.iter().map(|entry| entry.index).max())
    }

    /// Raw history page ending at `from`. `u64::MAX` addresses the newest
    /// operation.
    pub async fn account_history(
        &self,
        chain: Chain,
        account: &str,
        from: u64,
        limit: u64,
    ) -> Result<Vec<HistoryEntry>, GatewayError> {
        let from = if from == u64::MAX {
            json!(-1)
        } else {
            json!(from)
        };
        self.gateway
            .call(
                chain,
                "condenser_api.get_account_history",
                json!([account, from, limit]),
            )
            .await
    }

    pub fn history(&self, chain: Chain, account: &str) -> HistoryScan<'_> {
        HistoryScan::new(self, chain, account)
    }

    /// Votes `curator` cast on `author`'s content during the last 24 hours.
    ///
    /// History is walked newest-first and the walk ends at the first
    /// operation older than the window. Results are reused for
    /// `votes_today_ttl_secs`.
    pub async fn count_votes_today(
        &self,
        chain: Chain,
        curator: &str,
        author: &str,
    ) -> Result<u32, GatewayError> {
        let key = (curator.to_lowercase(), author.to_lowercase(), chain);
        let now = self.clock.now();
        let ttl = SignedDuration::from_secs(self.config.votes_today_ttl_secs as i64);
        if let Some((at, count)) = self.votes_today.lock().get(&key).copied()
            && now.duration_since(at) < ttl
        {
            return Ok(count);
        }

        let since = now
            .checked_sub(SignedDuration::from_hours(24))
            .unwrap_or(Timestamp::MIN);
        let mut scan = self
            .history(chain, curator)
            .with_batch_size(self.config.page_size);
        let mut count = 0;
        'scan: while let Some(batch) = scan.next_batch().await? {
            for entry in batch {
                if entry.timestamp < since {
                    break 'scan;
                }
                if let Operation::Vote {
                    voter,
                    author: voted,
                    ..
                } = &entry.op
                    && voter.eq_ignore_ascii_case(curator)
                    && voted.eq_ignore_ascii_case(author)
                {
                    count += 1;
                }
            }
        }

        tracing::debug!(%chain, %curator, %author, count, "counted votes in the last 24h");
        self.votes_today.lock().insert(key, (now, count));
        Ok(count)
    }

    /// Latest delegation per delegator made to `account`, newest first.
    ///
    /// With `since` set, only newer delegations are collected and the scan
    /// gives up after `max_stale_batches` consecutive batches without one.
    /// Without it the whole history is read.
    pub async fn delegation_history(
        &self,
        chain: Chain,
        account: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<Delegation>, GatewayError> {
        let mut scan = self.history(chain, account);
        let mut collected = Vec::new();
        let mut stale = 0;
        while let Some(batch) = scan.next_batch().await? {
            let before = collected.len();
            collected.extend(
                delegations_to(account, &batch)
                    .filter(|delegation| since.is_none_or(|since| delegation.timestamp > since)),
            );
            if since.is_none() {
                continue;
            }
            if collected.len() > before {
                stale = 0;
            } else {
                stale += 1;
                if stale >= self.config.max_stale_batches {
                    tracing::debug!(%chain, %account, stale, "delegation scan went stale");
                    break;
                }
            }
        }
        Ok(latest_per_delegator(collected))
    }
}
