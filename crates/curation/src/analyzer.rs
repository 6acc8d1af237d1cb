//! Ranks a post's voters by how much their votes are worth.

use std::{collections::HashMap, sync::Arc};

use curator_gateway::{
    Chain, ChainData, GatewayError,
    types::{Account, ActiveVote},
};
use futures::{StreamExt as _, stream};
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{
    cache::AccountCache,
    post_ref::PostRef,
    value::{Stake, VoteValueEstimator},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Votes kept for analysis when a post has more.
    pub max_voters: usize,
    /// Leading votes that always get full enrichment.
    pub detailed_voters: usize,
    /// Remaining votes are enriched only from this many rshares on.
    pub significance_rshares: i64,
    pub concurrency: usize,
    pub result_limit: usize,
    /// Weight of the vote value in the importance blend.
    pub value_weight: f64,
    /// Weight of the stake in the importance blend.
    pub stake_weight: f64,
    pub value_scale: f64,
    pub vests_scale: f64,
    pub rshares_scale: f64,
    /// Assumed vote delay when the vote time is unknown.
    pub fallback_delay_mins: i64,
}

impl AnalyzerConfig {
    /// Whether a record reaches `min_importance`, either as importance or
    /// as rshares on the importance scale.
    pub fn meets_threshold(&self, record: &VoterRecord, min_importance: f64) -> bool {
        record.importance >= min_importance
            || record.rshares as f64 >= min_importance * self.rshares_scale
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_voters: 30,
            detailed_voters: 10,
            significance_rshares: 1_000_000_000,
            concurrency: 5,
            result_limit: 20,
            value_weight: 0.7,
            stake_weight: 0.3,
            value_scale: 10.0,
            vests_scale: 1e6,
            rshares_scale: 1e12,
            fallback_delay_mins: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("failed fetching votes of {post}")]
    Votes {
        post: PostRef,
        #[source]
        source: GatewayError,
    },
}

impl AnalyzeError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Votes { source, .. } => source.is_transient(),
        }
    }
}

/// One voter of a post, enriched with stake and value where significant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoterRecord {
    pub voter: String,
    /// Vote percent, 10000 = 100%.
    pub weight: i64,
    pub rshares: i64,
    /// Effective vesting shares; zero when not enriched.
    pub vesting_shares: f64,
    pub importance: f64,
    pub vote_time: Timestamp,
    /// Whole minutes between post creation and the vote. Negative only under
    /// clock skew.
    pub vote_delay_minutes: Option<i64>,
    pub reputation: f64,
    pub steem_vote_value: f64,
    pub sbd_vote_value: f64,
}

/// Picks the votes worth analysing.
///
/// Above `max` votes, the highest `rshares` are kept when every vote carries
/// them. Otherwise the list is cut in its original order.
pub fn select_working_set(mut votes: Vec<ActiveVote>, max: usize) -> Vec<ActiveVote> {
    if votes.len() > max && votes.iter().all(|vote| vote.rshares.is_some()) {
        votes.sort_by_key(|vote| std::cmp::Reverse(vote.rshares.unwrap_or_default()));
    }
    votes.truncate(max);
    votes
}

fn delay_minutes(created: Timestamp, vote_time: Timestamp) -> i64 {
    (vote_time.duration_since(created).as_secs_f64() / 60.0).floor() as i64
}

type LocalAccounts = Mutex<HashMap<String, Arc<OnceCell<Option<Account>>>>>;

/// Per-analysis state shared by the concurrent enrichment tasks.
#[derive(Default)]
struct Lookups {
    accounts: LocalAccounts,
    /// The post's vote list as served by the dedicated vote call, fetched
    /// at most once. `None` when that call failed.
    exact_votes: OnceCell<Option<Vec<ActiveVote>>>,
}

#[derive(Debug)]
pub struct VoterAnalyzer {
    data: Arc<ChainData>,
    accounts: AccountCache,
    estimator: Arc<VoteValueEstimator>,
    config: AnalyzerConfig,
}

impl VoterAnalyzer {
    pub fn new(
        data: Arc<ChainData>,
        accounts: AccountCache,
        estimator: Arc<VoteValueEstimator>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            data,
            accounts,
            estimator,
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Voters of `post` whose importance or rshares reach `min_importance`,
    /// highest value first. `curator` never appears in the result.
    pub async fn analyze(
        &self,
        post: &PostRef,
        curator: &str,
        min_importance: f64,
    ) -> Result<Vec<VoterRecord>, AnalyzeError> {
        let started = std::time::Instant::now();
        let (meta, votes) = self
            .data
            .post_votes(post.chain, &post.author, &post.permlink)
            .await
            .map_err(|source| AnalyzeError::Votes {
                post: post.clone(),
                source,
            })?;
        let total = votes.len();
        let votes = select_working_set(votes, self.config.max_voters);
        tracing::debug!(%post, total, kept = votes.len(), "selected votes for analysis");

        let lookups = Lookups::default();
        let lookups = &lookups;
        let created = meta.created;
        let mut records: Vec<VoterRecord> = stream::iter(votes.into_iter().enumerate())
            .filter(|(_, vote)| {
                let own = vote.voter.eq_ignore_ascii_case(curator);
                async move { !own }
            })
            .map(|(position, vote)| async move {
                let detailed = position < self.config.detailed_voters;
                self.process_vote(post, created, vote, detailed, lookups).await
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|record| async move { record })
            .filter(|record| {
                let keep = self.config.meets_threshold(record, min_importance);
                async move { keep }
            })
            .collect()
            .await;

        records.sort_by(|a, b| {
            b.steem_vote_value
                .total_cmp(&a.steem_vote_value)
                .then(b.importance.total_cmp(&a.importance))
        });
        records.truncate(self.config.result_limit.max(self.config.detailed_voters));

        tracing::info!(
            %post,
            voters = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            top = ?records.iter().take(5).map(|r| r.voter.as_str()).collect::<Vec<_>>(),
            "voter analysis complete"
        );
        Ok(records)
    }

    /// Enriches one vote. `None` excludes a significant voter whose account
    /// could not be read.
    async fn process_vote(
        &self,
        post: &PostRef,
        created: Timestamp,
        vote: ActiveVote,
        detailed: bool,
        lookups: &Lookups,
    ) -> Option<VoterRecord> {
        let mut rshares = vote.rshares.unwrap_or_default();
        let mut percent = vote.percent.unwrap_or_default();
        let mut vote_time = vote.time;
        let significant = detailed || rshares >= self.config.significance_rshares;

        if significant
            && vote_time.is_none()
            && let Some(exact) = self.exact_votes(post, lookups).await.and_then(|votes| {
                votes
                    .iter()
                    .find(|exact| exact.voter.eq_ignore_ascii_case(&vote.voter))
            })
        {
            vote_time = exact.time;
            percent = exact.percent.unwrap_or(percent);
            if rshares == 0 {
                rshares = exact.rshares.unwrap_or_default();
            }
        }
        let vote_time = vote_time.unwrap_or_else(|| {
            created + SignedDuration::from_mins(self.config.fallback_delay_mins)
        });

        let mut record = VoterRecord {
            voter: vote.voter,
            weight: percent,
            rshares,
            vesting_shares: 0.0,
            importance: rshares as f64 / self.config.rshares_scale,
            vote_time,
            vote_delay_minutes: Some(delay_minutes(created, vote_time)),
            reputation: vote
                .reputation
                .map(curator_gateway::types::display_reputation)
                .unwrap_or(25.0),
            steem_vote_value: 0.0,
            sbd_vote_value: 0.0,
        };
        if !significant {
            return Some(record);
        }

        let account = self.account(post.chain, &record.voter, &lookups.accounts).await?;
        let vests = account.effective_vests();
        let estimate = self
            .estimator
            .estimate(post.chain, percent, &Stake::Vests(vests), None)
            .await;
        record.vesting_shares = vests;
        record.reputation = account.display_reputation();
        record.steem_vote_value = estimate.native_value;
        record.sbd_vote_value = estimate.secondary_value;
        record.importance = self.config.value_weight
            * (estimate.native_value * self.config.value_scale)
            + self.config.stake_weight * (vests / self.config.vests_scale);
        Some(record)
    }

    async fn exact_votes<'a>(
        &self,
        post: &PostRef,
        lookups: &'a Lookups,
    ) -> Option<&'a [ActiveVote]> {
        lookups
            .exact_votes
            .get_or_init(|| async {
                match self
                    .data
                    .active_votes(post.chain, &post.author, &post.permlink)
                    .await
                {
                    Ok(votes) => Some(votes),
                    Err(err) => {
                        tracing::debug!(%post, %err, "exact vote times unavailable");
                        None
                    }
                }
            })
            .await
            .as_deref()
    }

    /// Fetches each voter at most once per analysis, going through the
    /// process-wide cache first.
    async fn account(&self, chain: Chain, voter: &str, local: &LocalAccounts) -> Option<Account> {
        let cell = local
            .lock()
            .entry(voter.to_lowercase())
            .or_default()
            .clone();
        cell.get_or_init(|| async {
            match self.accounts.get_or_fetch(&self.data, chain, voter).await {
                Ok(account) => Some(account),
                Err(err) => {
                    tracing::warn!(%chain, %voter, %err, "excluding voter without account data");
                    None
                }
            }
        })
        .await
        .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(voter: &str, rshares: Option<i64>) -> ActiveVote {
        ActiveVote {
            voter: voter.to_string(),
            rshares,
            percent: Some(10000),
            time: None,
            reputation: None,
        }
    }

    #[test]
    fn keeps_top_rshares_of_large_posts() {
        let votes = (0..50).map(|i| vote(&format!("v{i}"), Some(i))).collect();
        let kept = select_working_set(votes, 30);
        assert_eq!(kept.len(), 30);
        let rshares: Vec<_> = kept.iter().map(|v| v.rshares.unwrap()).collect();
        assert_eq!(rshares, (20..50).rev().collect::<Vec<_>>());
    }

    #[test]
    fn truncates_in_order_without_rshares() {
        let mut votes: Vec<_> = (0..40).map(|i| vote(&format!("v{i}"), Some(i))).collect();
        votes[5].rshares = None;
        let kept = select_working_set(votes, 30);
        assert_eq!(kept.len(), 30);
        assert_eq!(kept[0].voter, "v0");
        assert_eq!(kept[29].voter, "v29");
    }

    #[test]
    fn small_posts_are_untouched() {
        let votes: Vec<_> = (0..3).map(|i| vote(&format!("v{i}"), Some(i))).collect();
        assert_eq!(select_working_set(votes.clone(), 30), votes);
    }

    #[test]
    fn rshares_alone_can_meet_the_threshold() {
        let config = AnalyzerConfig::default();
        let record = |rshares| VoterRecord {
            voter: "v".to_string(),
            weight: 10000,
            rshares,
            vesting_shares: 0.0,
            importance: 0.05,
            vote_time: Timestamp::UNIX_EPOCH,
            vote_delay_minutes: Some(1),
            reputation: 25.0,
            steem_vote_value: 0.0,
            sbd_vote_value: 0.0,
        };
        assert!(config.meets_threshold(&record(2_000_000_000_000), 1.0));
        assert!(!config.meets_threshold(&record(500_000_000_000), 1.0));
        assert!(config.meets_threshold(&record(0), 0.05));
    }

    #[test]
    fn delay_is_floored() {
        let created = Timestamp::UNIX_EPOCH;
        assert_eq!(delay_minutes(created, created + SignedDuration::from_secs(179)), 2);
        assert_eq!(delay_minutes(created, created - SignedDuration::from_secs(30)), -1);
    }
}
