//! Expected reward value of a vote, from the chain's reward-pool economics.

use std::{collections::HashMap, sync::Arc};

use curator_gateway::{Chain, ChainData, GatewayError};
use futures::{StreamExt as _, stream};
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use schnellru::{ByLength, LruMap};
use serde::{Deserialize, Serialize};

use crate::{
    cache::AccountCache,
    collaborators::{CuratorError, SettingsStore, curator_username},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Voting power assumed when none is given, on the 0..=10000 scale.
    pub default_voting_power: u16,
    /// Reward fund consulted for the pool balance and claims.
    pub reward_fund: String,
    /// How long fetched economics and memoized estimates are reused.
    pub snapshot_ttl_secs: u64,
    pub memo_capacity: u32,
    /// Estimates computed at once by [`VoteValueEstimator::estimate_batch`].
    pub batch_concurrency: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            default_voting_power: 9200,
            reward_fund: "post".to_string(),
            snapshot_ttl_secs: 60,
            memo_capacity: 128,
            batch_concurrency: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    #[error("`{0}` is zero or missing")]
    MissingDenominator(&'static str),
    #[error("failed fetching chain economics")]
    Gateway(#[from] GatewayError),
    #[error("failed resolving the curator's stake")]
    Curator(#[from] CuratorError),
}

/// Chain-wide values the estimate is computed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Economics {
    pub total_vesting_fund: f64,
    pub total_vesting_shares: f64,
    pub reward_balance: f64,
    pub recent_claims: f64,
    pub price_base: f64,
    pub price_quote: f64,
}

/// Intermediate terms of the reward formula.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormulaComponents {
    pub steem_per_vests: f64,
    pub sp: f64,
    pub r: f64,
    pub p: f64,
    pub rb_prc: f64,
    pub price_ratio: f64,
}

#[derive(Debug)]
pub struct VoteValueEstimate {
    pub native_value: f64,
    pub secondary_value: f64,
    pub components: Option<FormulaComponents>,
    /// Set when the estimate could not be computed; both values are zero.
    pub error: Option<EstimationError>,
}

impl VoteValueEstimate {
    pub fn failed(error: EstimationError) -> Self {
        Self {
            native_value: 0.0,
            secondary_value: 0.0,
            components: None,
            error: Some(error),
        }
    }

    fn computed(native_value: f64, secondary_value: f64, components: FormulaComponents) -> Self {
        Self {
            native_value,
            secondary_value,
            components: Some(components),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Applies the reward formula to `economics`.
///
/// `stake` is in vesting shares, `vote_percent` and `voting_power` on the
/// 10000 = 100% scale.
pub fn estimate_with(
    economics: &Economics,
    vote_percent: i64,
    stake: f64,
    voting_power: u16,
) -> Result<VoteValueEstimate, EstimationError> {
    let nonzero = |value: f64, name| {
        if value == 0.0 || !value.is_finite() {
            Err(EstimationError::MissingDenominator(name))
        } else {
            Ok(value)
        }
    };
    let shares = nonzero(economics.total_vesting_shares, "total_vesting_shares")?;
    let steem_per_vests = nonzero(economics.total_vesting_fund / shares, "steem_per_vests")?;
    let recent_claims = nonzero(economics.recent_claims, "recent_claims")?;
    let price_quote = nonzero(economics.price_quote, "price_quote")?;

    let sp = stake * steem_per_vests;
    let r = sp / steem_per_vests;
    let p = (f64::from(voting_power) * vote_percent as f64 / 10000.0 + 49.0) / 50.0;
    let rb_prc = economics.reward_balance / recent_claims;
    let native_value = r * p * 100.0 * rb_prc;
    let price_ratio = economics.price_base / price_quote;

    Ok(VoteValueEstimate::computed(
        native_value,
        native_value * price_ratio,
        FormulaComponents {
            steem_per_vests,
            sp,
            r,
            p,
            rb_prc,
            price_ratio,
        },
    ))
}

/// Whose stake a vote is valued with.
#[derive(Clone, Debug, PartialEq)]
pub enum Stake {
    Vests(f64),
    /// The effective vesting shares of an account.
    OfAccount(String),
    /// The effective vesting shares of the chain's curator account.
    Curator,
}

/// One entry of a batch valuation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueRequest {
    pub voter: String,
    pub vote_percent: i64,
    pub stake: Stake,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MemoKey {
    chain: Chain,
    vote_percent: i64,
    stake_bits: u64,
    voting_power: u16,
}

#[derive(Clone, Copy)]
struct Memo {
    at: Timestamp,
    native_value: f64,
    secondary_value: f64,
    components: FormulaComponents,
}

/// Values votes against freshly fetched economics.
///
/// Economics are fetched at most once per chain per snapshot period and
/// successful estimates are memoized by their inputs for the same period.
pub struct VoteValueEstimator {
    data: Arc<ChainData>,
    accounts: AccountCache,
    settings: Option<Arc<dyn SettingsStore>>,
    config: EstimatorConfig,
    snapshots: Mutex<HashMap<Chain, (Timestamp, Economics)>>,
    memo: Mutex<LruMap<MemoKey, Memo>>,
}

impl std::fmt::Debug for VoteValueEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteValueEstimator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VoteValueEstimator {
    pub fn new(data: Arc<ChainData>, accounts: AccountCache, config: EstimatorConfig) -> Self {
        let memo = LruMap::new(ByLength::new(config.memo_capacity.max(1)));
        Self {
            data,
            accounts,
            settings: None,
            config,
            snapshots: Mutex::new(HashMap::new()),
            memo: Mutex::new(memo),
        }
    }

    /// Settings naming the curator valued by [`Stake::Curator`].
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    fn ttl(&self) -> SignedDuration {
        SignedDuration::from_secs(self.config.snapshot_ttl_secs as i64)
    }

    /// Current economics of `chain`, reusing a recent snapshot.
    pub async fn economics(&self, chain: Chain) -> Result<Economics, EstimationError> {
        let now = self.data.clock().now();
        if let Some((at, economics)) = self.snapshots.lock().get(&chain).copied()
            && now.duration_since(at) < self.ttl()
        {
            return Ok(economics);
        }

        let props = self.data.dynamic_global_properties(chain).await?;
        let fund = self.data.reward_fund(chain, &self.config.reward_fund).await?;
        let price = self.data.median_price(chain).await?;
        let economics = Economics {
            total_vesting_fund: props.total_vesting_fund_steem.amount,
            total_vesting_shares: props.total_vesting_shares.amount,
            reward_balance: fund.reward_balance,
            recent_claims: fund.recent_claims,
            price_base: price.base.amount,
            price_quote: price.quote.amount,
        };
        self.snapshots.lock().insert(chain, (now, economics));
        Ok(economics)
    }

    async fn stake_vests(&self, chain: Chain, stake: &Stake) -> Result<f64, EstimationError> {
        let name = match stake {
            Stake::Vests(vests) => return Ok(*vests),
            Stake::OfAccount(name) => name.clone(),
            Stake::Curator => match &self.settings {
                Some(settings) => curator_username(settings.as_ref(), chain).await?,
                None => return Err(CuratorError::MissingUsername(chain).into()),
            },
        };
        Ok(self
            .accounts
            .get_or_fetch(&self.data, chain, &name)
            .await?
            .effective_vests())
    }

    /// Values a vote of `vote_percent`. Failures yield a zero estimate
    /// carrying the error.
    pub async fn estimate(
        &self,
        chain: Chain,
        vote_percent: i64,
        stake: &Stake,
        voting_power: Option<u16>,
    ) -> VoteValueEstimate {
        match self.try_estimate(chain, vote_percent, stake, voting_power).await {
            Ok(estimate) => estimate,
            Err(err) => {
                tracing::debug!(%chain, vote_percent, %err, "vote value unavailable");
                VoteValueEstimate::failed(err)
            }
        }
    }

    async fn try_estimate(
        &self,
        chain: Chain,
        vote_percent: i64,
        stake: &Stake,
        voting_power: Option<u16>,
    ) -> Result<VoteValueEstimate, EstimationError> {
        let stake = self.stake_vests(chain, stake).await?;
        let key = MemoKey {
            chain,
            vote_percent,
            stake_bits: stake.to_bits(),
            voting_power: voting_power.unwrap_or(self.config.default_voting_power),
        };
        let now = self.data.clock().now();
        if let Some(memo) = self.memo.lock().get(&key).copied()
            && now.duration_since(memo.at) < self.ttl()
        {
            return Ok(VoteValueEstimate::computed(
                memo.native_value,
                memo.secondary_value,
                memo.components,
            ));
        }

        let economics = self.economics(chain).await?;
        let estimate = estimate_with(&economics, vote_percent, stake, key.voting_power)?;
        if let Some(components) = estimate.components {
            self.memo.lock().insert(
                key,
                Memo {
                    at: now,
                    native_value: estimate.native_value,
                    secondary_value: estimate.secondary_value,
                    components,
                },
            );
        }
        Ok(estimate)
    }

    /// Values many votes concurrently. Results are in no particular order.
    pub async fn estimate_batch(
        &self,
        chain: Chain,
        requests: Vec<ValueRequest>,
    ) -> Vec<(String, VoteValueEstimate)> {
        stream::iter(requests)
            .map(|request| async move {
                let estimate = self
                    .estimate(chain, request.vote_percent, &request.stake, None)
                    .await;
                (request.voter, estimate)
            })
            .buffer_unordered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }
}
