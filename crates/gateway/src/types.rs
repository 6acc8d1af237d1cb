//! Typed records for the chain payloads the curator consumes.
//!
//! All parsing from the node's loosely typed JSON happens here, at the
//! gateway boundary. Condenser-style payloads mix numbers and numeric
//! strings, legacy `"1.000 STEEM"` assets and NAI objects, and timestamps
//! without an offset; the decision logic only ever sees the typed forms.

use std::str::FromStr;

use jiff::{Timestamp, civil, tz::TimeZone};
use serde::{Deserialize, Deserializer, de::Error as _};
use serde_json::Value;

use crate::error::PayloadError;

/// A chain asset amount, e.g. `"1234.567890 VESTS"`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawAsset")]
pub struct Asset {
    pub amount: f64,
    pub symbol: String,
}

impl Asset {
    pub fn zero(symbol: &str) -> Self {
        Self {
            amount: 0.0,
            symbol: symbol.to_string(),
        }
    }
}

impl FromStr for Asset {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(amount), symbol, None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(PayloadError::Asset(s.to_string()));
        };
        let amount = amount
            .parse::<f64>()
            .map_err(|_| PayloadError::Asset(s.to_string()))?;
        Ok(Self {
            amount,
            symbol: symbol.unwrap_or_default().to_string(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAsset {
    Legacy(String),
    Nai {
        amount: String,
        precision: u32,
        nai: String,
    },
}

impl TryFrom<RawAsset> for Asset {
    type Error = PayloadError;

    fn try_from(raw: RawAsset) -> Result<Self, Self::Error> {
        match raw {
            RawAsset::Legacy(s) => s.parse(),
            RawAsset::Nai {
                amount,
                precision,
                nai,
            } => {
                let units = amount
                    .parse::<f64>()
                    .map_err(|_| PayloadError::Asset(amount.clone()))?;
                let precision = i32::try_from(precision).map_err(|_| PayloadError::Asset(amount))?;
                Ok(Self {
                    amount: units / 10f64.powi(precision),
                    symbol: nai,
                })
            }
        }
    }
}

/// Parses a chain timestamp. Nodes emit `2024-05-01T12:00:00` (implicitly
/// UTC); an explicit offset is accepted as well.
pub fn parse_chain_time(s: &str) -> Result<Timestamp, PayloadError> {
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Ok(ts);
    }
    s.parse::<civil::DateTime>()
        .and_then(|dt| dt.to_zoned(TimeZone::UTC))
        .map(|zoned| zoned.timestamp())
        .map_err(|_| PayloadError::Timestamp(s.to_string()))
}

fn chain_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_chain_time(&s).map_err(D::Error::custom)
}

fn opt_chain_time<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Timestamp>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|s| parse_chain_time(&s).map_err(D::Error::custom))
        .transpose()
}

fn lenient_i64(value: &Value) -> Result<i64, PayloadError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| PayloadError::Number(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| PayloadError::Number(s.clone())),
        other => Err(PayloadError::Number(other.to_string())),
    }
}

fn lenient_f64(value: &Value) -> Result<f64, PayloadError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| PayloadError::Number(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| PayloadError::Number(s.clone())),
        other => Err(PayloadError::Number(other.to_string())),
    }
}

fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    lenient_i64(&value).map_err(D::Error::custom)
}

fn de_opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => lenient_i64(&value).map(Some).map_err(D::Error::custom),
    }
}

fn vests() -> Asset {
    Asset::zero("VESTS")
}

/// The account fields the curator relies on.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default = "vests")]
    pub vesting_shares: Asset,
    #[serde(default = "vests")]
    pub received_vesting_shares: Asset,
    #[serde(default = "vests")]
    pub delegated_vesting_shares: Asset,
    /// Voting power at `last_vote_time`, on a 0..=10000 scale.
    #[serde(default)]
    pub voting_power: u16,
    #[serde(default, deserialize_with = "opt_chain_time")]
    pub last_vote_time: Option<Timestamp>,
    /// Raw reputation as stored on chain.
    #[serde(default, deserialize_with = "de_i64")]
    pub reputation: i64,
}

impl Account {
    /// Own plus received minus delegated-away vesting shares.
    pub fn effective_vests(&self) -> f64 {
        self.vesting_shares.amount + self.received_vesting_shares.amount
            - self.delegated_vesting_shares.amount
    }

    pub fn display_reputation(&self) -> f64 {
        display_reputation(self.reputation)
    }
}

/// Converts a raw on-chain reputation to the score shown by front ends.
pub fn display_reputation(raw: i64) -> f64 {
    if raw == 0 {
        return 25.0;
    }
    let magnitude = ((raw.unsigned_abs() as f64).log10() - 9.0).max(0.0);
    let signed = if raw < 0 { -magnitude } else { magnitude };
    signed * 9.0 + 25.0
}

/// One entry of a post's `active_votes`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ActiveVote {
    pub voter: String,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub rshares: Option<i64>,
    /// Vote percent on the -10000..=10000 scale.
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub percent: Option<i64>,
    #[serde(default, deserialize_with = "opt_chain_time")]
    pub time: Option<Timestamp>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub reputation: Option<i64>,
}

/// A post (or a blog entry pointing at one) with its current votes.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Post {
    pub author: String,
    pub permlink: String,
    #[serde(deserialize_with = "chain_time")]
    pub created: Timestamp,
    /// Front-end relative path, `/<category>/@<author>/<permlink>`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub active_votes: Vec<ActiveVote>,
}

impl Post {
    pub fn has_vote_from(&self, account: &str) -> bool {
        self.active_votes
            .iter()
            .any(|vote| vote.voter.eq_ignore_ascii_case(account))
    }
}

/// The subset of dynamic global properties used for vests/power conversion.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DynamicGlobalProperties {
    #[serde(alias = "total_vesting_fund_hive")]
    pub total_vesting_fund_steem: Asset,
    pub total_vesting_shares: Asset,
}

impl DynamicGlobalProperties {
    /// Native tokens per vesting share, if the denominator is usable.
    pub fn steem_per_vests(&self) -> Option<f64> {
        let shares = self.total_vesting_shares.amount;
        (shares > 0.0).then(|| self.total_vesting_fund_steem.amount / shares)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RewardFund {
    pub reward_balance: f64,
    pub recent_claims: f64,
}

impl RewardFund {
    /// Reward funds come in a few shapes depending on the node's API flavour;
    /// anything without a parseable balance and claims counter is rejected.
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let object = value
            .as_object()
            .ok_or_else(|| PayloadError::RewardFund("expected an object".to_string()))?;
        let balance = object
            .get("reward_balance")
            .ok_or_else(|| PayloadError::RewardFund("missing `reward_balance`".to_string()))?;
        let reward_balance = Asset::deserialize(balance)
            .map_err(|e| PayloadError::RewardFund(format!("bad `reward_balance`: {e}")))?
            .amount;
        let recent_claims = object
            .get("recent_claims")
            .ok_or_else(|| PayloadError::RewardFund("missing `recent_claims`".to_string()))
            .and_then(lenient_f64)?;
        Ok(Self {
            reward_balance,
            recent_claims,
        })
    }
}

/// Median price feed, `base` per `quote`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Price {
    pub base: Asset,
    pub quote: Asset,
}

impl Price {
    pub fn ratio(&self) -> Option<f64> {
        (self.quote.amount != 0.0).then(|| self.base.amount / self.quote.amount)
    }
}

/// An operation found in account history.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Vote {
        voter: String,
        author: String,
        permlink: String,
        weight: i64,
    },
    DelegateVestingShares {
        delegator: String,
        delegatee: String,
        vesting_shares: Asset,
    },
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "(u64, RawHistoryItem)")]
pub struct HistoryEntry {
    pub index: u64,
    pub timestamp: Timestamp,
    pub op: Operation,
}

#[derive(Deserialize)]
struct RawHistoryItem {
    timestamp: String,
    op: (String, Value),
}

#[derive(Deserialize)]
struct RawVote {
    voter: String,
    author: String,
    permlink: String,
    #[serde(default, deserialize_with = "de_i64")]
    weight: i64,
}

#[derive(Deserialize)]
struct RawDelegation {
    delegator: String,
    delegatee: String,
    vesting_shares: Asset,
}

impl TryFrom<(u64, RawHistoryItem)> for HistoryEntry {
    type Error = String;

    fn try_from((index, item): (u64, RawHistoryItem)) -> Result<Self, Self::Error> {
        let timestamp = parse_chain_time(&item.timestamp).map_err(|e| e.to_string())?;
        let (name, body) = item.op;
        let op = match name.as_str() {
            "vote" => {
                let vote: RawVote = serde_json::from_value(body).map_err(|e| e.to_string())?;
                Operation::Vote {
                    voter: vote.voter,
                    author: vote.author,
                    permlink: vote.permlink,
                    weight: vote.weight,
                }
            }
            "delegate_vesting_shares" => {
                let delegation: RawDelegation =
                    serde_json::from_value(body).map_err(|e| e.to_string())?;
                Operation::DelegateVestingShares {
                    delegator: delegation.delegator,
                    delegatee: delegation.delegatee,
                    vesting_shares: delegation.vesting_shares,
                }
            }
            _ => Operation::Other(name),
        };
        Ok(Self {
            index,
            timestamp,
            op,
        })
    }
}
