//! Backward scanning of account history.

use std::collections::{BTreeMap, HashMap};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{
    Chain,
    data::ChainData,
    error::GatewayError,
    types::{Asset, HistoryEntry, Operation},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Operations covered by one scan batch.
    pub batch_size: u64,
    /// Maximum operations requested from a node in one call.
    pub page_size: u64,
    /// Consecutive batches without a recent delegation before a delegation
    /// scan gives up.
    pub max_stale_batches: u32,
    /// How long a same-day vote count is reused, in seconds.
    pub votes_today_ttl_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            page_size: 1_000,
            max_stale_batches: 3,
            votes_today_ttl_secs: 180,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    Unstarted,
    At(u64),
    Exhausted,
}

/// Lazy newest-to-oldest walk over an account's operation history.
///
/// Each call to [`HistoryScan::next_batch`] fetches at most one batch worth of
/// operations, so consumers decide when to stop and pay only for what they
/// read. The scan can be rewound with [`HistoryScan::restart`].
#[derive(Debug)]
pub struct HistoryScan<'a> {
    data: &'a ChainData,
    chain: Chain,
    account: String,
    batch_size: u64,
    page_size: u64,
    cursor: Cursor,
}

impl<'a> HistoryScan<'a> {
    pub(crate) fn new(data: &'a ChainData, chain: Chain, account: &str) -> Self {
        let config = data.history_config();
        Self {
            data,
            chain,
            account: account.to_string(),
            batch_size: config.batch_size.max(1),
            page_size: config.page_size.max(1),
            cursor: Cursor::Unstarted,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Begins the walk at `index` instead of the newest operation.
    pub fn starting_at(mut self, index: u64) -> Self {
        self.cursor = Cursor::At(index);
        self
    }

    /// Rewinds to the newest operation; the head is looked up again.
    pub fn restart(&mut self) {
        self.cursor = Cursor::Unstarted;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == Cursor::Exhausted
    }

    /// The next batch, newest operation first, or `None` once the start of
    /// the history has been reached.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<HistoryEntry>>, GatewayError> {
        let start = match self.cursor {
            Cursor::Exhausted => return Ok(None),
            Cursor::At(index) => index,
            Cursor::Unstarted => match self.data.history_head(self.chain, &self.account).await? {
                Some(head) => head,
                None => {
                    self.cursor = Cursor::Exhausted;
                    return Ok(None);
                }
            },
        };
        let stop = start.saturating_sub(self.batch_size - 1);

        let mut entries = BTreeMap::new();
        let mut from = start;
        loop {
            let limit = (from - stop).min(self.page_size).min(from);
            let page = self
                .data
                .account_history(self.chain, &self.account, from, limit)
                .await?;
            let Some(lowest) = page.iter().map(|entry| entry.index).min() else {
                break;
            };
            for entry in page {
                if (stop..=start).contains(&entry.index) {
                    entries.insert(entry.index, entry);
                }
            }
            if lowest <= stop || lowest == 0 || lowest > from {
                break;
            }
            from = lowest - 1;
        }

        self.cursor = if stop == 0 {
            Cursor::Exhausted
        } else {
            Cursor::At(stop - 1)
        };
        tracing::trace!(
            chain = %self.chain,
            account = %self.account,
            start,
            stop,
            found = entries.len(),
            "history batch fetched"
        );
        Ok(Some(entries.into_values().rev().collect()))
    }
}

/// The latest delegation one account made to the scanned account.
#[derive(Clone, Debug, PartialEq)]
pub struct Delegation {
    pub delegator: String,
    pub vesting_shares: Asset,
    pub timestamp: Timestamp,
    pub index: u64,
}

impl Delegation {
    /// Zero-share delegations record a removal.
    pub fn is_active(&self) -> bool {
        self.vesting_shares.amount > 0.0
    }
}

/// Extracts incoming delegations from history entries.
pub(crate) fn delegations_to<'e>(
    account: &'e str,
    entries: impl IntoIterator<Item = &'e HistoryEntry> + 'e,
) -> impl Iterator<Item = Delegation> + 'e {
    entries.into_iter().filter_map(move |entry| match &entry.op {
        Operation::DelegateVestingShares {
            delegator,
            delegatee,
            vesting_shares,
        } if delegatee.eq_ignore_ascii_case(account) => Some(Delegation {
            delegator: delegator.clone(),
            vesting_shares: vesting_shares.clone(),
            timestamp: entry.timestamp,
            index: entry.index,
        }),
        _ => None,
    })
}

/// Keeps only the most recent delegation per delegator, newest first.
pub fn latest_per_delegator(mut delegations: Vec<Delegation>) -> Vec<Delegation> {
    delegations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.index.cmp(&a.index)));
    let mut seen = HashMap::new();
    delegations
        .into_iter()
        .filter(|delegation| seen.insert(delegation.delegator.clone(), ()).is_none())
        .collect()
}

/// Converts delegations to native-token power and keeps the active ones
/// within `[min_power, max_power]`.
pub fn filter_delegations(
    delegations: Vec<Delegation>,
    steem_per_vests: f64,
    min_power: f64,
    max_power: Option<f64>,
) -> Vec<(Delegation, f64)> {
    delegations
        .into_iter()
        .filter(Delegation::is_active)
        .map(|delegation| {
            let power = delegation.vesting_shares.amount * steem_per_vests;
            (delegation, power)
        })
        .filter(|(_, power)| *power >= min_power && max_power.is_none_or(|max| *power <= max))
        .collect()
}
