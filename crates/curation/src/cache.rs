//! Process-wide cache of fetched voter accounts.

use std::{collections::HashMap, sync::Arc, time::Duration};

use curator_gateway::{Chain, ChainData, Clock, GatewayError, types::Account};
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub last_cleared: Timestamp,
}

#[derive(Debug)]
struct State {
    entries: HashMap<(String, Chain), Account>,
    cleared_at: Timestamp,
}

/// Accounts keyed by voter and chain, shared by every analysis.
///
/// Entries are never invalidated one by one. The whole map is dropped once
/// per `clear_every`, either by [`AccountCache::spawn_clear_task`] or lazily
/// on the first access after the period elapsed, so no entry is older than
/// one period.
#[derive(Clone)]
pub struct AccountCache {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    clear_every: SignedDuration,
}

impl std::fmt::Debug for AccountCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCache")
            .field("stats", &self.stats())
            .field("clear_every", &self.clear_every)
            .finish()
    }
}

impl AccountCache {
    pub const DEFAULT_CLEAR_EVERY: Duration = Duration::from_secs(3600);

    pub fn new(clock: Arc<dyn Clock>, clear_every: Duration) -> Self {
        let cleared_at = clock.now();
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                cleared_at,
            })),
            clock,
            clear_every: SignedDuration::try_from(clear_every).unwrap_or(SignedDuration::MAX),
        }
    }

    fn key(voter: &str, chain: Chain) -> (String, Chain) {
        (voter.to_lowercase(), chain)
    }

    fn expire(&self, state: &mut State) {
        let now = self.clock.now();
        if now.duration_since(state.cleared_at) >= self.clear_every {
            tracing::debug!(entries = state.entries.len(), "account cache expired");
            state.entries.clear();
            state.cleared_at = now;
        }
    }

    pub fn get(&self, voter: &str, chain: Chain) -> Option<Account> {
        let mut state = self.state.lock();
        self.expire(&mut state);
        state.entries.get(&Self::key(voter, chain)).cloned()
    }

    pub fn insert(&self, voter: &str, chain: Chain, account: Account) {
        let mut state = self.state.lock();
        self.expire(&mut state);
        state.entries.insert(Self::key(voter, chain), account);
    }

    /// Returns the cached account or fetches it. The lock is not held while
    /// the fetch is in flight.
    pub async fn get_or_fetch(
        &self,
        data: &ChainData,
        chain: Chain,
        voter: &str,
    ) -> Result<Account, GatewayError> {
        if let Some(account) = self.get(voter, chain) {
            return Ok(account);
        }
        let account = data.account_info(chain, voter).await?;
        self.insert(voter, chain, account.clone());
        Ok(account)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.cleared_at = self.clock.now();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            last_cleared: state.cleared_at,
        }
    }

    /// Clears the cache every period until `shutdown` flips to `true`.
    pub fn spawn_clear_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = self.clone();
        let period = Duration::try_from(cache.clear_every).unwrap_or(Self::DEFAULT_CLEAR_EVERY);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stopped| *stopped) => return,
                    _ = ticker.tick() => {
                        cache.clear();
                        tracing::debug!("account cache cleared");
                    }
                }
            }
        })
    }
}
