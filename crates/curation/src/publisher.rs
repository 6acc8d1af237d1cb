//! The polling loop that finds fresh posts and votes on them.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use curator_gateway::{Chain, ChainData, GatewayError, types::Post};
use futures::{StreamExt as _, stream};
use jiff::SignedDuration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    analyzer::VoterAnalyzer,
    collaborators::{
        BroadcastError, CuratorError, CuratorInfo, Notifier, SettingsStore, StoreError,
        UserDirectory, UserVoteConfig, VoteBroadcaster, VoteRequest, parse_test_mode,
    },
    policy::VoteTimingPolicy,
    post_ref::{Domains, PostRef},
    power::account_voting_power,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Chains scanned at the same time.
    pub chain_concurrency: usize,
    pub poll_interval_secs: u64,
    /// Pause after a failed poll.
    pub error_backoff_secs: u64,
    /// Posts older than this are not considered fresh.
    pub max_post_age_secs: u64,
    /// Voting power in percent at or below which no vote is cast.
    pub voting_power_floor: f64,
    /// Delay used when optimal timing has nothing to learn from.
    pub default_delay_minutes: f64,
    /// Previous posts of the author analysed for optimal timing.
    pub previous_posts: u32,
    pub previous_post_min_importance: f64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            chain_concurrency: 2,
            poll_interval_secs: 5,
            error_backoff_secs: 10,
            max_post_age_secs: 300,
            voting_power_floor: 89.0,
            default_delay_minutes: 5.0,
            previous_posts: 1,
            previous_post_min_importance: 0.1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Curator(#[from] CuratorError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a vote was not cast.
#[derive(Clone, Debug, PartialEq)]
pub enum Declined {
    NotSubscribed,
    DailyCap { votes_today: u32, limit: u32 },
    LowVotingPower(f64),
    AlreadyVoted,
    Stopped,
}

/// Outcome of handling one fresh post.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Voted {
        delay_minutes: f64,
        /// `false` in test mode, where the vote is only logged.
        broadcast: bool,
    },
    Declined(Declined),
    Failed(String),
}

/// The host-provided capabilities the publisher drives.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub users: Arc<dyn UserDirectory>,
    pub broadcaster: Arc<dyn VoteBroadcaster>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Publisher {
    data: Arc<ChainData>,
    analyzer: Arc<VoterAnalyzer>,
    policy: VoteTimingPolicy,
    domains: Domains,
    collaborators: Collaborators,
    config: PublisherConfig,
    published: Mutex<HashMap<Chain, HashSet<String>>>,
    stop: watch::Sender<bool>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(
        data: Arc<ChainData>,
        analyzer: Arc<VoterAnalyzer>,
        policy: VoteTimingPolicy,
        domains: Domains,
        collaborators: Collaborators,
        config: PublisherConfig,
    ) -> Self {
        Self {
            data,
            analyzer,
            policy,
            domains,
            collaborators,
            config,
            published: Mutex::new(HashMap::new()),
            stop: watch::Sender::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        !*self.stop.borrow()
    }

    /// Stops the loop. Waits in progress return immediately and no new
    /// post is picked up.
    pub fn stop(&self) {
        info!("stopping publisher");
        self.stop.send_replace(true);
    }

    /// Flips to `true` once [`Self::stop`] was called.
    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Sleeps for `duration` unless stopped first. Returns whether the full
    /// duration elapsed.
    pub async fn wait(&self, duration: Duration) -> bool {
        let mut stopped = self.stop.subscribe();
        if *stopped.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = stopped.wait_for(|stopped| *stopped) => false,
        }
    }

    /// Polls until stopped.
    pub async fn run(&self) {
        info!("publisher started");
        while self.is_running() {
            let pause = match self.poll_once().await {
                Ok(()) => self.config.poll_interval_secs,
                Err(err) => {
                    error!(%err, "publisher poll failed");
                    self.config.error_backoff_secs
                }
            };
            self.wait(Duration::from_secs(pause)).await;
        }
        info!("publisher stopped");
    }

    /// Scans every chain with subscribed users once.
    ///
    /// A chain whose users cannot be listed is skipped for this cycle. The
    /// listing error is returned only when no chain was left to scan.
    pub async fn poll_once(&self) -> Result<(), StoreError> {
        let mut work = Vec::new();
        let mut failure = None;
        for chain in Chain::ALL {
            match self.collaborators.users.usernames(chain).await {
                Ok(users) if users.is_empty() => debug!(%chain, "no users to monitor"),
                Ok(users) => work.push((chain, users)),
                Err(err) => {
                    warn!(%chain, %err, "failed listing users, skipping chain");
                    failure = Some(err);
                }
            }
        }
        if work.is_empty()
            && let Some(err) = failure
        {
            return Err(err);
        }
        debug!(chains = work.len(), "polling for fresh posts");

        stream::iter(work)
            .map(|(chain, users)| self.process_chain(chain, users))
            .buffer_unordered(self.config.chain_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;
        Ok(())
    }

    async fn process_chain(&self, chain: Chain, users: Vec<String>) {
        let max_age = SignedDuration::from_secs(self.config.max_post_age_secs as i64);
        let posts = self.data.fresh_posts(chain, &users, max_age).await;
        let fresh: Vec<Post> = {
            let mut published = self.published.lock();
            let seen = published.entry(chain).or_default();
            posts
                .into_iter()
                .filter(|post| seen.insert(format!("@{}/{}", post.author, post.permlink)))
                .collect()
        };

        for post in fresh {
            if !self.is_running() {
                break;
            }
            let decision = self.handle_post(chain, &post).await;
            info!(%chain, author = %post.author, permlink = %post.permlink, ?decision, "post handled");
        }
    }

    /// Decides on one post and votes when due. Every path that reaches the
    /// vote decision is reported through the notifier.
    pub async fn handle_post(&self, chain: Chain, post: &Post) -> Decision {
        let Some(post_ref) = PostRef::new(chain, &post.author, &post.permlink) else {
            return Decision::Failed(format!("malformed post @{}/{}", post.author, post.permlink));
        };
        let link = self.domains.link(&post_ref, Some(&post.url));

        let user = match self.collaborators.users.config_for_post(&post_ref).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(%link, "author not subscribed");
                return Decision::Declined(Declined::NotSubscribed);
            }
            Err(err) => {
                error!(%link, %err, "failed reading user configuration");
                return Decision::Failed(err.to_string());
            }
        };

        match self.vote_on(&post_ref, &link, &user).await {
            Ok(decision) => decision,
            Err(err) => {
                error!(%link, %err, "vote handling failed");
                self.notify(&format!("Error during vote: {err}")).await;
                Decision::Failed(err.to_string())
            }
        }
    }

    async fn notify(&self, message: &str) {
        self.collaborators.notifier.notify(message).await;
    }

    async fn vote_on(
        &self,
        post: &PostRef,
        link: &str,
        user: &UserVoteConfig,
    ) -> Result<Decision, PublishError> {
        let chain = post.chain;
        let tag = chain.as_str().to_uppercase();
        let curator = CuratorInfo::load(self.collaborators.settings.as_ref(), chain).await?;
        let account = self.data.account_info(chain, &curator.username).await?;
        let voting_power = account_voting_power(&account, self.data.clock().now());

        let votes_today = self
            .data
            .count_votes_today(chain, &curator.username, &post.author)
            .await?;
        if votes_today >= user.max_votes_per_day {
            let message = format!(
                "[{tag}] Vote skipped: daily limit ({}) reached for {}\n{link}",
                user.max_votes_per_day, post.author
            );
            info!(%link, votes_today, limit = user.max_votes_per_day, "daily vote limit reached");
            self.notify(&message).await;
            return Ok(Decision::Declined(Declined::DailyCap {
                votes_today,
                limit: user.max_votes_per_day,
            }));
        }

        let delay = if user.uses_optimal_time() {
            let (delay, reason) = self.optimal_delay(post, &curator.username).await;
            let label = if reason.is_some() { "OPTIMAL" } else { "DEFAULT" };
            let reason = reason.unwrap_or_else(|| "No previous post found".to_string());
            self.notify(&format!(
                "[{tag}] (VP: {voting_power:.2}, {label}: {delay:.1} min)\n{reason}\n{link}"
            ))
            .await;
            delay
        } else {
            let delay = user.vote_delay.unwrap_or(self.config.default_delay_minutes);
            self.notify(&format!(
                "[{tag}] (VP: {voting_power:.2}, DELAY: {delay} min)\n{link}"
            ))
            .await;
            delay
        };

        if voting_power <= self.config.voting_power_floor {
            info!(%link, voting_power, "voting power too low");
            self.notify("Not voted! Voting power too low.").await;
            return Ok(Decision::Declined(Declined::LowVotingPower(voting_power)));
        }

        let (current, votes) = self
            .data
            .post_votes(chain, &post.author, &post.permlink)
            .await?;
        if votes
            .iter()
            .any(|vote| vote.voter.eq_ignore_ascii_case(&curator.username))
        {
            info!(%link, "already voted");
            self.notify(&format!("Already voted for {link}")).await;
            return Ok(Decision::Declined(Declined::AlreadyVoted));
        }

        if !self.is_running() {
            info!(%link, "publisher stopped before voting");
            self.notify(&format!("Not voted: publisher stopping\n{link}")).await;
            return Ok(Decision::Declined(Declined::Stopped));
        }
        let offset = SignedDuration::try_from_secs_f64(delay.max(0.0) * 60.0).unwrap_or_default();
        let target = current.created + offset;
        let remaining = target.duration_since(self.data.clock().now());
        if remaining.is_positive() {
            info!(%link, minutes = remaining.as_secs_f64() / 60.0, "waiting before voting");
            let remaining = Duration::try_from(remaining).unwrap_or_default();
            if !self.wait(remaining).await {
                info!(%link, "publisher stopped while waiting to vote");
                self.notify(&format!("Not voted: publisher stopping\n{link}")).await;
                return Ok(Decision::Declined(Declined::Stopped));
            }
        }

        let test_mode = parse_test_mode(
            self.collaborators
                .settings
                .get("test_mode", None)
                .await?
                .as_deref(),
        );
        let request = VoteRequest {
            chain,
            voter: curator.username.clone(),
            author: post.author.clone(),
            permlink: post.permlink.clone(),
            posting_key: curator.posting_key.clone(),
            weight: user.weight_bps(),
        };
        if test_mode {
            info!(?request, "test mode, vote not broadcast");
        } else {
            self.collaborators.broadcaster.cast_vote(&request).await?;
            info!(?request, "vote broadcast");
        }
        self.notify("Voted!").await;

        Ok(Decision::Voted {
            delay_minutes: delay,
            broadcast: !test_mode,
        })
    }

    /// Delay learned from the author's previous posts, with the policy's
    /// explanation. Falls back to the default delay and no explanation
    /// when there is nothing to learn from.
    async fn optimal_delay(&self, post: &PostRef, curator: &str) -> (f64, Option<String>) {
        let previous = match self
            .data
            .previous_posts(post.chain, &post.author, self.config.previous_posts)
            .await
        {
            Ok(previous) => previous,
            Err(err) => {
                warn!(%post, %err, "failed reading previous posts");
                Vec::new()
            }
        };
        if previous.is_empty() {
            return (self.config.default_delay_minutes, None);
        }

        let mut voters = Vec::new();
        for previous in previous {
            let Some(previous) = PostRef::new(post.chain, &previous.author, &previous.permlink)
            else {
                continue;
            };
            match self
                .analyzer
                .analyze(&previous, curator, self.config.previous_post_min_importance)
                .await
            {
                Ok(records) => voters.extend(records),
                Err(err) => warn!(post = %previous, %err, "failed analysing previous post"),
            }
        }
        let result = self.policy.decide(&voters, Some(curator));
        (
            result.optimal_time,
            Some(format!("{} (based on previous posts)", result.explanation)),
        )
    }
}
