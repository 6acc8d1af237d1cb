use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use curator_gateway::{
    Chain, ChainData, Clock, Endpoints, Gateway, HistoryConfig,
    testing::{ManualClock, MockTransport},
};
use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{
    AccountCache, AnalyzerConfig, Collaborators, Decision, Declined, Domains, EstimationError,
    EstimatorConfig, PostRef, Publisher, PublisherConfig, Stake, VoteTimingPolicy, VoteValueEstimator,
    VoterAnalyzer,
    collaborators::{
        BroadcastError, Notifier, SettingsStore, StoreError, UserDirectory, UserVoteConfig,
        VoteBroadcaster, VoteRequest,
    },
    value::ValueRequest,
};

const NODE: &str = "https://node.example";

fn now() -> Timestamp {
    "2024-05-01T12:00:00Z".parse().unwrap()
}

fn chain_time(ts: Timestamp) -> String {
    ts.strftime("%Y-%m-%dT%H:%M:%S").to_string()
}

fn mins(n: i64) -> SignedDuration {
    SignedDuration::from_mins(n)
}

fn vote(voter: &str, rshares: i64, at: Option<Timestamp>) -> Value {
    let mut vote = json!({ "voter": voter, "rshares": rshares.to_string(), "percent": 10000 });
    if let Some(at) = at {
        vote["time"] = json!(chain_time(at));
    }
    vote
}

fn post(author: &str, permlink: &str, created: Timestamp, votes: Vec<Value>) -> Value {
    json!({
        "author": author,
        "permlink": permlink,
        "created": chain_time(created),
        "url": format!("/life/@{author}/{permlink}"),
        "active_votes": votes,
    })
}

/// Economics of the reference vote value: 0.5 STEEM per VESTS, a reward
/// fund of `reward_balance` over 5e12 claims, one SBD per 0.25 STEEM.
fn with_economics(transport: MockTransport, reward_balance: &str) -> MockTransport {
    transport
        .respond(
            "condenser_api.get_dynamic_global_properties",
            json!({
                "total_vesting_fund_steem": "1000000.000 STEEM",
                "total_vesting_shares": "2000000.000000 VESTS",
            }),
        )
        .respond(
            "condenser_api.get_reward_fund",
            json!({ "reward_balance": reward_balance, "recent_claims": "5000000000000" }),
        )
        .respond(
            "condenser_api.get_current_median_history_price",
            json!({ "base": "1.000 SBD", "quote": "0.250 STEEM" }),
        )
}

/// Every account holds 100000 VESTS except `ghost`, which does not exist.
/// The curator's voting power is `curator_power` as of `last_vote`.
fn with_accounts(transport: MockTransport, curator_power: u16, last_vote: Timestamp) -> MockTransport {
    transport.on("condenser_api.get_accounts", move |_, params| {
        let name = params[0][0].as_str().unwrap_or_default();
        if name == "ghost" {
            return Ok(json!([]));
        }
        let mut account = json!({
            "name": name,
            "vesting_shares": "100000.000000 VESTS",
            "reputation": "95832978796820",
        });
        if name == "curator" {
            account["voting_power"] = json!(curator_power);
            account["last_vote_time"] = json!(chain_time(last_vote));
        }
        Ok(json!([account]))
    })
}

fn with_posts(transport: MockTransport, posts: Vec<Value>) -> MockTransport {
    let by_permlink: HashMap<String, Value> = posts
        .into_iter()
        .map(|post| (post["permlink"].as_str().unwrap().to_string(), post))
        .collect();
    let votes = by_permlink.clone();
    transport
        .on("condenser_api.get_content", move |_, params| {
            let permlink = params[1].as_str().unwrap_or_default();
            Ok(by_permlink
                .get(permlink)
                .cloned()
                .unwrap_or_else(|| json!({ "author": "", "permlink": "", "created": "1970-01-01T00:00:00" })))
        })
        .on("condenser_api.get_active_votes", move |_, params| {
            let permlink = params[1].as_str().unwrap_or_default();
            Ok(votes
                .get(permlink)
                .map(|post| post["active_votes"].clone())
                .unwrap_or_else(|| json!([])))
        })
}

struct Stack {
    data: Arc<ChainData>,
    cache: AccountCache,
    estimator: Arc<VoteValueEstimator>,
    analyzer: Arc<VoterAnalyzer>,
}

fn stack(transport: &MockTransport) -> Stack {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
    let endpoints = Endpoints::new()
        .with_nodes(Chain::Steem, [NODE])
        .with_nodes(Chain::Hive, [NODE]);
    let gateway = Gateway::new(endpoints, Arc::new(transport.clone()));
    let data = Arc::new(ChainData::new(
        gateway,
        clock.clone(),
        HistoryConfig::default(),
    ));
    let cache = AccountCache::new(clock, AccountCache::DEFAULT_CLEAR_EVERY);
    let estimator = Arc::new(VoteValueEstimator::new(
        data.clone(),
        cache.clone(),
        EstimatorConfig::default(),
    ));
    let analyzer = Arc::new(VoterAnalyzer::new(
        data.clone(),
        cache.clone(),
        estimator.clone(),
        AnalyzerConfig::default(),
    ));
    Stack {
        data,
        cache,
        estimator,
        analyzer,
    }
}

fn hello() -> PostRef {
    PostRef::new(Chain::Steem, "alice", "hello").unwrap()
}

#[tokio::test]
async fn estimator_applies_reward_formula_to_live_economics() {
    let transport = with_accounts(
        with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
        10000,
        now(),
    );
    let stack = stack(&transport);

    let estimate = stack
        .estimator
        .estimate(Chain::Steem, 10000, &Stake::Vests(500_000.0), Some(9200))
        .await;
    assert!(estimate.is_ok());
    assert!((estimate.native_value - 1.8498).abs() < 1e-9);
    assert!((estimate.secondary_value - 7.3992).abs() < 1e-9);

    let own = stack
        .estimator
        .estimate(Chain::Steem, 10000, &Stake::OfAccount("curator".to_string()), None)
        .await;
    assert!((own.native_value - 0.36996).abs() < 1e-9);

    // Economics come from one snapshot.
    assert_eq!(
        transport.calls("condenser_api.get_dynamic_global_properties"),
        1
    );
    assert_eq!(transport.calls("condenser_api.get_reward_fund"), 1);
}

#[tokio::test]
async fn estimator_defaults_to_the_curator_stake() {
    let transport = with_accounts(
        with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
        10000,
        now(),
    );
    let stack = stack(&transport);
    let estimator = VoteValueEstimator::new(
        stack.data.clone(),
        stack.cache.clone(),
        EstimatorConfig::default(),
    )
    .with_settings(MemorySettings::curator());

    let own = estimator
        .estimate(Chain::Steem, 10000, &Stake::Curator, None)
        .await;
    let explicit = estimator
        .estimate(Chain::Steem, 10000, &Stake::OfAccount("curator".to_string()), None)
        .await;
    assert!(own.is_ok());
    assert_eq!(own.native_value, explicit.native_value);
    assert!((own.native_value - 0.36996).abs() < 1e-9);

    let unconfigured = stack
        .estimator
        .estimate(Chain::Steem, 10000, &Stake::Curator, None)
        .await;
    assert_eq!(unconfigured.native_value, 0.0);
    assert!(matches!(unconfigured.error, Some(EstimationError::Curator(_))));
}

#[tokio::test]
async fn estimator_degrades_to_zero_on_bad_reward_fund() {
    let transport = MockTransport::new()
        .reachable(NODE)
        .respond(
            "condenser_api.get_dynamic_global_properties",
            json!({
                "total_vesting_fund_steem": "1000000.000 STEEM",
                "total_vesting_shares": "2000000.000000 VESTS",
            }),
        )
        .respond("condenser_api.get_reward_fund", json!({ "id": 0 }));
    let stack = stack(&transport);

    let estimate = stack
        .estimator
        .estimate(Chain::Steem, 10000, &Stake::Vests(500_000.0), None)
        .await;
    assert!(!estimate.is_ok());
    assert_eq!(estimate.native_value, 0.0);
    assert_eq!(estimate.secondary_value, 0.0);
}

#[tokio::test]
async fn estimator_values_batches() {
    let transport = with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM");
    let stack = stack(&transport);

    let requests = (1..=3)
        .map(|i| ValueRequest {
            voter: format!("v{i}"),
            vote_percent: 10000,
            stake: Stake::Vests(500_000.0 * i as f64),
        })
        .collect();
    let mut values = stack.estimator.estimate_batch(Chain::Steem, requests).await;
    values.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(values.len(), 3);
    assert!((values[2].1.native_value - 3.0 * 1.8498).abs() < 1e-9);
}

#[tokio::test]
async fn analysis_excludes_curator_and_applies_dual_threshold() {
    let created = now() - mins(10);
    let transport = with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "0.000 STEEM"),
            10000,
            now(),
        ),
        vec![post(
            "alice",
            "hello",
            created,
            vec![
                vote("curator", 3_000_000_000_000, Some(created + mins(1))),
                vote("whale", 2_000_000_000_000, Some(created + mins(3))),
                vote("minnow", 500_000_000_000, Some(created + mins(4))),
            ],
        )],
    );
    let stack = stack(&transport);

    let strict = stack.analyzer.analyze(&hello(), "Curator", 1.0).await.unwrap();
    assert_eq!(strict.len(), 1);
    let whale = &strict[0];
    assert_eq!(whale.voter, "whale");
    // Worthless vote: only the stake term of the blend remains.
    assert!((whale.importance - 0.03).abs() < 1e-9);
    assert_eq!(whale.vesting_shares, 100_000.0);
    assert_eq!(whale.vote_delay_minutes, Some(3));

    let all = stack.analyzer.analyze(&hello(), "curator", 0.0).await.unwrap();
    let mut voters: Vec<_> = all.iter().map(|record| record.voter.as_str()).collect();
    voters.sort_unstable();
    assert_eq!(voters, ["minnow", "whale"]);
}

#[tokio::test]
async fn analysis_of_large_posts_only_enriches_leading_voters() {
    let created = now() - mins(30);
    let votes = (0..50)
        .map(|i| vote(&format!("v{i}"), (i + 1) * 1_000_000, Some(created + mins(2))))
        .collect();
    let transport = with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "0.000 STEEM"),
            10000,
            now(),
        ),
        vec![post("alice", "hello", created, votes)],
    );
    let stack = stack(&transport);

    let records = stack.analyzer.analyze(&hello(), "curator", 0.0).await.unwrap();
    assert_eq!(records.len(), 20);
    // The ten highest rshares are enriched, the rest stay light.
    assert_eq!(transport.calls("condenser_api.get_accounts"), 10);
    for record in &records {
        let index: i64 = record.voter[1..].parse().unwrap();
        assert!(index >= 30, "{} is outside the top 30", record.voter);
    }
    let enriched: Vec<_> = records[..10].iter().map(|r| r.vesting_shares).collect();
    assert!(enriched.iter().all(|vests| *vests == 100_000.0));
}

#[tokio::test]
async fn analysis_fetches_each_voter_account_once() {
    let created = now() - mins(10);
    let transport = with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
            10000,
            now(),
        ),
        vec![post(
            "alice",
            "hello",
            created,
            vec![
                vote("whale", 2_000_000_000_000, Some(created + mins(3))),
                vote("Whale", 2_000_000_000_000, Some(created + mins(3))),
            ],
        )],
    );
    let stack = stack(&transport);

    let records = stack.analyzer.analyze(&hello(), "curator", 0.0).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(transport.calls("condenser_api.get_accounts"), 1);

    stack.analyzer.analyze(&hello(), "curator", 0.0).await.unwrap();
    assert_eq!(transport.calls("condenser_api.get_accounts"), 1);
    assert_eq!(stack.cache.stats().entries, 1);
}

#[tokio::test]
async fn analysis_drops_voters_without_accounts_and_estimates_missing_times() {
    let created = now() - mins(90);
    let transport = with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
            10000,
            now(),
        ),
        vec![post(
            "alice",
            "hello",
            created,
            vec![
                vote("ghost", 2_000_000_000_000, Some(created + mins(2))),
                vote("late", 2_000_000_000_000, None),
            ],
        )],
    );
    let stack = stack(&transport);

    let records = stack.analyzer.analyze(&hello(), "curator", 0.0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].voter, "late");
    assert_eq!(records[0].vote_delay_minutes, Some(60));
    assert_eq!(records[0].vote_time, created + mins(60));
    assert!(records[0].steem_vote_value > 0.0);
}

#[tokio::test]
async fn analysis_reads_exact_vote_times_once() {
    let created = now() - mins(90);
    let transport = with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
            10000,
            now(),
        ),
        vec![post(
            "alice",
            "hello",
            created,
            vec![
                vote("amy", 2_000_000_000_000, None),
                vote("ben", 2_000_000_000_000, None),
                vote("cat", 2_000_000_000_000, None),
            ],
        )],
    );
    let stack = stack(&transport);

    let records = stack.analyzer.analyze(&hello(), "curator", 0.0).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(transport.calls("condenser_api.get_active_votes"), 1);
}

#[tokio::test]
async fn analysis_of_missing_post_fails() {
    let transport = with_posts(MockTransport::new().reachable(NODE), Vec::new());
    let stack = stack(&transport);

    let err = stack
        .analyzer
        .analyze(&hello(), "curator", 0.0)
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[derive(Default)]
struct MemorySettings(Mutex<HashMap<String, String>>);

impl MemorySettings {
    fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        let settings = Self::default();
        settings.0.lock().extend(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        Arc::new(settings)
    }

    fn curator() -> Arc<Self> {
        Self::with(&[
            ("steem_curator", "curator"),
            ("steem_curator_posting_key", "5Jsecret"),
        ])
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str, _: Option<Chain>) -> Result<Option<String>, StoreError> {
        Ok(self.0.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _: Option<Chain>) -> Result<bool, StoreError> {
        self.0.lock().insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

#[derive(Default)]
struct Subscribers {
    config: Option<UserVoteConfig>,
    /// Chain whose users cannot be listed.
    failing: Option<Chain>,
    lookups: AtomicUsize,
}

#[async_trait]
impl UserDirectory for Subscribers {
    async fn usernames(&self, chain: Chain) -> Result<Vec<String>, StoreError> {
        if self.failing == Some(chain) {
            return Err(StoreError::new("users", "store offline"));
        }
        Ok(match chain {
            Chain::Steem => vec!["alice".to_string()],
            Chain::Hive => Vec::new(),
        })
    }

    async fn config_for_post(&self, _: &PostRef) -> Result<Option<UserVoteConfig>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.config.clone())
    }
}

#[derive(Default)]
struct RecordingBroadcaster(Mutex<Vec<VoteRequest>>);

#[async_trait]
impl VoteBroadcaster for RecordingBroadcaster {
    async fn cast_vote(&self, request: &VoteRequest) -> Result<(), BroadcastError> {
        self.0.lock().push(request.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.0.lock().push(message.to_string());
    }
}

struct Harness {
    publisher: Arc<Publisher>,
    users: Arc<Subscribers>,
    broadcaster: Arc<RecordingBroadcaster>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(
        transport: &MockTransport,
        settings: Arc<MemorySettings>,
        config: Option<UserVoteConfig>,
    ) -> Self {
        Self::with_users(
            transport,
            settings,
            Subscribers {
                config,
                ..Subscribers::default()
            },
        )
    }

    fn with_users(
        transport: &MockTransport,
        settings: Arc<MemorySettings>,
        users: Subscribers,
    ) -> Self {
        let stack = stack(transport);
        let users = Arc::new(users);
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let publisher = Publisher::new(
            stack.data,
            stack.analyzer,
            VoteTimingPolicy::default(),
            Domains::default(),
            Collaborators {
                settings,
                users: users.clone(),
                broadcaster: broadcaster.clone(),
                notifier: notifier.clone(),
            },
            PublisherConfig::default(),
        );
        Self {
            publisher: Arc::new(publisher),
            users,
            broadcaster,
            notifier,
        }
    }

    fn messages(&self) -> Vec<String> {
        self.notifier.0.lock().clone()
    }

    fn votes_cast(&self) -> usize {
        self.broadcaster.0.lock().len()
    }
}

fn fixed_delay(minutes: f64) -> Option<UserVoteConfig> {
    Some(UserVoteConfig {
        vote_weight: 50.0,
        vote_delay: Some(minutes),
        use_optimal_time: false,
        max_votes_per_day: 3,
    })
}

fn curator_history(votes_on_alice: &[i64]) -> Value {
    let entries: Vec<_> = votes_on_alice
        .iter()
        .enumerate()
        .map(|(index, hours_ago)| {
            json!([index, {
                "timestamp": chain_time(now() - SignedDuration::from_hours(*hours_ago)),
                "op": ["vote", {
                    "voter": "curator",
                    "author": "alice",
                    "permlink": format!("p{index}"),
                    "weight": 10000,
                }],
            }])
        })
        .collect();
    Value::Array(entries)
}

/// A chain where `curator` has `voting_power` as of one day ago, has voted
/// on alice `hours_ago` hours back, and alice just posted `hello`.
fn publishing_chain(curator_power: u16, hours_ago: &[i64], hello_votes: Vec<Value>) -> MockTransport {
    let history = curator_history(hours_ago);
    let hello = post("alice", "hello", now() - mins(10), hello_votes);
    with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
            curator_power,
            now() - SignedDuration::from_hours(24),
        ),
        vec![hello.clone()],
    )
    .respond("condenser_api.get_account_history", history)
    .respond("condenser_api.get_discussions_by_blog", json!([hello]))
}

fn fresh_post() -> curator_gateway::types::Post {
    serde_json::from_value(post("alice", "hello", now() - mins(10), Vec::new())).unwrap()
}

#[tokio::test]
async fn daily_cap_never_reaches_the_broadcaster() {
    let transport = publishing_chain(10000, &[30, 5, 2, 1], Vec::new());
    let settings = MemorySettings::curator();
    settings.0.lock().insert("test_mode".to_string(), "false".to_string());
    let harness = Harness::new(&transport, settings, fixed_delay(0.0));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    assert_eq!(
        decision,
        Decision::Declined(Declined::DailyCap {
            votes_today: 3,
            limit: 3,
        })
    );
    assert_eq!(harness.votes_cast(), 0);
    assert!(harness.messages()[0].contains("daily limit (3)"));
}

#[tokio::test]
async fn votes_when_due_outside_test_mode() {
    let transport = publishing_chain(9000, &[2], vec![vote("bob", 1, None)]);
    let settings = MemorySettings::curator();
    settings.0.lock().insert("test_mode".to_string(), "false".to_string());
    let harness = Harness::new(&transport, settings, fixed_delay(0.0));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    assert_eq!(
        decision,
        Decision::Voted {
            delay_minutes: 0.0,
            broadcast: true,
        }
    );
    let cast = harness.broadcaster.0.lock().clone();
    assert_eq!(cast.len(), 1);
    assert_eq!(cast[0].voter, "curator");
    assert_eq!(cast[0].author, "alice");
    assert_eq!(cast[0].weight, 5000);

    let messages = harness.messages();
    assert_eq!(
        messages[0],
        "[STEEM] (VP: 100.00, DELAY: 0 min)\nhttps://steemit.com/life/@alice/hello"
    );
    assert_eq!(messages.last().map(String::as_str), Some("Voted!"));
}

#[tokio::test]
async fn test_mode_only_logs_the_vote() {
    let transport = publishing_chain(10000, &[], Vec::new());
    let harness = Harness::new(&transport, MemorySettings::curator(), fixed_delay(0.0));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    assert_eq!(
        decision,
        Decision::Voted {
            delay_minutes: 0.0,
            broadcast: false,
        }
    );
    assert_eq!(harness.votes_cast(), 0);
    assert_eq!(harness.messages().last().map(String::as_str), Some("Voted!"));
}

#[tokio::test]
async fn low_voting_power_declines() {
    let transport = publishing_chain(6000, &[], Vec::new());
    let harness = Harness::new(&transport, MemorySettings::curator(), fixed_delay(0.0));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    // 60% stored plus 20% regenerated over a day.
    assert!(matches!(
        decision,
        Decision::Declined(Declined::LowVotingPower(vp)) if (vp - 80.0).abs() < 1e-9
    ));
    assert!(
        harness
            .messages()
            .contains(&"Not voted! Voting power too low.".to_string())
    );
}

#[tokio::test]
async fn existing_vote_declines() {
    let transport = publishing_chain(10000, &[], vec![vote("Curator", 1, None)]);
    let harness = Harness::new(&transport, MemorySettings::curator(), fixed_delay(0.0));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    assert_eq!(decision, Decision::Declined(Declined::AlreadyVoted));
    assert!(
        harness
            .messages()
            .last()
            .is_some_and(|message| message.starts_with("Already voted for"))
    );
}

#[tokio::test]
async fn missing_curator_is_reported() {
    let transport = publishing_chain(10000, &[], Vec::new());
    let harness = Harness::new(&transport, MemorySettings::with(&[]), fixed_delay(0.0));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    assert!(matches!(decision, Decision::Failed(_)));
    assert_eq!(
        harness.messages(),
        ["Error during vote: no curator account configured for steem"]
    );
}

#[tokio::test]
async fn optimal_timing_learns_from_previous_post() {
    let previous_created = now() - SignedDuration::from_hours(24);
    let transport = with_posts(
        with_accounts(
            with_economics(MockTransport::new().reachable(NODE), "1000.000 STEEM"),
            10000,
            now() - SignedDuration::from_hours(24),
        ),
        vec![
            post("alice", "hello", now() - mins(10), Vec::new()),
            post(
                "alice",
                "previous",
                previous_created,
                vec![vote(
                    "whale",
                    2_000_000_000_000,
                    Some(previous_created + mins(3)),
                )],
            ),
        ],
    )
    .respond("condenser_api.get_account_history", json!([]))
    .respond(
        "condenser_api.get_discussions_by_blog",
        json!([
            post("alice", "hello", now() - mins(10), Vec::new()),
            post("bob", "reblogged", now() - mins(20), Vec::new()),
            post("alice", "previous", previous_created, Vec::new()),
        ]),
    );
    let config = UserVoteConfig {
        vote_delay: None,
        ..fixed_delay(0.0).unwrap()
    };
    let harness = Harness::new(&transport, MemorySettings::curator(), Some(config));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    let Decision::Voted { delay_minutes, .. } = decision else {
        panic!("expected a vote, got {decision:?}");
    };
    assert!((delay_minutes - 2.8).abs() < 1e-9);
    let first = &harness.messages()[0];
    assert!(first.contains("OPTIMAL: 2.8 min"), "{first}");
    assert!(first.contains("@whale"), "{first}");
    assert!(first.contains("based on previous posts"), "{first}");
}

#[tokio::test]
async fn optimal_timing_without_history_uses_default_delay() {
    let transport = publishing_chain(10000, &[], Vec::new());
    let config = UserVoteConfig {
        vote_delay: None,
        ..fixed_delay(0.0).unwrap()
    };
    let harness = Harness::new(&transport, MemorySettings::curator(), Some(config));

    let decision = harness
        .publisher
        .handle_post(Chain::Steem, &fresh_post())
        .await;
    assert!(matches!(decision, Decision::Voted { delay_minutes, .. } if delay_minutes == 5.0));
    assert!(harness.messages()[0].contains("DEFAULT: 5.0 min\nNo previous post found"));
}

#[tokio::test]
async fn stop_interrupts_a_long_wait() {
    let transport = MockTransport::new();
    let harness = Harness::new(&transport, MemorySettings::curator(), None);

    let waiting = {
        let publisher = harness.publisher.clone();
        tokio::spawn(async move { publisher.wait(Duration::from_secs(600)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stopped_at = Instant::now();
    harness.publisher.stop();

    let completed = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("wait outlived the stop signal")
        .unwrap();
    assert!(!completed);
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!harness.publisher.wait(Duration::from_secs(600)).await);
}

#[tokio::test]
async fn stop_during_the_vote_delay_declines_without_voting() {
    let transport = publishing_chain(10000, &[], Vec::new());
    let settings = MemorySettings::curator();
    settings.0.lock().insert("test_mode".to_string(), "false".to_string());
    // The post is ten minutes old, so the vote is due in five.
    let harness = Harness::new(&transport, settings, fixed_delay(15.0));

    let handling = {
        let publisher = harness.publisher.clone();
        tokio::spawn(async move { publisher.handle_post(Chain::Steem, &fresh_post()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.publisher.stop();

    let decision = tokio::time::timeout(Duration::from_secs(1), handling)
        .await
        .expect("vote delay outlived the stop signal")
        .unwrap();
    assert_eq!(decision, Decision::Declined(Declined::Stopped));
    assert_eq!(harness.votes_cast(), 0);
    assert_eq!(
        harness.messages().last().map(String::as_str),
        Some("Not voted: publisher stopping\nhttps://steemit.com/life/@alice/hello")
    );
}

#[tokio::test]
async fn run_returns_after_stop() {
    let transport = publishing_chain(10000, &[], Vec::new());
    let harness = Harness::new(&transport, MemorySettings::curator(), None);

    let running = {
        let publisher = harness.publisher.clone();
        tokio::spawn(async move { publisher.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.publisher.stop();
    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("publisher kept running")
        .unwrap();
}

#[tokio::test]
async fn fresh_posts_are_handled_once() {
    let transport = publishing_chain(10000, &[], Vec::new()).respond(
        "condenser_api.get_discussions_by_blog",
        json!([post("alice", "hello", now() - mins(1), Vec::new())]),
    );
    let harness = Harness::new(&transport, MemorySettings::curator(), None);

    harness.publisher.poll_once().await.unwrap();
    harness.publisher.poll_once().await.unwrap();
    assert_eq!(harness.users.lookups.load(Ordering::SeqCst), 1);
    assert!(harness.messages().is_empty());
}

#[tokio::test]
async fn chain_without_user_listing_does_not_block_the_other() {
    let transport = publishing_chain(10000, &[], Vec::new()).respond(
        "condenser_api.get_discussions_by_blog",
        json!([post("alice", "hello", now() - mins(1), Vec::new())]),
    );
    let harness = Harness::with_users(
        &transport,
        MemorySettings::curator(),
        Subscribers {
            failing: Some(Chain::Hive),
            ..Subscribers::default()
        },
    );
    harness.publisher.poll_once().await.unwrap();
    assert_eq!(harness.users.lookups.load(Ordering::SeqCst), 1);

    // Nothing left to scan surfaces the listing failure.
    let harness = Harness::with_users(
        &transport,
        MemorySettings::curator(),
        Subscribers {
            failing: Some(Chain::Steem),
            ..Subscribers::default()
        },
    );
    assert!(harness.publisher.poll_once().await.is_err());
    assert_eq!(harness.users.lookups.load(Ordering::SeqCst), 0);
}
