//! Curation agent for Steem and Hive.

mod broadcaster;
mod config;
mod stores;
mod telegram;

use std::{sync::Arc, time::Duration};

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use curator::{
    AccountCache, Collaborators, Publisher, Stake, VoteTimingPolicy, VoteValueEstimator,
    VoterAnalyzer, collaborators::SettingsStore as _,
};
use curator_gateway::{Chain, ChainData, Clock, Gateway, SystemClock, filter_delegations};
use eyre::{OptionExt as _, WrapErr as _};
use jiff::SignedDuration;
use serde_json::json;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::{
    broadcaster::SidecarBroadcaster,
    config::Config,
    stores::{ConfiguredUsers, MemorySettings},
    telegram::TelegramNotifier,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the config file.
    #[arg(short, long, value_name = "FILE", default_value = "curator.toml")]
    config: Utf8PathBuf,

    /// Log directives used when `RUST_LOG` is not set.
    #[arg(long, value_name = "DIRECTIVE", default_value = "info,curator=debug")]
    filter_directives: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the configured authors and vote on their fresh posts.
    Run,
    /// Print the significant voters of a post and the vote time they suggest.
    Analyze {
        /// Front-end link, `@author/permlink` or `author/permlink`.
        post: String,
        /// Chain of bare `@author/permlink` references.
        #[arg(long, default_value = "steem")]
        chain: Chain,
        #[arg(long, default_value_t = 0.0)]
        min_importance: f64,
    },
    /// Estimate what a vote is worth.
    VoteValue {
        /// Vote weight, 10000 = 100%.
        #[arg(long, allow_hyphen_values = true)]
        percent: i64,
        /// Stake in vesting shares. Defaults to the curator's own stake.
        #[arg(long, conflicts_with = "account")]
        stake: Option<f64>,
        /// Value the vote with this account's effective stake.
        #[arg(long)]
        account: Option<String>,
        #[arg(long, default_value = "steem")]
        chain: Chain,
        /// Voting power, 10000 = 100%.
        #[arg(long)]
        voting_power: Option<u16>,
    },
    /// List active delegations to an account, filtered by the
    /// `delegation_min_sp` and `delegation_max_sp` settings.
    Delegations {
        account: String,
        #[arg(long, default_value = "steem")]
        chain: Chain,
        /// Only consider delegations made within this many days.
        #[arg(long)]
        days: Option<i64>,
    },
}

/// Chain access and analysis shared by every subcommand.
struct Services {
    config: Config,
    settings: Arc<MemorySettings>,
    data: Arc<ChainData>,
    cache: AccountCache,
    estimator: Arc<VoteValueEstimator>,
    analyzer: Arc<VoterAnalyzer>,
}

impl Services {
    fn build(config: Config) -> eyre::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let gateway = Gateway::http(config.endpoints.clone(), &config.gateway)
            .wrap_err("failed building the rpc client")?;
        let data = Arc::new(ChainData::new(
            gateway,
            clock.clone(),
            config.history.clone(),
        ));
        let cache = AccountCache::new(
            clock,
            Duration::from_secs(config.cache.clear_every_secs.max(1)),
        );
        let settings = Arc::new(MemorySettings::new(config.settings.0.clone()));
        let estimator = Arc::new(
            VoteValueEstimator::new(data.clone(), cache.clone(), config.estimator.clone())
                .with_settings(settings.clone()),
        );
        let analyzer = Arc::new(VoterAnalyzer::new(
            data.clone(),
            cache.clone(),
            estimator.clone(),
            config.analyzer.clone(),
        ));
        Ok(Self {
            config,
            settings,
            data,
            cache,
            estimator,
            analyzer,
        })
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::builder()
            .parse(&args.filter_directives)
            .wrap_err("failed to parse provided filter directives")?,
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(config = %args.config, "loading configuration");
    let config = Config::load(&args.config)?;
    let services = Services::build(config)?;

    match args.cmd {
        Command::Run => run(services).await,
        Command::Analyze {
            post,
            chain,
            min_importance,
        } => analyze(services, &post, chain, min_importance).await,
        Command::VoteValue {
            percent,
            stake,
            account,
            chain,
            voting_power,
        } => {
            let stake = match (stake, account) {
                (Some(vests), _) => Stake::Vests(vests),
                (None, Some(account)) => Stake::OfAccount(account),
                (None, None) => Stake::Curator,
            };
            vote_value(services, chain, percent, stake, voting_power).await
        }
        Command::Delegations {
            account,
            chain,
            days,
        } => delegations(services, &account, chain, days).await,
    }
}

async fn run(services: Services) -> eyre::Result<()> {
    let Services {
        config,
        settings,
        data,
        cache,
        analyzer,
        ..
    } = services;

    let notifier = Arc::new(TelegramNotifier::new(&config.telegram)?);
    let broadcaster = Arc::new(
        SidecarBroadcaster::new(config.broadcaster.signer_url.as_ref())
            .wrap_err("invalid signer url")?,
    );
    let users = Arc::new(ConfiguredUsers::new(config.users.clone()));
    let publisher = Arc::new(Publisher::new(
        data,
        analyzer,
        VoteTimingPolicy::new(config.policy.clone()),
        config.domains.clone(),
        Collaborators {
            settings,
            users,
            broadcaster,
            notifier,
        },
        config.publisher.clone(),
    ));
    tracing::info!(
        chains = ?config.users.keys().collect::<Vec<_>>(),
        poll_interval_secs = config.publisher.poll_interval_secs,
        "starting curator"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache_task = cache.spawn_clear_task(shutdown_rx);
    let mut publisher_task = {
        let publisher = publisher.clone();
        tokio::spawn(async move { publisher.run().await })
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
        _ = &mut publisher_task => tracing::warn!("publisher exited on its own"),
    }

    publisher.stop();
    let _ = shutdown_tx.send(true);
    if !publisher_task.is_finished()
        && tokio::time::timeout(Duration::from_secs(10), &mut publisher_task)
            .await
            .is_err()
    {
        tracing::warn!("publisher did not stop in time");
        publisher_task.abort();
    }
    cache_task.abort();

    Ok(())
}

async fn analyze(
    services: Services,
    input: &str,
    default_chain: Chain,
    min_importance: f64,
) -> eyre::Result<()> {
    let post = services.config.domains.parse(input, default_chain)?;
    let curator = services
        .settings
        .get(&format!("{}_curator", post.chain), Some(post.chain))
        .await?
        .unwrap_or_default();

    let voters = services
        .analyzer
        .analyze(&post, &curator, min_importance)
        .await?;
    let policy = VoteTimingPolicy::new(services.config.policy.clone());
    let decision = policy.decide(&voters, (!curator.is_empty()).then_some(curator.as_str()));

    let report = json!({
        "post": post.to_string(),
        "chain": post.chain,
        "voters": voters,
        "policy": decision,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::debug!(stats = ?services.cache.stats(), "account cache");
    Ok(())
}

async fn vote_value(
    services: Services,
    chain: Chain,
    percent: i64,
    stake: Stake,
    voting_power: Option<u16>,
) -> eyre::Result<()> {
    let estimate = services
        .estimator
        .estimate(chain, percent, &stake, voting_power)
        .await;
    if let Some(err) = estimate.error {
        return Err(err).wrap_err("vote value could not be estimated");
    }
    let secondary = match chain {
        Chain::Steem => "SBD",
        Chain::Hive => "HBD",
    };
    println!(
        "{:.3} {}\n{:.3} {secondary}",
        estimate.native_value,
        chain.native_symbol(),
        estimate.secondary_value,
    );
    if let Some(components) = estimate.components {
        tracing::debug!(?components, "vote value formula");
    }
    Ok(())
}

async fn delegations(
    services: Services,
    account: &str,
    chain: Chain,
    days: Option<i64>,
) -> eyre::Result<()> {
    let since = days
        .map(|days| {
            services
                .data
                .clock()
                .now()
                .checked_sub(SignedDuration::from_hours(days.saturating_mul(24)))
        })
        .transpose()
        .wrap_err("--days reaches too far back")?;
    let history = services
        .data
        .delegation_history(chain, account, since)
        .await
        .wrap_err_with(|| format!("failed reading history of {account}"))?;
    let steem_per_vests = services
        .data
        .dynamic_global_properties(chain)
        .await?
        .steem_per_vests()
        .ok_or_eyre("chain reported no vesting shares")?;

    let min_power = services.settings.number("delegation_min_sp").unwrap_or(0.0);
    let max_power = services.settings.number("delegation_max_sp");
    let kept = filter_delegations(history, steem_per_vests, min_power, max_power);
    tracing::info!(%account, %chain, count = kept.len(), min_power, ?max_power, "delegations filtered");
    for (delegation, power) in kept {
        println!(
            "{}\t{power:.3} {}\t{}",
            delegation.delegator,
            chain.native_symbol(),
            delegation.timestamp,
        );
    }
    Ok(())
}
