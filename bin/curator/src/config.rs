//! The `curator.toml` file.

use std::collections::BTreeMap;

use camino::Utf8Path;
use curator::{
    AnalyzerConfig, Domains, EstimatorConfig, PolicyConfig, PublisherConfig,
    collaborators::UserVoteConfig,
};
use curator_gateway::{Chain, Endpoints, GatewayConfig, HistoryConfig};
use eyre::WrapErr as _;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default = "Endpoints::public_defaults")]
    pub(crate) endpoints: Endpoints,
    #[serde(default)]
    pub(crate) domains: Domains,
    #[serde(default)]
    pub(crate) gateway: GatewayConfig,
    #[serde(default)]
    pub(crate) history: HistoryConfig,
    #[serde(default)]
    pub(crate) cache: CacheConfig,
    #[serde(default)]
    pub(crate) analyzer: AnalyzerConfig,
    #[serde(default)]
    pub(crate) policy: PolicyConfig,
    #[serde(default)]
    pub(crate) estimator: EstimatorConfig,
    #[serde(default)]
    pub(crate) publisher: PublisherConfig,
    #[serde(default)]
    pub(crate) telegram: TelegramConfig,
    #[serde(default)]
    pub(crate) broadcaster: BroadcasterConfig,
    /// Initial contents of the settings store.
    #[serde(default)]
    pub(crate) settings: SeedSettings,
    /// Monitored authors per chain.
    #[serde(default)]
    pub(crate) users: BTreeMap<Chain, BTreeMap<String, UserVoteConfig>>,
}

impl Config {
    pub(crate) fn load(path: &Utf8Path) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed reading config file `{path}`"))?;
        Self::parse(&contents).wrap_err_with(|| format!("invalid config file `{path}`"))
    }

    pub(crate) fn parse(contents: &str) -> eyre::Result<Self> {
        let config: Self = toml::from_str(contents)?;
        for chain in Chain::ALL {
            if config.endpoints.nodes(chain).is_empty() && config.users.contains_key(&chain) {
                eyre::bail!("users are configured for {chain} but it has no endpoints");
            }
        }
        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct CacheConfig {
    pub(crate) clear_every_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            clear_every_secs: 3600,
        }
    }
}

#[derive(Clone, Default, Deserialize, derive_more::Debug)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct TelegramConfig {
    #[debug(skip)]
    pub(crate) bot_token: Option<String>,
    /// Comma separated chat ids.
    pub(crate) admin_ids: Option<String>,
    pub(crate) api_url: Option<Url>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct BroadcasterConfig {
    /// Signing sidecar that turns vote requests into broadcast transactions.
    pub(crate) signer_url: Option<Url>,
}

/// Settings values may hold keys, so only the names are printed.
#[derive(Clone, Default, Deserialize, derive_more::Debug)]
#[serde(transparent)]
#[debug("SeedSettings({:?})", _0.keys().collect::<Vec<_>>())]
pub(crate) struct SeedSettings(pub(crate) BTreeMap<String, String>);
