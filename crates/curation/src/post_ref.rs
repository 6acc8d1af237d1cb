//! Post references and the front-end domains they are resolved against.

use std::{collections::BTreeMap, fmt, str::FromStr};

use curator_gateway::Chain;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostRefError {
    #[error("`{0}` is not a post reference")]
    Malformed(String),
    #[error("invalid post url `{0}`")]
    Url(String),
}

/// How one chain's posts are linked and recognized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEnd {
    /// Prefix for outgoing links, e.g. `https://peakd.com`.
    pub base_url: String,
    /// Host names whose links belong to this chain.
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Front ends per chain. Links whose host matches no chain resolve to Steem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domains(BTreeMap<Chain, FrontEnd>);

impl Default for Domains {
    fn default() -> Self {
        Self(BTreeMap::from([
            (
                Chain::Steem,
                FrontEnd {
                    base_url: "https://steemit.com".to_string(),
                    hosts: vec!["steemit.com".to_string()],
                },
            ),
            (
                Chain::Hive,
                FrontEnd {
                    base_url: "https://peakd.com".to_string(),
                    hosts: vec!["peakd.com".to_string(), "hive.blog".to_string()],
                },
            ),
        ]))
    }
}

impl Domains {
    pub fn new(front_ends: BTreeMap<Chain, FrontEnd>) -> Self {
        Self(front_ends)
    }

    pub fn chain_for_host(&self, host: &str) -> Chain {
        let host = host.trim_start_matches("www.");
        self.0
            .iter()
            .find(|(_, front_end)| {
                front_end
                    .hosts
                    .iter()
                    .any(|known| host.eq_ignore_ascii_case(known))
            })
            .map(|(chain, _)| *chain)
            .unwrap_or(Chain::Steem)
    }

    /// Full link to a post, using `path` (a front-end relative url) when
    /// known.
    pub fn link(&self, post: &PostRef, path: Option<&str>) -> String {
        let base = self
            .0
            .get(&post.chain)
            .map(|front_end| front_end.base_url.trim_end_matches('/'))
            .unwrap_or_default();
        match path.filter(|path| !path.is_empty()) {
            Some(path) => format!("{base}{path}"),
            None => format!("{base}/{post}"),
        }
    }

    /// Parses a full link, `@author/permlink` or `author/permlink`.
    /// Bare references belong to `default_chain`.
    pub fn parse(&self, input: &str, default_chain: Chain) -> Result<PostRef, PostRefError> {
        let input = input.trim();
        if input.contains("://") {
            let url = Url::parse(input).map_err(|_| PostRefError::Url(input.to_string()))?;
            let chain = url
                .host_str()
                .map(|host| self.chain_for_host(host))
                .ok_or_else(|| PostRefError::Url(input.to_string()))?;
            let segments: Vec<_> = url
                .path_segments()
                .map(|segments| segments.filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            let at = segments
                .iter()
                .rposition(|segment| segment.starts_with('@'))
                .ok_or_else(|| PostRefError::Malformed(input.to_string()))?;
            let permlink = segments
                .get(at + 1)
                .ok_or_else(|| PostRefError::Malformed(input.to_string()))?;
            return PostRef::new(chain, segments[at], permlink)
                .ok_or_else(|| PostRefError::Malformed(input.to_string()));
        }

        let (author, permlink) = input
            .split_once('/')
            .ok_or_else(|| PostRefError::Malformed(input.to_string()))?;
        PostRef::new(default_chain, author, permlink)
            .ok_or_else(|| PostRefError::Malformed(input.to_string()))
    }
}

/// A post on a specific chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PostRef {
    pub chain: Chain,
    pub author: String,
    pub permlink: String,
}

impl PostRef {
    /// `None` when either part is empty or the permlink has a path
    /// separator.
    pub fn new(chain: Chain, author: &str, permlink: &str) -> Option<Self> {
        let author = author.trim().trim_start_matches('@');
        let permlink = permlink.trim().trim_end_matches('/');
        if author.is_empty() || permlink.is_empty() || permlink.contains('/') {
            return None;
        }
        Some(Self {
            chain,
            author: author.to_lowercase(),
            permlink: permlink.to_string(),
        })
    }
}

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}/{}", self.author, self.permlink)
    }
}

impl FromStr for PostRef {
    type Err = PostRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domains::default().parse(s, Chain::Steem)
    }
}
