use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Chain;

/// Ordered node URLs per chain.
///
/// Lists are consulted front to back on every call; there is no session
/// affinity, so a node that recovers is picked up again on the next call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoints {
    nodes: BTreeMap<Chain, Vec<String>>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of the node list for `chain`, replacing any
    /// previous list.
    pub fn with_nodes<I, S>(mut self, chain: Chain, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes
            .insert(chain, nodes.into_iter().map(Into::into).collect());
        self
    }

    pub fn nodes(&self, chain: Chain) -> &[String] {
        self.nodes.get(&chain).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.nodes.keys().copied()
    }

    /// The public nodes the curator has historically used.
    pub fn public_defaults() -> Self {
        Self::new()
            .with_nodes(
                Chain::Steem,
                [
                    "https://api.moecki.online",
                    "https://api.steemit.com",
                    "https://api.justyy.com",
                ],
            )
            .with_nodes(
                Chain::Hive,
                [
                    "https://api.deathwing.me",
                    "https://api.hive.blog",
                    "https://api.openhive.network",
                ],
            )
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoints;
    use crate::Chain;

    #[test]
    fn preserves_configured_order() {
        let endpoints = Endpoints::new().with_nodes(Chain::Steem, ["https://a", "https://b"]);
        assert_eq!(endpoints.nodes(Chain::Steem), ["https://a", "https://b"]);
        assert!(endpoints.nodes(Chain::Hive).is_empty());
    }

    #[test]
    fn deserializes_from_chain_keyed_table() {
        let endpoints: Endpoints =
            serde_json::from_str(r#"{"hive": ["https://h1"], "steem": ["https://s1", "https://s2"]}"#)
                .unwrap();
        assert_eq!(endpoints.nodes(Chain::Hive), ["https://h1"]);
        assert_eq!(endpoints.nodes(Chain::Steem).len(), 2);
    }
}
