use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A Steem-protocol network the curator can act on.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[display("steem")]
    Steem,
    #[display("hive")]
    Hive,
}

impl Chain {
    pub const ALL: [Self; 2] = [Self::Steem, Self::Hive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steem => "steem",
            Self::Hive => "hive",
        }
    }

    /// Symbol of the liquid native token, as it appears in asset strings.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Self::Steem => "STEEM",
            Self::Hive => "HIVE",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown chain `{0}`, expected `steem` or `hive`")]
pub struct UnknownChain(String);

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steem" => Ok(Self::Steem),
            "hive" => Ok(Self::Hive),
            _ => Err(UnknownChain(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Chain;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Steem".parse::<Chain>().unwrap(), Chain::Steem);
        assert_eq!(" hive ".parse::<Chain>().unwrap(), Chain::Hive);
        assert!("blurt".parse::<Chain>().is_err());
    }

    #[test]
    fn displays_lowercase() {
        assert_eq!(Chain::Hive.to_string(), "hive");
        assert_eq!(Chain::Steem.as_str(), "steem");
    }
}
