//! Curation decisions: who matters among a post's voters, when to vote, and
//! what a vote is worth.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod analyzer;
pub mod cache;
pub mod collaborators;
pub mod policy;
pub mod post_ref;
pub mod power;
pub mod publisher;
pub mod value;

#[cfg(test)]
mod tests;

pub use analyzer::{AnalyzeError, AnalyzerConfig, VoterAnalyzer, VoterRecord};
pub use cache::{AccountCache, CacheStats};
pub use policy::{PolicyConfig, VotePolicyResult, VoteTimingPolicy, VoterGroups};
pub use post_ref::{Domains, FrontEnd, PostRef, PostRefError};
pub use publisher::{Collaborators, Decision, Declined, Publisher, PublisherConfig};
pub use value::{EstimationError, EstimatorConfig, Stake, VoteValueEstimate, VoteValueEstimator};
