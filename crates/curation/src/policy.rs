//! When to vote, given who voted on a comparable post and how early.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::analyzer::VoterRecord;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minutes to vote ahead of the earliest top voter.
    pub buffer_minutes: f64,
    pub max_top_voters: usize,
    /// Never vote earlier than this many minutes after creation.
    pub min_vote_time: f64,
    /// Votes worth at least this much widen the set of top voters.
    pub high_value_threshold: f64,
    /// Top voters considered when none is high value.
    pub default_top_count: usize,
    pub default_time: f64,
    /// Delay assumed for voters whose vote time is unknown.
    pub missing_delay_minutes: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: 0.2,
            max_top_voters: 8,
            min_vote_time: 1.0,
            high_value_threshold: 10.0,
            default_top_count: 3,
            default_time: 5.0,
            missing_delay_minutes: 30.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VoterGroup {
    pub voters: Vec<String>,
    pub total_value: f64,
}

/// Top voters bucketed by how soon after creation they voted.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VoterGroups {
    /// Within the first minute.
    pub immediate: VoterGroup,
    /// After one and up to five minutes.
    pub quick: VoterGroup,
    /// After more than five minutes.
    pub delayed: VoterGroup,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VotePolicyResult {
    /// Minutes after post creation.
    pub optimal_time: f64,
    pub explanation: String,
    pub vote_window: (f64, f64),
    pub top_voters: Vec<String>,
    pub groups: VoterGroups,
    pub high_value_count: usize,
    pub earliest_top_voter: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct VoteTimingPolicy {
    config: PolicyConfig,
}

impl VoteTimingPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    fn fallback(&self, explanation: &str) -> VotePolicyResult {
        let time = self.config.default_time;
        VotePolicyResult {
            optimal_time: time,
            explanation: format!("{explanation}, using the default of {time} minutes"),
            vote_window: (time - 0.5, time + 0.5),
            top_voters: Vec::new(),
            groups: VoterGroups::default(),
            high_value_count: 0,
            earliest_top_voter: None,
        }
    }

    fn delay(&self, voter: &VoterRecord) -> f64 {
        voter
            .vote_delay_minutes
            .map_or(self.config.missing_delay_minutes, |delay| delay.max(0) as f64)
    }

    /// Worth of a vote for ranking: its value, or its importance when the
    /// value is unknown.
    fn worth(voter: &VoterRecord) -> f64 {
        if voter.steem_vote_value != 0.0 {
            voter.steem_vote_value
        } else {
            voter.importance
        }
    }

    /// Recommends a vote time just ahead of the fastest influential voter.
    pub fn decide(&self, voters: &[VoterRecord], curator: Option<&str>) -> VotePolicyResult {
        let mut ranked: Vec<&VoterRecord> = voters
            .iter()
            .filter(|voter| curator.is_none_or(|curator| !voter.voter.eq_ignore_ascii_case(curator)))
            .collect();
        if ranked.is_empty() {
            return self.fallback("No voter data available");
        }

        ranked.sort_by(|a, b| b.steem_vote_value.total_cmp(&a.steem_vote_value));
        let high_value_count = ranked
            .iter()
            .filter(|voter| voter.steem_vote_value >= self.config.high_value_threshold)
            .count();
        let top_count = if high_value_count > 0 {
            high_value_count.max(self.config.max_top_voters.min(ranked.len()))
        } else {
            self.config.default_top_count
        };
        let mut top: Vec<&VoterRecord> = ranked.iter().take(top_count).copied().collect();
        let mut total: f64 = top.iter().map(|voter| voter.steem_vote_value).sum();

        if total <= 0.0 {
            ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
            top = ranked
                .iter()
                .take(self.config.max_top_voters)
                .copied()
                .collect();
            total = top.iter().map(|voter| voter.importance).sum();
        }
        if total <= 0.0 {
            return self.fallback("Voter importance too low");
        }

        let mut by_time = top.clone();
        by_time.sort_by(|a, b| self.delay(a).total_cmp(&self.delay(b)));
        let Some(earliest) = by_time.first().copied() else {
            return self.fallback("No significant voter found");
        };
        let earliest_delay = self.delay(earliest);
        let optimal_time = self
            .config
            .min_vote_time
            .max(earliest_delay - self.config.buffer_minutes);

        let mut explanation = format!(
            "Voting ahead of the top voters (first: @{}, {:.3} at {} min)",
            earliest.voter,
            Self::worth(earliest),
            earliest_delay,
        );
        if earliest_delay - self.config.buffer_minutes < self.config.min_vote_time {
            let _ = write!(
                explanation,
                ", respecting the minimum vote time of {} min",
                self.config.min_vote_time
            );
        }
        let describe = |voters: &[&VoterRecord]| {
            voters
                .iter()
                .take(3)
                .map(|voter| {
                    format!(
                        "@{} (value {:.3}, after {:.1} min)",
                        voter.voter,
                        Self::worth(voter),
                        self.delay(voter)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = write!(
            explanation,
            "\nTop voters by time: {}\nTop voters by value: {}",
            describe(&by_time),
            describe(&top),
        );

        let mut groups = VoterGroups::default();
        for voter in &top {
            let delay = self.delay(voter);
            let group = if delay <= 1.0 {
                &mut groups.immediate
            } else if delay <= 5.0 {
                &mut groups.quick
            } else {
                &mut groups.delayed
            };
            group.voters.push(voter.voter.clone());
            group.total_value += Self::worth(voter);
        }

        VotePolicyResult {
            optimal_time,
            explanation,
            vote_window: (optimal_time - 0.1, optimal_time + 0.1),
            top_voters: top.iter().map(|voter| voter.voter.clone()).collect(),
            groups,
            high_value_count,
            earliest_top_voter: Some(earliest.voter.clone()),
        }
    }
}
