use curator_gateway::types::Account;
use jiff::Timestamp;

/// Seconds for voting power to regenerate from 0% to 100%.
pub const REGENERATION_SECONDS: f64 = 432_000.0;

/// Current voting power in percent, regenerated linearly from the value
/// stored at the account's last vote.
pub fn current_voting_power(
    stored_power: u16,
    last_vote_time: Option<Timestamp>,
    now: Timestamp,
) -> f64 {
    let stored = f64::from(stored_power) / 100.0;
    let Some(last_vote) = last_vote_time else {
        return stored.min(100.0);
    };
    let elapsed = now.duration_since(last_vote).as_secs_f64().max(0.0);
    (stored + elapsed / REGENERATION_SECONDS * 100.0).min(100.0)
}

pub fn account_voting_power(account: &Account, now: Timestamp) -> f64 {
    current_voting_power(account.voting_power, account.last_vote_time, now)
}

#[cfg(test)]
mod tests {
    use jiff::SignedDuration;

    use super::*;

    #[test]
    fn regenerates_linearly_up_to_full() {
        let last = Timestamp::UNIX_EPOCH;
        assert_eq!(current_voting_power(8000, Some(last), last), 80.0);

        let one_day = last + SignedDuration::from_hours(24);
        assert!((current_voting_power(8000, Some(last), one_day) - 100.0).abs() < 1e-9);

        let six_hours = last + SignedDuration::from_hours(6);
        assert!((current_voting_power(8000, Some(last), six_hours) - 85.0).abs() < 1e-9);

        let week = last + SignedDuration::from_hours(24 * 7);
        assert_eq!(current_voting_power(2000, Some(last), week), 100.0);
    }
}
