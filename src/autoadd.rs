//! Vote-threshold auto-add: once enough members upvote a suggestion, the
//! track is pushed to the live provider playlist through the capability
//! trait. The decision is pure; the application is one `add_tracks` call.

use crate::error::Result;
use crate::providers::ProviderClient;
use tracing::info;

/// Per-playlist auto-add configuration, as stored in playlist settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAddPolicy {
    pub enabled: bool,
    /// Percentage of members whose votes are required, 0..=100.
    pub required_vote_percent: u8,
}

/// Whether `votes` out of `members` clears the percentage threshold. A
/// playlist with no members never clears it.
pub fn threshold_met(votes: u64, members: u64, required_percent: u8) -> bool {
    if members == 0 {
        return false;
    }
    let percent = (votes as f64 / members as f64) * 100.0;
    percent >= f64::from(required_percent)
}

/// Push `track_id` to the provider playlist when the policy is enabled and
/// the vote threshold is met. Returns whether the track was pushed.
///
/// Provider errors propagate unchanged; whether a failed push should block
/// the surrounding suggestion flow is the caller's decision, not ours.
pub async fn maybe_auto_add(
    client: &dyn ProviderClient,
    policy: &AutoAddPolicy,
    playlist_ref: &str,
    track_id: &str,
    votes: u64,
    members: u64,
) -> Result<bool> {
    if !policy.enabled || !threshold_met(votes, members, policy.required_vote_percent) {
        return Ok(false);
    }
    client
        .add_tracks(playlist_ref, &[track_id.to_string()])
        .await?;
    info!(
        "auto-added track {} to {} playlist {} ({}/{} votes)",
        track_id,
        client.provider(),
        playlist_ref,
        votes,
        members
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_requires_members() {
        assert!(!threshold_met(5, 0, 1));
        assert!(!threshold_met(0, 0, 0));
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(threshold_met(3, 5, 60));
        assert!(!threshold_met(2, 5, 60));
        assert!(threshold_met(1, 1, 100));
        assert!(threshold_met(0, 3, 0));
    }
}
