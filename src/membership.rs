use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::platform::{ChannelMember, PlatformApi, PlatformError};
use crate::store::ConfigurationStore;

/// A team whose channels could not be listed during discovery.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub team_id: String,
    pub error: PlatformError,
}

/// Result of one discovery pass. `teams_listed` is false when the team list
/// itself was unavailable, in which case `channels` is empty and callers
/// should keep whatever set they already have.
#[derive(Debug, Default)]
pub struct Discovery {
    pub channels: HashSet<String>,
    pub failures: Vec<DiscoveryFailure>,
    pub teams_listed: bool,
}

/// Keeps the monitored channel set equal to the bot's channel memberships.
pub struct MembershipTracker {
    store: Arc<ConfigurationStore>,
    platform: Arc<dyn PlatformApi>,
}

impl MembershipTracker {
    pub fn new(store: Arc<ConfigurationStore>, platform: Arc<dyn PlatformApi>) -> Self {
        Self { store, platform }
    }

    /// Lists every channel the bot belongs to across all of its teams. A team
    /// that fails is recorded and skipped.
    pub async fn discover(&self, bot_id: &str) -> Discovery {
        let mut discovery = Discovery::default();

        let teams = match self.platform.get_teams_for_user(bot_id).await {
            Ok(teams) => teams,
            Err(err) => {
                warn!("failed to discover monitored channels: {}", err);
                return discovery;
            }
        };
        discovery.teams_listed = true;

        for team in teams {
            match self
                .platform
                .get_channels_for_team_for_user(&team.id, bot_id)
                .await
            {
                Ok(channels) => {
                    for channel in channels {
                        debug!(
                            channel_id = %channel.id,
                            channel_name = %channel.name,
                            "discovered monitored channel"
                        );
                        discovery.channels.insert(channel.id);
                    }
                }
                Err(err) => {
                    warn!(team_id = %team.id, error = %err, "failed to get channels for bot in team");
                    discovery.failures.push(DiscoveryFailure {
                        team_id: team.id,
                        error: err,
                    });
                }
            }
        }

        discovery
    }

    /// Returns true when `member` was the bot and the channel was not already
    /// monitored. The set is updated before returning; the channel name lookup
    /// for the log line runs detached.
    pub fn handle_member_joined(&self, bot_id: &str, member: &ChannelMember) -> bool {
        if member.user_id != bot_id {
            return false;
        }

        let channel_id = member.channel_id.clone();
        let added = self
            .store
            .mutate_channel_set(|channels| channels.insert(channel_id));
        self.log_channel(member.channel_id.clone(), MembershipChange::Joined);
        added
    }

    pub fn handle_member_left(&self, bot_id: &str, member: &ChannelMember) -> bool {
        if member.user_id != bot_id {
            return false;
        }

        let removed = self
            .store
            .mutate_channel_set(|channels| channels.remove(&member.channel_id));
        self.log_channel(member.channel_id.clone(), MembershipChange::Left);
        removed
    }

    fn log_channel(&self, channel_id: String, change: MembershipChange) {
        let platform = self.platform.clone();
        tokio::spawn(async move {
            match (platform.get_channel(&channel_id).await, change) {
                (Ok(channel), MembershipChange::Joined) => info!(
                    channel_id = %channel_id,
                    channel_name = %channel.name,
                    "bot added to channel, monitoring started"
                ),
                (Ok(channel), MembershipChange::Left) => info!(
                    channel_id = %channel_id,
                    channel_name = %channel.name,
                    "bot removed from channel, monitoring stopped"
                ),
                (Err(err), MembershipChange::Joined) => error!(
                    channel_id = %channel_id,
                    error = %err,
                    "failed to query channel when bot joined"
                ),
                (Err(err), MembershipChange::Left) => error!(
                    channel_id = %channel_id,
                    error = %err,
                    "failed to query channel when bot left"
                ),
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum MembershipChange {
    Joined,
    Left,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::platform::fake::FakePlatform;

    fn member(channel_id: &str, user_id: &str) -> ChannelMember {
        ChannelMember {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    fn tracker(platform: FakePlatform) -> (MembershipTracker, Arc<ConfigurationStore>) {
        let store = Arc::new(ConfigurationStore::new());
        (
            MembershipTracker::new(store.clone(), Arc::new(platform)),
            store,
        )
    }

    #[tokio::test]
    async fn discovery_unions_channels_across_teams() {
        let platform = FakePlatform::new()
            .with_team("T1", "acme")
            .with_team("T2", "globex")
            .with_membership("T1", "C1")
            .with_membership("T1", "C2")
            .with_membership("T2", "C3");
        let (tracker, _) = tracker(platform);

        let discovery = tracker.discover("BOT").await;

        assert!(discovery.teams_listed);
        assert!(discovery.failures.is_empty());
        let expected: HashSet<String> = ["C1", "C2", "C3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discovery.channels, expected);
    }

    #[tokio::test]
    async fn discovery_skips_failing_team() {
        let platform = FakePlatform::new()
            .with_team("T1", "acme")
            .with_team("T2", "globex")
            .with_team("T3", "initech")
            .with_membership("T1", "C1")
            .with_membership("T2", "C2")
            .with_membership("T3", "C3")
            .fail_channels_for_team("T2");
        let (tracker, _) = tracker(platform);

        let discovery = tracker.discover("BOT").await;

        assert_eq!(discovery.failures.len(), 1);
        assert_eq!(discovery.failures[0].team_id, "T2");
        assert!(matches!(
            discovery.failures[0].error,
            PlatformError::Api { status: 403, .. }
        ));
        assert!(discovery.channels.contains("C1"));
        assert!(!discovery.channels.contains("C2"));
        assert!(discovery.channels.contains("C3"));
    }

    #[tokio::test]
    async fn discovery_covers_every_team_of_the_bot() {
        let mut platform = FakePlatform::new()
            .with_foreign_team("X1", "other-org")
            .with_membership("X1", "CX");
        for i in 0..75 {
            let team_id = format!("T{i}");
            platform = platform
                .with_team(&team_id, &format!("team-{i}"))
                .with_membership(&team_id, &format!("C{i}"));
        }
        let platform = Arc::new(platform);
        let store = Arc::new(ConfigurationStore::new());
        let tracker = MembershipTracker::new(store, platform.clone());

        let discovery = tracker.discover("BOT").await;

        assert_eq!(discovery.channels.len(), 75);
        assert!(discovery.channels.contains("C74"));
        assert!(!discovery.channels.contains("CX"));
        assert_eq!(*platform.team_lookups.lock(), vec!["BOT".to_string()]);
    }

    #[tokio::test]
    async fn discovery_reports_unlisted_teams() {
        let platform = FakePlatform::new().with_team("T1", "acme");
        *platform.fail_get_teams.lock() = true;
        let (tracker, _) = tracker(platform);

        let discovery = tracker.discover("BOT").await;

        assert!(!discovery.teams_listed);
        assert!(discovery.channels.is_empty());
    }

    #[tokio::test]
    async fn bot_join_and_leave_update_monitored_set() {
        let platform = FakePlatform::new().with_channel("T1", "C3", "ops");
        let (tracker, store) = tracker(platform);

        assert!(tracker.handle_member_joined("BOT", &member("C3", "BOT")));
        assert!(store.is_channel_monitored("C3"));

        assert!(tracker.handle_member_left("BOT", &member("C3", "BOT")));
        assert!(!store.is_channel_monitored("C3"));
    }

    #[tokio::test]
    async fn other_users_are_ignored() {
        let (tracker, store) = tracker(FakePlatform::new());
        store.mutate_channel_set(|channels| channels.insert("C1".to_string()));

        assert!(!tracker.handle_member_joined("BOT", &member("C2", "U1")));
        assert!(!tracker.handle_member_left("BOT", &member("C1", "U1")));

        assert!(!store.is_channel_monitored("C2"));
        assert!(store.is_channel_monitored("C1"));
    }

    #[tokio::test]
    async fn repeated_join_and_leave_are_no_ops() {
        let (tracker, store) = tracker(FakePlatform::new());

        assert!(tracker.handle_member_joined("BOT", &member("C1", "BOT")));
        assert!(!tracker.handle_member_joined("BOT", &member("C1", "BOT")));
        assert_eq!(store.get().monitored_channels.len(), 1);

        assert!(!tracker.handle_member_left("BOT", &member("C9", "BOT")));
        assert_eq!(store.get().monitored_channels.len(), 1);
    }

    #[tokio::test]
    async fn failed_channel_lookup_still_tracks_membership() {
        // FakePlatform knows no channels, so the informational lookup fails.
        let (tracker, store) = tracker(FakePlatform::new());

        tracker.handle_member_joined("BOT", &member("C7", "BOT"));

        assert!(store.is_channel_monitored("C7"));
    }

    #[tokio::test]
    async fn hung_channel_lookup_does_not_delay_membership() {
        let platform = FakePlatform::new().with_channel("T1", "C3", "ops");
        *platform.hang_channel_lookups.lock() = true;
        let (tracker, store) = tracker(platform);

        let joined = tokio::time::timeout(Duration::from_secs(1), async {
            tracker.handle_member_joined("BOT", &member("C3", "BOT"))
        })
        .await
        .expect("membership update waited on the channel lookup");

        assert!(joined);
        assert!(store.is_channel_monitored("C3"));
    }
}
