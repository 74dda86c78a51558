use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::platform::{PlatformApi, Reaction};
use crate::store::{Configuration, ConfigurationStore};
use crate::webhook::{ReactionAction, ReactionWebhookPayload, WebhookSender};

/// How a reaction that passed the configuration gates ended up. Every
/// variant but `Dispatched` is a drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    PostLookupFailed,
    ChannelNotMonitored,
    EnrichmentFailed,
    Dispatched,
}

/// Decides whether a reaction becomes a webhook and, if so, hands it to the
/// sender without waiting on it.
#[derive(Clone)]
pub struct ReactionDispatcher {
    store: Arc<ConfigurationStore>,
    platform: Arc<dyn PlatformApi>,
    sender: Arc<dyn WebhookSender>,
}

impl ReactionDispatcher {
    pub fn new(
        store: Arc<ConfigurationStore>,
        platform: Arc<dyn PlatformApi>,
        sender: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            store,
            platform,
            sender,
        }
    }

    /// Runs the configuration gates on the caller and everything that touches
    /// the network on a detached task. Returns `None` when the reaction was
    /// dropped by the gates; dropping the handle does not cancel the task.
    pub fn dispatch(
        &self,
        action: ReactionAction,
        reaction: Reaction,
    ) -> Option<JoinHandle<DispatchOutcome>> {
        let config = self.store.get();
        if !accepts_reactions(&config) {
            return None;
        }

        let this = self.clone();
        let webhook_url = config.webhook_url.clone();
        Some(tokio::spawn(async move {
            this.resolve_and_send(action, &reaction, webhook_url).await
        }))
    }

    async fn resolve_and_send(
        &self,
        action: ReactionAction,
        reaction: &Reaction,
        webhook_url: String,
    ) -> DispatchOutcome {
        let post = match self.platform.get_post(&reaction.post_id).await {
            Ok(post) => post,
            Err(err) => {
                error!(post_id = %reaction.post_id, error = %err, "failed to get post for reaction");
                return DispatchOutcome::PostLookupFailed;
            }
        };

        // Read the store again: a membership change may have landed while the
        // post lookup was in flight.
        if !self.store.is_channel_monitored(&post.channel_id) {
            debug!(channel_id = %post.channel_id, "channel not monitored, ignoring reaction");
            return DispatchOutcome::ChannelNotMonitored;
        }

        let payload = match self.build_payload(action, reaction, &post.channel_id).await {
            Some(payload) => payload,
            None => return DispatchOutcome::EnrichmentFailed,
        };

        let sender = self.sender.clone();
        tokio::spawn(async move {
            sender.send(&webhook_url, &payload).await;
        });

        DispatchOutcome::Dispatched
    }

    async fn build_payload(
        &self,
        action: ReactionAction,
        reaction: &Reaction,
        channel_id: &str,
    ) -> Option<ReactionWebhookPayload> {
        let user = match self.platform.get_user(&reaction.user_id).await {
            Ok(user) => user,
            Err(err) => {
                error!(user_id = %reaction.user_id, error = %err, "failed to get user");
                return None;
            }
        };

        let channel = match self.platform.get_channel(channel_id).await {
            Ok(channel) => channel,
            Err(err) => {
                error!(channel_id, error = %err, "failed to get channel");
                return None;
            }
        };

        let team = match self.platform.get_team(&channel.team_id).await {
            Ok(team) => team,
            Err(err) => {
                error!(team_id = %channel.team_id, error = %err, "failed to get team");
                return None;
            }
        };

        Some(ReactionWebhookPayload {
            action,
            user_id: reaction.user_id.clone(),
            username: user.username,
            post_id: reaction.post_id.clone(),
            channel_id: channel_id.to_string(),
            channel_name: channel.name,
            team_id: channel.team_id,
            team_name: team.name,
            emoji_name: reaction.emoji_name.clone(),
            timestamp: reaction.create_at,
        })
    }
}

fn accepts_reactions(config: &Configuration) -> bool {
    if !config.enabled {
        return false;
    }
    if !config.has_valid_webhook_url() {
        debug!("webhook URL not configured or invalid, skipping reaction notification");
        return false;
    }
    true
}
