use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError, PluginSettings};
use crate::dispatcher::ReactionDispatcher;
use crate::membership::MembershipTracker;
use crate::platform::{BotSpec, Channel, ChannelMember, PlatformApi, PlatformEvent, Reaction};
use crate::store::ConfigurationStore;
use crate::utils::AppError;
use crate::webhook::{ReactionAction, WebhookSender};

/// Where externally editable settings come from on each reload.
pub trait SettingsSource: Send + Sync {
    fn load_settings(&self) -> Result<PluginSettings, ConfigError>;
}

/// Re-reads the service configuration file on every reload.
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettingsSource {
    fn load_settings(&self) -> Result<PluginSettings, ConfigError> {
        let config = Config::load_from_file(&self.path)?;
        for warning in config.warnings() {
            warn!("{}", warning);
        }
        Ok(config.plugin)
    }
}

/// The hook surface the platform drives: lifecycle, configuration reloads,
/// membership changes and reactions.
pub struct ReactionsPlugin {
    store: Arc<ConfigurationStore>,
    platform: Arc<dyn PlatformApi>,
    settings: Arc<dyn SettingsSource>,
    bot: BotSpec,
    bot_id: RwLock<Option<String>>,
    tracker: MembershipTracker,
    dispatcher: ReactionDispatcher,
}

impl ReactionsPlugin {
    pub fn new(
        store: Arc<ConfigurationStore>,
        platform: Arc<dyn PlatformApi>,
        sender: Arc<dyn WebhookSender>,
        settings: Arc<dyn SettingsSource>,
        bot: BotSpec,
    ) -> Self {
        Self {
            tracker: MembershipTracker::new(store.clone(), platform.clone()),
            dispatcher: ReactionDispatcher::new(store.clone(), platform.clone(), sender),
            store,
            platform,
            settings,
            bot,
            bot_id: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    pub fn bot_id(&self) -> Option<String> {
        self.bot_id.read().clone()
    }

    pub async fn on_activate(&self) -> Result<(), AppError> {
        self.on_configuration_change().await?;
        self.store.set_enabled(true);
        info!("reactions plugin activated");
        Ok(())
    }

    pub fn on_deactivate(&self) {
        self.store.set_enabled(false);
        info!("reactions plugin deactivated");
    }

    /// Reloads settings, provisions the bot and rediscovers monitored
    /// channels. Only settings and bot failures are returned; discovery is
    /// best effort.
    pub async fn on_configuration_change(&self) -> Result<(), AppError> {
        let loaded = self.settings.load_settings()?;
        let settings = self.configuration_will_be_saved(&loaded).unwrap_or(loaded);

        let bot_id = self
            .platform
            .ensure_bot(&self.bot)
            .await
            .map_err(AppError::BotProvisioning)?;
        *self.bot_id.write() = Some(bot_id.clone());

        let discovery = self.tracker.discover(&bot_id).await;
        for failure in &discovery.failures {
            warn!(
                team_id = %failure.team_id,
                error = %failure.error,
                "channel discovery skipped team"
            );
        }

        // Built under the store's write lock so membership changes published
        // while discovery ran are carried over.
        let monitored = self.store.update(|configuration| {
            configuration.webhook_url = settings.webhook_url;
            if discovery.teams_listed {
                configuration.monitored_channels.extend(discovery.channels);
            }
            configuration.monitored_channels.len()
        });

        info!(
            bot_id = %bot_id,
            monitored_channels = monitored,
            skipped_teams = discovery.failures.len(),
            "configuration loaded"
        );
        Ok(())
    }

    /// Hook for adjusting settings before they are adopted. Settings are
    /// taken exactly as submitted.
    pub fn configuration_will_be_saved(&self, _new_settings: &PluginSettings) -> Option<PluginSettings> {
        None
    }

    pub fn channel_has_been_created(&self, channel: &Channel) {
        if !self.store.get().enabled {
            return;
        }
        debug!(channel_id = %channel.id, channel_name = %channel.name, "channel created");
    }

    pub fn user_has_joined_channel(&self, member: &ChannelMember) {
        let Some(bot_id) = self.bot_id() else {
            debug!("membership event before bot provisioning, ignoring");
            return;
        };
        self.tracker.handle_member_joined(&bot_id, member);
    }

    pub fn user_has_left_channel(&self, member: &ChannelMember) {
        let Some(bot_id) = self.bot_id() else {
            debug!("membership event before bot provisioning, ignoring");
            return;
        };
        self.tracker.handle_member_left(&bot_id, member);
    }

    pub fn reaction_has_been_added(&self, reaction: Reaction) {
        self.dispatcher
            .dispatch(ReactionAction::ReactionAdded, reaction);
    }

    pub fn reaction_has_been_removed(&self, reaction: Reaction) {
        self.dispatcher
            .dispatch(ReactionAction::ReactionRemoved, reaction);
    }

    /// Never waits on the network; lookups run on detached tasks.
    pub fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::ReactionAdded(reaction) => self.reaction_has_been_added(reaction),
            PlatformEvent::ReactionRemoved(reaction) => self.reaction_has_been_removed(reaction),
            PlatformEvent::ChannelCreated(channel) => self.channel_has_been_created(&channel),
            PlatformEvent::UserJoinedChannel(member) => self.user_has_joined_channel(&member),
            PlatformEvent::UserLeftChannel(member) => self.user_has_left_channel(&member),
        }
    }
}
