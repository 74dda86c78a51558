#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod cli;
mod config;
mod dispatcher;
mod membership;
mod platform;
mod plugin;
mod store;
mod utils;
mod web;
mod webhook;

use cli::{Cli, Commands};
use config::Config;
use platform::{EventListener, MattermostClient};
use plugin::{FileSettingsSource, ReactionsPlugin};
use store::{Configuration, ConfigurationStore};
use web::WebServer;
use webhook::HttpWebhookSender;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Some(Commands::ValidateConfig) => {
            for warning in config.warnings() {
                println!("warning: {warning}");
            }
            println!("configuration is valid");
            return Ok(());
        }
        Some(Commands::PrintConfig) => {
            print!("{}", config.redacted_yaml()?);
            return Ok(());
        }
        None => {}
    }

    utils::logging::init_tracing(&config.logging);
    info!("mattermost reactions webhook starting up");
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    // Holds the configured webhook URL before the first reload runs.
    let store = Arc::new(ConfigurationStore::new());
    store.replace(Arc::new(Configuration {
        webhook_url: config.plugin.webhook_url.clone(),
        ..Configuration::default()
    }));
    let mattermost = Arc::new(MattermostClient::new(&config.mattermost)?);
    let sender = Arc::new(HttpWebhookSender::new()?);
    let settings = Arc::new(FileSettingsSource::new(cli.config.clone()));
    let plugin = Arc::new(ReactionsPlugin::new(
        store.clone(),
        mattermost,
        sender,
        settings,
        config.bot.spec(),
    ));

    plugin.on_activate().await?;

    let listener = EventListener::new(
        config.mattermost.websocket_url()?,
        config.mattermost.event_token().clone(),
        plugin.clone(),
    );
    let web_server = WebServer::new(config.web.clone(), store);

    let web_handle = tokio::spawn(async move { web_server.start().await });
    let listener_handle = tokio::spawn(listener.run());
    let reload_handle = tokio::spawn(reload_on_hangup(plugin.clone()));

    tokio::pin!(web_handle);
    tokio::pin!(listener_handle);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut web_handle => {
            info!("web server task exited, beginning shutdown");
        },
        _ = &mut listener_handle => {
            info!("event listener task exited, beginning shutdown");
        },
    }

    web_handle.abort();
    listener_handle.abort();
    reload_handle.abort();

    plugin.on_deactivate();
    info!("mattermost reactions webhook shutting down");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(plugin: Arc<ReactionsPlugin>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            warn!("cannot listen for SIGHUP, configuration reload disabled: {}", err);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("received SIGHUP, reloading configuration");
        if let Err(err) = plugin.on_configuration_change().await {
            error!("configuration reload failed, keeping previous configuration: {}", err);
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_plugin: Arc<ReactionsPlugin>) {
    std::future::pending::<()>().await
}
