use std::sync::Arc;

use salvo::prelude::*;
use tracing::info;

use crate::config::WebConfig;
use crate::store::ConfigurationStore;

mod outgoing;
mod status;

use outgoing::OutgoingWebhookHandler;
use status::StatusHandler;

#[derive(Clone)]
pub struct WebServer {
    config: WebConfig,
    store: Arc<ConfigurationStore>,
}

impl WebServer {
    pub fn new(config: WebConfig, store: Arc<ConfigurationStore>) -> Self {
        Self { config, store }
    }

    pub async fn start(&self) {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(root_router(self.store.clone())).await;
    }
}

pub fn root_router(store: Arc<ConfigurationStore>) -> Router {
    Router::new()
        .push(Router::with_path("status").get(StatusHandler::new(store)))
        .push(Router::with_path("webhook/outgoing").post(OutgoingWebhookHandler))
}
