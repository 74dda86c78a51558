use std::sync::Arc;

use salvo::prelude::*;
use serde::Serialize;

use crate::store::ConfigurationStore;

#[derive(Debug, Serialize)]
struct StatusResponse {
    enabled: bool,
}

/// Lets clients resynchronise with the current enabled flag after a
/// reconnect.
pub struct StatusHandler {
    store: Arc<ConfigurationStore>,
}

impl StatusHandler {
    pub fn new(store: Arc<ConfigurationStore>) -> Self {
        Self { store }
    }
}

#[handler]
impl StatusHandler {
    async fn handle(&self, res: &mut Response) {
        res.render(Json(StatusResponse {
            enabled: self.store.get().enabled,
        }));
    }
}
