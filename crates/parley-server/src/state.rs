use std::sync::Arc;

use anyhow::Result;

use parley::backends::{CloudBackend, LocalBackend};
use parley::{ChatGateway, FileHistoryStore, GatewayConfig};

use crate::configuration::Settings;
use crate::roster;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ChatGateway>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Result<Self> {
        let gw = &settings.gateway;
        let store = Arc::new(FileHistoryStore::new(gw.memory_path()));
        let local = LocalBackend::new(&gw.local_host)?;
        let cloud = CloudBackend::new(&gw.cloud_host, gw.api_key())?;

        let gateway = ChatGateway::new(
            roster::registry(&gw.default_agent),
            roster::personas(),
            store,
            local,
            cloud,
            GatewayConfig {
                trim_budget: gw.trim_budget,
                recall_window: gw.recall_window,
            },
        );

        Ok(Self {
            gateway: Arc::new(gateway),
        })
    }
}
