use std::sync::Arc;

use anyhow::Result;
use salvo::affix_state;
use salvo::prelude::*;
use tracing::info;

use crate::bridge::BridgeCore;
use crate::config::WebConfig;

pub mod handlers;

use self::handlers::{health, liveness, metrics};

pub fn create_router(bridge: Arc<BridgeCore>) -> Router {
    Router::new()
        .hoop(affix_state::inject(bridge))
        .get(liveness)
        .push(Router::with_path("health").get(health))
        .push(Router::with_path("metrics").get(metrics))
}

#[derive(Clone)]
pub struct WebServer {
    config: WebConfig,
    bridge: Arc<BridgeCore>,
}

impl WebServer {
    pub fn new(config: WebConfig, bridge: Arc<BridgeCore>) -> Self {
        Self { config, bridge }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("starting health listener bind_addr={}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor)
            .serve(create_router(self.bridge.clone()))
            .await;

        Ok(())
    }
}
