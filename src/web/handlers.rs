use std::sync::Arc;

use salvo::prelude::*;
use serde_json::json;

use crate::bridge::BridgeCore;

pub const LIVENESS_TEXT: &str = "Revolt bridge is running!";

fn bridge(depot: &Depot) -> Option<&Arc<BridgeCore>> {
    depot.obtain::<Arc<BridgeCore>>().ok()
}

fn unavailable(res: &mut Response) {
    res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    res.render(Json(json!({ "status": "unavailable" })));
}

#[handler]
pub async fn liveness(res: &mut Response) {
    res.render(Text::Plain(LIVENESS_TEXT));
}

#[handler]
pub async fn health(depot: &mut Depot, res: &mut Response) {
    let Some(bridge) = bridge(depot) else {
        return unavailable(res);
    };
    let status = bridge.status();
    res.render(Json(json!({
        "status": if status.ready { "ok" } else { "starting" },
        "version": env!("CARGO_PKG_VERSION"),
        "bridge": status,
    })));
}

#[handler]
pub async fn metrics(depot: &mut Depot, res: &mut Response) {
    let Some(bridge) = bridge(depot) else {
        return unavailable(res);
    };
    let status = bridge.status();
    res.render(Json(json!({
        "uptime_seconds": status.uptime_seconds,
        "mappings": status.mappings,
        "relay": bridge.metrics().snapshot(),
    })));
}
