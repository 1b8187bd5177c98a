use std::sync::Arc;

use wampsub::broker::TopicsManager;
use wampsub::config::load_config;
use wampsub::transport::websocket::{AllowAll, start_websocket_server};
use wampsub::utils::logging;

#[tokio::main]
async fn main() {
    let settings = load_config().expect("Failed to load configuration");
    logging::init(&settings.log_level);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let registry = Arc::new(TopicsManager::with_bridge(settings.bridge.clone()));

    start_websocket_server(addr, registry, Arc::new(AllowAll)).await;
}
