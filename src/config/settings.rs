use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    /// External broker connection parameters. Absent means topics operate
    /// purely in-memory, with no cross-node fan-out.
    pub bridge: Option<BridgeSettings>,
    pub log_level: String,
}

/// Host and port the WebSocket server binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Connection parameters for the external Redis pub/sub datastore.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    pub host: String,
    pub port: u16,
    pub db: Option<i64>,
    pub password: Option<String>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub bridge: Option<BridgeSettings>,
    pub log_level: Option<String>,
}

/// Partial server settings.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            bridge: None,
            log_level: "info".to_string(),
        }
    }
}
