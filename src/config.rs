//! Configuration structs (spec.md §6.4). The library never reads the
//! environment itself — that wiring is the binary's job (an explicit
//! Non-goal of the core) — so every type here is a plain struct with a
//! [`Default`] impl for the options that have one.

/// Top-level configuration for a bridge run.
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub resource: String,
    pub server: Server,
    pub room: Room,
    pub output: OutputConfig,
    pub stats_interval_secs: u64,
    pub metrics: MetricsConfig,
}

impl Config {
    pub(crate) fn jid(&self) -> String {
        format!("{}@{}/{}", &self.username, &self.server.hostname(), &self.resource)
    }
}

impl From<(String, String)> for Config {
    fn from((username, password): (String, String)) -> Self {
        Self {
            username,
            password,
            resource: format!("uuid/{}", uuid::Uuid::new_v4()),
            server: Server::default(),
            room: Room::default(),
            output: OutputConfig::default(),
            stats_interval_secs: 60,
            metrics: MetricsConfig::default(),
        }
    }
}

impl From<(&str, &str)> for Config {
    fn from((username, password): (&str, &str)) -> Self {
        (username.to_string(), password.to_string()).into()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Server {
    Primary,
    Custom { hostname: String, port: u16 },
}

impl Server {
    pub(crate) fn hostname(&self) -> &str {
        match self {
            Server::Primary => "nwws-oi.weather.gov",
            Server::Custom { hostname, .. } => hostname,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        match self {
            Server::Primary => 5222,
            Server::Custom { port, .. } => *port,
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::Primary
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Room {
    Default,
    Custom(jid::BareJid),
}

impl Room {
    pub(crate) fn jid(&self, nickname: String) -> jid::FullJid {
        match self {
            Room::Default => jid::FullJid {
                node: Some("NWWS".into()),
                domain: "conference.nwws-oi.weather.gov".into(),
                resource: nickname,
            },
            Room::Custom(jid) => jid::FullJid {
                node: jid.node.clone(),
                domain: jid.domain.clone(),
                resource: nickname,
            },
        }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::Default
    }
}

/// Options recognized by the output handler registry and its sinks
/// (spec.md §4.4, §4.5.2).
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Comma-separated sink names, case-insensitive. Empty means "fall back
    /// to `console`" (enforced by the registry, not here).
    pub enabled_handlers: Vec<String>,
    pub mqtt: Option<MqttConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled_handlers: vec!["console".to_string()],
            mqtt: None,
        }
    }
}

/// MQTT sink configuration (spec.md §4.5.2).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub qos: u8,
    pub retain: bool,
    pub client_id: String,
    pub message_expiry_minutes: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "nwws".to_string(),
            qos: 1,
            retain: false,
            client_id: "nwws-oi-client".to_string(),
            message_expiry_minutes: 60,
        }
    }
}

/// Prometheus exposition configuration (spec.md §4.8, §6.3).
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub update_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            update_interval_secs: 30,
        }
    }
}
