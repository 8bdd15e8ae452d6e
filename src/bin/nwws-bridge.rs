//! Environment-variable wiring for the bridge binary. The library never
//! reads the environment itself (spec.md §1 Non-goals); this is where
//! that wiring happens, along with `env_logger` setup.

use std::sync::Arc;

use nwws_bridge::config::{MqttConfig, Server};
use nwws_bridge::{Config, DefaultProductParser, ProductParser, Supervisor};

fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&level);

    if let Ok(path) = std::env::var("LOG_FILE") {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("failed to open LOG_FILE {}: {}", path, e),
        }
    }

    builder.init();
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn build_config() -> Result<Config, String> {
    let username = std::env::var("NWWS_USERNAME").map_err(|_| "NWWS_USERNAME is required".to_string())?;
    let password = std::env::var("NWWS_PASSWORD").map_err(|_| "NWWS_PASSWORD is required".to_string())?;
    let mut config: Config = (username, password).into();

    if let Some(hostname) = env_var("NWWS_SERVER") {
        let port = env_var("NWWS_PORT").and_then(|v| v.parse().ok()).unwrap_or(5222);
        config.server = Server::Custom { hostname, port };
    }

    if let Some(handlers) = env_var("OUTPUT_HANDLERS") {
        config.output.enabled_handlers = handlers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Some(broker) = env_var("MQTT_BROKER") {
        let mut mqtt = MqttConfig { broker, ..MqttConfig::default() };
        if let Some(port) = env_var("MQTT_PORT").and_then(|v| v.parse().ok()) {
            mqtt.port = port;
        }
        mqtt.username = env_var("MQTT_USERNAME");
        mqtt.password = env_var("MQTT_PASSWORD");
        if let Some(prefix) = env_var("MQTT_TOPIC_PREFIX") {
            mqtt.topic_prefix = prefix;
        }
        if let Some(qos) = env_var("MQTT_QOS").and_then(|v| v.parse().ok()) {
            mqtt.qos = qos;
        }
        if let Some(retain) = env_var("MQTT_RETAIN") {
            mqtt.retain = retain.eq_ignore_ascii_case("true") || retain == "1";
        }
        if let Some(client_id) = env_var("MQTT_CLIENT_ID") {
            mqtt.client_id = client_id;
        }
        if let Some(minutes) = env_var("MQTT_MESSAGE_EXPIRY_MINUTES").and_then(|v| v.parse().ok()) {
            mqtt.message_expiry_minutes = minutes;
        }
        config.output.mqtt = Some(mqtt);
    }

    if let Some(secs) = env_var("STATS_INTERVAL").and_then(|v| v.parse().ok()) {
        config.stats_interval_secs = secs;
    }

    if let Some(enabled) = env_var("METRICS_ENABLED") {
        config.metrics.enabled = !(enabled.eq_ignore_ascii_case("false") || enabled == "0");
    }
    if let Some(port) = env_var("METRICS_PORT").and_then(|v| v.parse().ok()) {
        config.metrics.port = port;
    }
    if let Some(secs) = env_var("METRICS_UPDATE_INTERVAL").and_then(|v| v.parse().ok()) {
        config.metrics.update_interval_secs = secs;
    }

    Ok(config)
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match build_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let parser: Arc<dyn ProductParser> = Arc::new(DefaultProductParser);
    let supervisor = Supervisor::new(config, parser);
    let exit_code = supervisor.run().await;
    std::process::exit(exit_code);
}
