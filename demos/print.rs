use std::sync::Arc;

use nwws_bridge::{Config, DefaultProductParser, Event, EventBus, ProductParser, Session, Topic};
use tokio::sync::watch;

/// A minimal consumer: joins the room and logs every product received,
/// without the statistics, metrics, or handler-registry machinery
/// `nwws-bridge` wires up.
#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter_module("nwws_bridge", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let username = std::env::var("NWWS_OI_USERNAME").expect("NWWS_OI_USERNAME must be set");
    let password = std::env::var("NWWS_OI_PASSWORD").expect("NWWS_OI_PASSWORD must be set");

    let bus = Arc::new(EventBus::new());
    bus.subscribe(
        Topic::ProductReceived,
        Arc::new(|event: &Event| {
            if let Event::ProductReceived(product) = event {
                log::info!("{}", product.body_json);
            }
        }),
    );
    bus.subscribe(
        Topic::XmppError,
        Arc::new(|event: &Event| {
            if let Event::XmppError(message) = event {
                log::error!("error: {}", message);
            }
        }),
    );

    let config: Config = (username, password).into();
    let parser: Arc<dyn ProductParser> = Arc::new(DefaultProductParser);
    let session = Session::new(config, bus, parser);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    session.run(shutdown_rx).await;
}
