use std::sync::{Arc, Mutex};
use std::time::Duration;

use nwws_bridge::{Config, DefaultProductParser, Event, EventBus, ProductParser, Session, Topic};
use tokio::sync::watch;

#[tokio::test]
async fn smoke_test() {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter_module("nwws_bridge", log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .ok();

    let (username, password) = match (
        std::env::var("NWWS_OI_USERNAME"),
        std::env::var("NWWS_OI_PASSWORD"),
    ) {
        (Ok(user), Ok(pass)) if !user.is_empty() && !pass.is_empty() => (user, pass),
        _ => {
            log::warn!("NWWS_OI_USERNAME and NWWS_OI_PASSWORD must be set");
            log::warn!("skipping smoke test");
            return;
        }
    };

    let bus = Arc::new(EventBus::new());
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    bus.subscribe(
        Topic::ProductReceived,
        Arc::new(move |event: &Event| {
            let Event::ProductReceived(product) = event else { return };
            log::info!("rx: {}.{}", product.wmo_header, product.source);
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }),
    );

    let config: Config = (username, password).into();
    let parser: Arc<dyn ProductParser> = Arc::new(DefaultProductParser);
    let session = Session::new(config, bus, parser);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(session.run(shutdown_rx));

    match tokio::time::timeout(Duration::from_secs(75), rx).await {
        Ok(Ok(())) => log::info!("received a product from NWWS-OI"),
        Ok(Err(_)) => unreachable!("session task dropped the sender"),
        Err(_) => panic!("timed out without receiving any product"),
    }
}
