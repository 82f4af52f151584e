use server::config::Settings;
use server::{db, ingest, mqtt, ConfigDistributor};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let settings = Settings::from_env().expect("invalid settings");

    info!("connecting to database...");
    let pool = db::create_pool(&settings.database_url).await;

    let (client, eventloop) = mqtt::session(&settings);

    // Handed to the management API, which calls distribute() from its
    // configuration-creation handler.
    let _distributor = ConfigDistributor::new(client.clone(), pool.clone());

    info!(
        host = %settings.mqtt_hostname,
        port = settings.mqtt_port,
        "starting ingestion loop"
    );
    ingest::run(client, eventloop, pool).await;
}
