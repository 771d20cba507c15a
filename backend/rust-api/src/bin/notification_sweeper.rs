use anyhow::Context;
use tracing_subscriber::fmt::init;

use drose_api::{
    config::Config,
    services::{retention_worker::NotificationSweeper, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;

    let settings = config.notifications.clone();
    let app_state = AppState::new(config, mongo_client)
        .await
        .context("Failed to initialize app state")?;

    let sweeper = NotificationSweeper::new(app_state.notification_service(), settings);

    sweeper.run().await?;

    Ok(())
}
