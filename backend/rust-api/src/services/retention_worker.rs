use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::NotificationSettings, error::Result, metrics::SWEEPER_TICKS_TOTAL,
    services::notification_service::NotificationService,
};

/// Periodically removes read notifications past the retention window
pub struct NotificationSweeper {
    notifications: NotificationService,
    settings: NotificationSettings,
}

impl NotificationSweeper {
    pub fn new(notifications: NotificationService, settings: NotificationSettings) -> Self {
        Self {
            notifications,
            settings,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let interval = Duration::from_secs(self.settings.sweep_interval_secs.max(1));
        info!(
            "Starting notification sweeper loop (interval {}s, retention {} days)",
            interval.as_secs(),
            self.settings.retention_days
        );

        loop {
            match self.run_once().await {
                Ok(deleted) => {
                    SWEEPER_TICKS_TOTAL.with_label_values(&["success"]).inc();
                    info!(deleted, "Notification sweeper tick completed");
                }
                Err(err) => {
                    SWEEPER_TICKS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(error = %err, "Notification sweeper tick failed");
                }
            }

            sleep(interval).await;
        }
    }

    pub async fn run_once(&self) -> Result<u64> {
        self.notifications
            .sweep_read_older_than(self.settings.retention_days)
            .await
    }
}
