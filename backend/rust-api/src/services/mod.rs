use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::repositories::Repositories;
use crate::utils::time::{Clock, SystemClock};

pub mod announcement_service;
pub mod audience_resolver;
pub mod membership_resolver;
pub mod notification_service;
pub mod retention_worker;
pub mod unread_cache;

use announcement_service::AnnouncementService;
use audience_resolver::AudienceResolver;
use membership_resolver::MembershipResolver;
use notification_service::NotificationService;
use unread_cache::UnreadCountCache;

pub struct AppState {
    pub config: Config,
    pub repositories: Repositories,
    pub clock: Arc<dyn Clock>,
    /// `None` when Redis is not configured or unreachable at startup
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let repositories = Repositories::mongo(&mongo);

        let redis = match config.redis_uri.as_deref() {
            Some(uri) => match connect_redis(uri).await {
                Ok(manager) => {
                    tracing::info!("Redis connection established successfully");
                    Some(manager)
                }
                Err(err) => {
                    tracing::warn!("Redis unavailable, unread counters will not be cached: {:#}", err);
                    None
                }
            },
            None => {
                tracing::info!("REDIS_URI not set, unread counter cache disabled");
                None
            }
        };

        Ok(Self {
            config,
            repositories,
            clock: Arc::new(SystemClock),
            redis,
        })
    }

    /// State over arbitrary repositories, without Redis
    pub fn with_repositories(config: Config, repositories: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            repositories,
            clock,
            redis: None,
        }
    }

    pub fn membership_resolver(&self) -> MembershipResolver {
        MembershipResolver::new(self.repositories.memberships.clone())
    }

    pub fn audience_resolver(&self) -> AudienceResolver {
        AudienceResolver::new(
            self.repositories.directory.clone(),
            self.membership_resolver(),
        )
    }

    pub fn notification_service(&self) -> NotificationService {
        NotificationService::new(
            self.repositories.notifications.clone(),
            self.repositories.directory.clone(),
            self.membership_resolver(),
            UnreadCountCache::new(
                self.redis.clone(),
                self.config.notifications.unread_cache_ttl_secs,
            ),
            self.clock.clone(),
        )
    }

    pub fn announcement_service(&self) -> AnnouncementService {
        AnnouncementService::new(
            self.repositories.announcements.clone(),
            self.audience_resolver(),
            self.membership_resolver(),
            self.notification_service(),
            self.clock.clone(),
        )
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");
    let manager = tokio::time::timeout(Duration::from_secs(10), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 10s"))??;

    let mut conn = manager.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    Ok(manager)
}
