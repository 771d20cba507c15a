use mongodb::bson::oid::ObjectId;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::metrics::{record_cache_hit, record_cache_miss};

const CACHE_KEY_PREFIX: &str = "notif:unread:";

/// Redis cache for per-user unread notification counters.
///
/// Every operation degrades to a no-op when Redis is not configured or fails;
/// callers then fall back to counting in MongoDB.
#[derive(Clone)]
pub struct UnreadCountCache {
    redis: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl UnreadCountCache {
    pub fn new(redis: Option<ConnectionManager>, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    fn key(user: &ObjectId) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, user.to_hex())
    }

    pub async fn get(&self, user: &ObjectId) -> Option<u64> {
        let mut conn = self.redis.clone()?;
        match redis::cmd("GET")
            .arg(Self::key(user))
            .query_async::<Option<u64>>(&mut conn)
            .await
        {
            Ok(Some(count)) => {
                record_cache_hit();
                Some(count)
            }
            Ok(None) => {
                record_cache_miss();
                None
            }
            Err(err) => {
                warn!("Unread counter cache read failed: {}", err);
                record_cache_miss();
                None
            }
        }
    }

    pub async fn set(&self, user: &ObjectId, count: u64) {
        let Some(mut conn) = self.redis.clone() else {
            return;
        };
        if let Err(err) = redis::cmd("SET")
            .arg(Self::key(user))
            .arg(count)
            .arg("EX")
            .arg(self.ttl_secs.max(1))
            .query_async::<()>(&mut conn)
            .await
        {
            warn!("Unread counter cache write failed: {}", err);
        }
    }

    pub async fn invalidate<'a, I>(&self, users: I)
    where
        I: IntoIterator<Item = &'a ObjectId>,
    {
        let Some(mut conn) = self.redis.clone() else {
            return;
        };
        let keys: Vec<String> = users.into_iter().map(Self::key).collect();
        if keys.is_empty() {
            return;
        }
        debug!("Invalidating {} unread counters", keys.len());
        if let Err(err) = redis::cmd("DEL")
            .arg(&keys)
            .query_async::<()>(&mut conn)
            .await
        {
            warn!("Unread counter cache invalidation failed: {}", err);
        }
    }
}
