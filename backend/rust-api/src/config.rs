use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Redis is optional: without it unread counters are always read from MongoDB
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    /// Read notifications older than this are removed by the retention sweep
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    pub unread_cache_ttl_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            sweep_interval_secs: 3600,
            unread_cache_ttl_secs: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "drose".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let defaults = NotificationSettings::default();
        let notifications = NotificationSettings {
            retention_days: read_number(
                &settings,
                "notifications.retention_days",
                "NOTIFICATION_RETENTION_DAYS",
            )
            .unwrap_or(defaults.retention_days),
            sweep_interval_secs: read_number(
                &settings,
                "notifications.sweep_interval_secs",
                "SWEEP_INTERVAL_SECS",
            )
            .unwrap_or(defaults.sweep_interval_secs),
            unread_cache_ttl_secs: read_number(
                &settings,
                "notifications.unread_cache_ttl_secs",
                "UNREAD_CACHE_TTL_SECS",
            )
            .unwrap_or(defaults.unread_cache_ttl_secs),
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            bind_addr,
            notifications,
        })
    }

    /// Configuration for tests that never touch a real database
    pub fn for_tests(jwt_secret: &str) -> Self {
        Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "drose_test".to_string(),
            redis_uri: None,
            jwt_secret: jwt_secret.to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            notifications: NotificationSettings::default(),
        }
    }
}

fn read_number<T: std::str::FromStr>(
    settings: &config::Config,
    key: &str,
    env_key: &str,
) -> Option<T> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .and_then(|raw| parse_number(&raw))
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}
