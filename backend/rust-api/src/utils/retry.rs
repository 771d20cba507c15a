use std::time::Duration;

/// Backoff settings for compare-and-retry loops on a single document
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(100),
            jitter_max: Some(Duration::from_millis(10)),
        }
    }
}

/// Runs `attempt` until it reports success.
///
/// `Ok(Some(value))` finishes the loop, `Ok(None)` means a concurrent writer
/// won the race and the attempt is repeated after a backoff, `Err` aborts
/// immediately. Returns `Ok(None)` once `max_attempts` conflicts were seen.
pub async fn retry_on_conflict<F, Fut, T, E>(config: &RetryConfig, mut attempt: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, E>>,
{
    let mut attempts_left = config.max_attempts;
    let mut backoff = config.base_backoff;

    loop {
        if let Some(value) = attempt().await? {
            return Ok(Some(value));
        }

        attempts_left = attempts_left.saturating_sub(1);
        if attempts_left == 0 {
            return Ok(None);
        }

        let wait = match config.jitter_max {
            Some(jitter_max) => {
                let jitter_ms = jitter_max.as_millis() as u64;
                let extra = if jitter_ms == 0 {
                    0
                } else {
                    rand::random::<u64>() % (jitter_ms + 1)
                };
                backoff + Duration::from_millis(extra)
            }
            None => backoff,
        };
        tracing::debug!(?wait, attempts_left, "write conflict, retrying");
        tokio::time::sleep(wait).await;

        backoff = std::cmp::min(backoff * 2, config.max_backoff);
    }
}
