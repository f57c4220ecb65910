use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::database::Repository;
use crate::utils::error::ApiError;

/// Per-bot, per-minute request counter backed by the rate_counters table.
/// The increment is one atomic upsert, so concurrent requests across
/// processes cannot lose updates.
pub struct RateLimiter {
    repository: Arc<Repository>,
    default_limit: i32,
}

impl RateLimiter {
    pub fn new(repository: Arc<Repository>, default_limit: i32) -> Self {
        Self {
            repository,
            default_limit,
        }
    }

    /// Count this request against `bot_id`'s current minute window and
    /// reject once the bot's limit is exceeded.
    pub async fn check(&self, bot_id: Uuid, bot_limit: Option<i32>) -> Result<(), ApiError> {
        let limit = bot_limit.unwrap_or(self.default_limit);
        if limit <= 0 {
            return Ok(());
        }

        let now = Utc::now();
        let count = self
            .repository
            .increment_rate_counter(bot_id, window_start(now))
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        if count > limit {
            debug!(bot_id = %bot_id, count, limit, "rate limit exceeded");
            return Err(ApiError::RateLimited {
                retry_after_s: retry_after_seconds(now),
            });
        }

        Ok(())
    }
}

/// Minute-truncated window key.
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Seconds until the next minute boundary.
pub fn retry_after_seconds(now: DateTime<Utc>) -> u64 {
    (60 - now.second() as u64).clamp(1, 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn windows_truncate_to_the_minute() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 42).unwrap();
        let window = window_start(now);
        assert_eq!(window.second(), 0);
        assert_eq!(window.minute(), 30);

        let later = Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 59).unwrap();
        assert_eq!(window_start(later), window);

        let next = Utc.with_ymd_and_hms(2025, 3, 1, 10, 31, 0).unwrap();
        assert_ne!(window_start(next), window);
    }

    #[test]
    fn retry_after_counts_to_the_minute_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 40).unwrap();
        assert_eq!(retry_after_seconds(now), 20);

        let boundary = Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(retry_after_seconds(boundary), 60);

        let almost = Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 59).unwrap();
        assert_eq!(retry_after_seconds(almost), 1);
    }
}
