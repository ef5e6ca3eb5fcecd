use anyhow::Result;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::config::rate_limits::{current_window, RateLimits, RateWindow};
use crate::infra::cache::RedisCache;

pub struct RateLimitInfo {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: RedisCache,
}

impl RateLimiter {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }

    /// Rate limit check result with quota information for response headers.
    pub async fn check_rate_limit(&self, user_id: Uuid, action: &str) -> Result<RateLimitInfo> {
        let limits = RateLimits::standard();

        let limit = match limits.limit_for_action(action, RateWindow::Hour) {
            Some(limit) => limit,
            None => {
                return Ok(RateLimitInfo {
                    limited: false,
                    limit: 0,
                    remaining: 0,
                })
            }
        };

        let window_seconds = RateWindow::Hour.seconds();
        let key = format!(
            "ratelimit:{}:{}:{}",
            user_id,
            action,
            current_window(window_seconds)
        );

        let mut conn = self.cache.client().get_multiplexed_async_connection().await?;
        let count: u32 = conn.get(&key).await.unwrap_or(0);
        let remaining = limit.saturating_sub(count);

        if count >= limit {
            tracing::debug!(
                user_id = %user_id,
                action = action,
                count = count,
                limit = limit,
                "Rate limit exceeded"
            );
            return Ok(RateLimitInfo {
                limited: true,
                limit,
                remaining: 0,
            });
        }

        Ok(RateLimitInfo {
            limited: false,
            limit,
            remaining,
        })
    }

    /// Increment rate limit counter for an action
    pub async fn increment(&self, user_id: Uuid, action: &str) -> Result<()> {
        let window_seconds = RateWindow::Hour.seconds();
        let key = format!(
            "ratelimit:{}:{}:{}",
            user_id,
            action,
            current_window(window_seconds)
        );

        let mut conn = self.cache.client().get_multiplexed_async_connection().await?;

        let count: u32 = conn.get(&key).await.unwrap_or(0);
        let _: () = conn.incr(&key, 1).await?;

        // Set expiration on first increment
        if count == 0 {
            let _: () = conn.expire(&key, window_seconds as i64).await?;
        }

        Ok(())
    }

    /// Check rate limit by IP address (for unauthenticated requests)
    pub async fn check_ip_rate_limit(
        &self,
        ip: &str,
        action: &str,
        limit: u32,
        window: RateWindow,
    ) -> Result<bool> {
        let window_seconds = window.seconds();
        let key = format!(
            "ratelimit:ip:{}:{}:{}",
            ip,
            action,
            current_window(window_seconds)
        );

        let mut conn = self.cache.client().get_multiplexed_async_connection().await?;

        let count: u32 = conn.get(&key).await.unwrap_or(0);

        if count >= limit {
            tracing::debug!(
                ip = ip,
                action = action,
                count = count,
                limit = limit,
                "IP rate limit exceeded"
            );
            return Ok(true);
        }

        Ok(false)
    }

    /// Increment IP-based rate limit counter
    pub async fn increment_ip(&self, ip: &str, action: &str, window: RateWindow) -> Result<()> {
        let window_seconds = window.seconds();
        let key = format!(
            "ratelimit:ip:{}:{}:{}",
            ip,
            action,
            current_window(window_seconds)
        );

        let mut conn = self.cache.client().get_multiplexed_async_connection().await?;

        let count: u32 = conn.get(&key).await.unwrap_or(0);
        let _: () = conn.incr(&key, 1).await?;

        if count == 0 {
            let _: () = conn.expire(&key, window_seconds as i64).await?;
        }

        Ok(())
    }
}
