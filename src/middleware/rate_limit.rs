use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{config::Config, error::AppError};

#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

/// 优先取代理头，其次是连接地址
fn client_ip(headers: &HeaderMap, remote_ip: Option<String>) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .map(str::to_string)
        .or(remote_ip)
        .unwrap_or_else(|| "unknown".to_string())
        .trim()
        .to_string()
}

/// 固定窗口计数：第一次计数时设置过期时间，返回当前计数
async fn bump_counter(
    redis: &redis::Client,
    key: &str,
    window_secs: u64,
) -> Result<i64, redis::RedisError> {
    let mut conn = redis.get_multiplexed_async_connection().await?;
    let count: i64 = conn.incr(key, 1).await?;
    if count == 1 {
        let _: () = conn.expire(key, window_secs as i64).await?;
    }
    Ok(count)
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, config: Config) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    pub async fn check_rate_limit(
        self: Arc<Self>,
        req: Request<Body>,
        next: Next,
    ) -> Result<Response, StatusCode> {
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        let ip = client_ip(req.headers(), remote_ip);

        let key = format!("rate_limit:{}", ip);
        let count = bump_counter(&self.redis, &key, self.config.rate_limit_window_secs)
            .await
            .map_err(|e| {
                tracing::error!("Rate limiter unavailable: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        if count > self.config.rate_limit_requests as i64 {
            tracing::warn!("Rate limit exceeded for {}", ip);
            return Ok(AppError::TooManyRequests(format!(
                "Too many requests, retry in {} seconds",
                self.config.rate_limit_window().as_secs()
            ))
            .into_response());
        }

        Ok(next.run(req).await)
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    limiter.check_rate_limit(req, next).await
}

/// 按邮箱统计登录尝试次数，超出上限返回 false
pub async fn register_login_attempt(
    redis: &redis::Client,
    email: &str,
    config: &Config,
) -> Result<bool, redis::RedisError> {
    let key = format!("login_attempts:{}", email.to_lowercase());
    let count = bump_counter(redis, &key, config.rate_limit_window_secs).await?;
    Ok(count <= config.login_attempt_limit as i64)
}

/// 记录一次错误的验证码，返回该交易累计的错误次数
pub async fn register_otp_failure(
    redis: &redis::Client,
    transaction_id: &str,
    config: &Config,
) -> Result<i64, redis::RedisError> {
    let key = format!("otp_attempts:{}", transaction_id);
    bump_counter(redis, &key, config.otp_ttl_secs).await
}

pub fn otp_attempts_exhausted(failures: i64, config: &Config) -> bool {
    failures >= config.otp_attempt_limit as i64
}

pub async fn clear_login_attempts(
    redis: &redis::Client,
    email: &str,
) -> Result<(), redis::RedisError> {
    let mut conn = redis.get_multiplexed_async_connection().await?;
    let _: () = conn.del(format!("login_attempts:{}", email.to_lowercase())).await?;
    Ok(())
}
