//! 路由测试共用的配置、状态和请求辅助函数
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use license_portal::{
    AppState,
    config::Config,
    notify::Notifier,
    router::create_router,
    utils::{Role, generate_token},
};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

pub fn config() -> Config {
    Config {
        database_url: "postgres://postgres@127.0.0.1:1/license_portal".into(),
        redis_url: "redis://127.0.0.1:1/".into(),
        jwt_secret: "integration-secret".into(),
        jwt_expiration_secs: 3600,
        otp_ttl_secs: 600,
        reset_token_ttl_secs: 3600,
        rate_limit_window_secs: 60,
        rate_limit_requests: 100,
        login_attempt_limit: 5,
        otp_attempt_limit: 5,
        server_host: "127.0.0.1".into(),
        server_port: 0,
        api_base_uri: "/api".into(),
        site_url: "http://localhost:3000".into(),
        app_url: "http://localhost:3000".into(),
        app_env: "development".into(),
        sms_gateway_url: None,
        email_gateway_url: None,
    }
}

/// 连接池惰性创建，不访问数据库的请求无需真实 Postgres
pub fn setup() -> (Router, Config) {
    let config = config();
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();
    (router_with(pool, &config), config)
}

pub fn router_with(pool: PgPool, config: &Config) -> Router {
    let redis = redis::Client::open(config.redis_url.clone()).unwrap();
    let state = AppState {
        pool,
        config: config.clone(),
        redis: Arc::new(redis),
        notifier: Notifier::new(config),
    };
    create_router(state)
}

pub fn token(config: &Config, role: Role) -> String {
    token_for(config, &uuid::Uuid::new_v4().to_string(), role)
}

pub fn token_for(config: &Config, subject: &str, role: Role) -> String {
    generate_token(subject, role, config).unwrap().0
}

pub async fn call(
    router: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(t) = token {
        builder = builder.header("Authorization", format!("Bearer {}", t));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_string(&v).unwrap())
        }
        None => Body::empty(),
    };
    send(router, builder.body(body).unwrap()).await
}

pub async fn call_raw(
    router: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    content_type: &str,
    body: &str,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("Content-Type", content_type);
    if let Some(t) = token {
        builder = builder.header("Authorization", format!("Bearer {}", t));
    }
    send(router, builder.body(Body::from(body.to_string())).unwrap()).await
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
