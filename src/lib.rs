use config::Config;
use notify::Notifier;
use redis::Client as RedisClient;
use sqlx::PgPool;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod notify;
pub mod result;
pub mod router;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub notifier: Notifier,
}
