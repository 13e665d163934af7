use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::auth::TokenService;
use crate::cache::CacheService;
use crate::config::Config;
use crate::gateway::GatewayClient;

pub mod auth;
pub mod events;
pub mod health;
pub mod payments;
pub mod points;
pub mod registrations;
pub mod routes;
pub mod social;
pub mod validation;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub cache: CacheService,
    pub tokens: TokenService,
    pub gateway: GatewayClient,
    pub config: Config,
}

impl AppState {
    pub fn new(db: PgPool, redis: ConnectionManager, config: Config) -> Self {
        let cache = CacheService::new(redis.clone());
        let tokens = TokenService::new(config.jwt_secret.clone(), cache.clone());
        let gateway = GatewayClient::new(
            config.gateway_base_url.clone(),
            config.gateway_key_id.clone(),
            config.gateway_key_secret.clone(),
            config.gateway_webhook_secret.clone(),
        );

        Self {
            db,
            redis,
            cache,
            tokens,
            gateway,
            config,
        }
    }
}
