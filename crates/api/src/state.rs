//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use streampass_billing::BillingService;

use crate::auth::JwtManager;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret);
        let billing = Arc::new(BillingService::new(
            pool.clone(),
            config.gateway_webhook_secret.clone(),
        ));
        Self {
            pool,
            config,
            jwt_manager,
            billing,
        }
    }
}
