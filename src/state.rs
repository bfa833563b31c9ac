use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::{
    directory::UserDirectory,
    memory::MemoryUserStore,
    provider::{IdentityProvider, OAuthServerProvider},
    repo::{PgUserStore, UserStore},
    session::SessionKeys,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: UserDirectory,
    pub keys: SessionKeys,
    pub provider: Option<Arc<dyn IdentityProvider>>,
}

impl AppState {
    pub fn init(config: Arc<AppConfig>, db: PgPool) -> anyhow::Result<Self> {
        let provider = match &config.oauth {
            Some(oauth) => Some(Arc::new(OAuthServerProvider::new(
                oauth.clone(),
                config.session.app_id.clone(),
            )?) as Arc<dyn IdentityProvider>),
            None => None,
        };
        let store = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        Ok(Self::from_parts(config, store, provider))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let users = UserDirectory::new(store, config.owner_open_id.clone(), config.store_timeout());
        let keys = SessionKeys::from_config(&config.session, config.is_production);
        Self {
            config,
            users,
            keys,
            provider,
        }
    }

    /// In-memory store and fixed signing key.
    pub fn fake() -> Self {
        Self::fake_with(Arc::new(MemoryUserStore::new()), None)
    }

    pub fn fake_with(store: Arc<MemoryUserStore>, provider: Option<Arc<dyn IdentityProvider>>) -> Self {
        Self::from_parts(
            Arc::new(AppConfig::for_tests()),
            store as Arc<dyn UserStore>,
            provider,
        )
    }
}
