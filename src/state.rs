use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::auth::{csrf::CsrfGuard, password::PasswordHasher};
use crate::config::AppConfig;
use crate::users::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore};
use crate::views::Views;

pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Everything a handler needs, built once in `main` and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub views: Arc<Views>,
    pub hasher: PasswordHasher,
    pub csrf: CsrfGuard,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let store = connect_store(&config.database_url).await?;
        Self::from_parts(store, config)
    }

    pub fn from_parts(store: Arc<dyn UserStore>, config: AppConfig) -> anyhow::Result<Self> {
        let hasher = PasswordHasher::new(config.hash_cost)?;
        let csrf = CsrfGuard::new(&config.secret_key, config.cookie.secure)?;
        let views = Arc::new(Views::new().context("compile templates")?);
        Ok(Self {
            store,
            config: Arc::new(config),
            views,
            hasher,
            csrf,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::CookieConfig;

        let config = AppConfig {
            database_url: MEMORY_DATABASE_URL.into(),
            secret_key: "test-secret".into(),
            hash_cost: 1,
            cookie: CookieConfig { secure: false },
        };
        Self::from_parts(Arc::new(MemoryUserStore::default()), config).expect("fake state")
    }
}

async fn connect_store(database_url: &str) -> anyhow::Result<Arc<dyn UserStore>> {
    if database_url.starts_with(MEMORY_DATABASE_URL) {
        info!("using in-memory user store");
        return Ok(Arc::new(MemoryUserStore::default()));
    }

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run migrations")?;
    Ok(Arc::new(PgUserStore::new(db)))
}
