//! Umi Feeds donation backend core.
//!
//! Donors submit food donations, volunteers reserve, pick up and drop them
//! off, and administrators follow their status. Each donation lives twice: in
//! the donor's embedded list of donation forms and, while it is active, in
//! the ongoing donation queue. [`lifecycle::LifecycleCoordinator`] keeps the
//! two in step.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod storage;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{IdentityVerifier, StaticTokenVerifier};
use config::Config;
use db::Repository;
use errors::AppError;
use lifecycle::LifecycleCoordinator;
use notify::{LogPushGateway, Notifier};
use storage::{FsObjectStore, ObjectStore};

/// Application state shared by every caller.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Open the database and build every collaborator once.
    pub async fn init(config: Config) -> Result<Self, AppError> {
        tracing::info!("Database path: {:?}", config.db_path);
        tracing::info!("Image directory: {:?}", config.image_dir);

        let pool = db::init_database(&config.db_path).await?;
        let repo = Arc::new(Repository::new(pool));

        let images: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
            config.image_dir.clone(),
            &config.image_base_url,
            &config.image_container,
        ));
        let identity: Arc<dyn IdentityVerifier> =
            Arc::new(StaticTokenVerifier::new(config.auth_tokens.clone()));
        let notifier = Notifier::new(Arc::new(LogPushGateway));

        let coordinator = Arc::new(LifecycleCoordinator::new(
            repo.clone(),
            images,
            identity,
            notifier,
        ));

        Ok(Self {
            repo,
            coordinator,
            config: Arc::new(config),
        })
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod test_support;
