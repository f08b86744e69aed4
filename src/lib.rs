//! Lendstack lending transaction core
//!
//! The lending subsystem of the Lendstack library system: borrow, return,
//! approval, and renewal workflows over two independent storage backends
//! (a networked PostgreSQL store and an embedded SQLite store), with
//! per-request backend selection and best-effort fallback.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state handed to the transport layer
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

impl AppState {
    /// Connect both stores and assemble the service graph
    pub async fn initialize(config: AppConfig) -> AppResult<Self> {
        let selector = repository::connect_backends(&config.storage).await?;
        let services = services::Services::new(selector);
        Ok(Self {
            config: Arc::new(config),
            services: Arc::new(services),
        })
    }
}
