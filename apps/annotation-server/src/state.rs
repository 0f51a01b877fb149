//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::annotations::AnnotationService;
use crate::config::Config;
use crate::realtime::ChannelHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    annotations: AnnotationService,
}

impl AppState {
    /// Wire the channel hub and the annotation service over `db`
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let hub = ChannelHub::new(config.channel.capacity);
        let annotations = AnnotationService::new(db.clone(), hub, config.annotations.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                annotations,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// The single writer for annotation sets
    pub fn annotations(&self) -> &AnnotationService {
        &self.inner.annotations
    }

    pub fn hub(&self) -> &ChannelHub {
        self.inner.annotations.hub()
    }
}
