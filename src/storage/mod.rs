pub mod db;
mod engine;
pub mod models;
pub mod redis_engine;
mod tables;

use std::sync::Arc;

use async_trait::async_trait;

pub use db::RedbEngine;
pub use engine::{expect_replies, Batch, Command, EngineError, KeyTtl, KeyValueEngine, Reply};
pub use redis_engine::RedisEngine;
pub use tables::*;

use crate::clock::Clock;
use crate::config::{EngineConfig, EngineKind};

/// The engine selected by configuration
#[derive(Clone)]
pub enum Engine {
    Embedded(RedbEngine),
    Redis(RedisEngine),
}

impl Engine {
    /// Open the configured engine. The clock drives TTLs of the embedded engine only.
    pub async fn open(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        match config.kind {
            EngineKind::Embedded => {
                let engine = RedbEngine::open(&config.data_dir, clock)?;
                tracing::info!(data_dir = %config.data_dir, "Embedded engine opened");
                Ok(Engine::Embedded(engine))
            }
            EngineKind::Redis => {
                let url = config.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379");
                Ok(Engine::Redis(RedisEngine::connect(url).await?))
            }
        }
    }

    /// The embedded engine, when that is what is running (it needs a reaper task)
    pub fn embedded(&self) -> Option<&RedbEngine> {
        match self {
            Engine::Embedded(engine) => Some(engine),
            Engine::Redis(_) => None,
        }
    }

    pub fn shared(&self) -> Arc<dyn KeyValueEngine> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl KeyValueEngine for Engine {
    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, EngineError> {
        match self {
            Engine::Embedded(engine) => engine.execute(batch).await,
            Engine::Redis(engine) => engine.execute(batch).await,
        }
    }
}
