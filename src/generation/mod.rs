//! Listing generation against the rate-limited text/vision service:
//! prompt template, retry orchestration, category classification.

pub mod category;
pub mod orchestrator;
pub mod template;
pub mod vision;

use async_trait::async_trait;
use std::time::Duration;

pub use category::{CategoryRun, CategorySelector};
pub use orchestrator::{GenerationInput, GenerationOrchestrator, GenerationRun};

/// Source of delays for the retry loops. Waits are not cancellable.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
