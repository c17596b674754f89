//! CLI command implementations.

mod cache;
mod config;
mod init;
mod serve;
mod summarize;

pub use cache::run_cache;
pub use config::run_config;
pub use init::run_init;
pub use serve::run_serve;
pub use summarize::run_summarize;

use crate::cache::{ArtifactCache, MemoryCache, SqliteCache};
use crate::config::{CacheProvider, Prompts, Settings};
use crate::llm::OpenAiClient;
use crate::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured artifact cache backend.
pub(crate) fn build_cache(
    settings: &Settings,
    force_memory: bool,
) -> crate::error::Result<Arc<dyn ArtifactCache>> {
    if force_memory || settings.cache.provider == CacheProvider::Memory {
        Ok(Arc::new(MemoryCache::new()))
    } else {
        Ok(Arc::new(SqliteCache::new(&settings.cache_path())?))
    }
}

/// Assemble a scheduler over the production LLM client.
pub(crate) fn build_scheduler(
    settings: &Settings,
    force_memory_cache: bool,
) -> crate::error::Result<Scheduler> {
    let client = Arc::new(OpenAiClient::with_timeout(Duration::from_secs(
        settings.llm.timeout_seconds,
    )));
    let cache = build_cache(settings, force_memory_cache)?;
    Ok(Scheduler::new(
        settings.clone(),
        Prompts::default(),
        client,
        cache,
    ))
}
