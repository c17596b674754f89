//! Cache command - inspect and clean the artifact cache.

use crate::cli::{CacheAction, Output};
use crate::config::Settings;

/// Run the cache command.
pub async fn run_cache(action: &CacheAction, settings: Settings) -> anyhow::Result<()> {
    let cache = super::build_cache(&settings, false)?;

    match action {
        CacheAction::Stats => {
            let count = cache.entry_count().await?;
            Output::header("Artifact Cache");
            Output::kv("Provider", &format!("{:?}", settings.cache.provider).to_lowercase());
            Output::kv("Path", &settings.cache_path().display().to_string());
            Output::kv("Entries", &count.to_string());
            Output::kv("TTL", &format!("{}h", settings.cache.ttl_hours));
            Output::kv("Prompt version", &settings.cache.prompt_version);
        }

        CacheAction::Purge => {
            let removed = cache.purge_expired().await?;
            Output::success(&format!("Removed {} expired entries", removed));
        }
    }

    Ok(())
}
