//! Configuration settings for Oppsum.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    pub chunking: ChunkingSettings,
    pub map: MapSettings,
    pub reduce: ReduceSettings,
    pub validation: ValidationSettings,
    pub cache: CacheSettings,
    pub llm: LlmSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.oppsum".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Scheduler and job pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Global ceiling on concurrently running jobs.
    pub max_concurrent_jobs: usize,
    /// Bounded parallelism for map-stage chunk calls within one job.
    pub map_parallelism: usize,
    /// Default language hint passed to the LLM stages.
    pub language: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            map_parallelism: 2,
            language: "en".to_string(),
        }
    }
}

/// Chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Token budget per chunk.
    pub token_budget: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { token_budget: 900 }
    }
}

/// Map stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    /// Model for per-chunk summarization.
    pub model: String,
    /// Sampling temperature for map calls.
    pub temperature: f32,
    /// Output token ceiling per map call.
    pub max_output_tokens: u32,
    /// Schema-validation retries per chunk before failing the job.
    pub max_schema_retries: u32,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_output_tokens: 1024,
            max_schema_retries: 2,
        }
    }
}

/// Reduce stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceSettings {
    /// Higher-quality model for the single merge/finalize call.
    pub model: String,
    /// Sampling temperature for reduce calls.
    pub temperature: f32,
    /// Output token ceiling for the reduce call (larger than map).
    pub max_output_tokens: u32,
    /// Schema-validation retries before failing the job.
    pub max_schema_retries: u32,
}

impl Default for ReduceSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".to_string(),
            temperature: 0.2,
            max_output_tokens: 4096,
            max_schema_retries: 2,
        }
    }
}

/// Validation thresholds for the reduced summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Minimum fraction of video duration covered by bullet timestamps.
    pub coverage_min: f64,
    /// Minimum fraction of quoted bullets whose evidence matches the source.
    pub overlap_min: f64,
    /// Bucket size for coverage scoring, in seconds.
    pub bucket_seconds: u64,
    /// Slack added to each side of a bullet's claimed window when checking
    /// evidence quotes, in seconds.
    pub overlap_slack_seconds: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            coverage_min: 0.5,
            overlap_min: 0.6,
            bucket_seconds: 30,
            overlap_slack_seconds: 15,
        }
    }
}

/// Cache provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheProvider {
    /// SQLite-backed persistent cache (default).
    #[default]
    Sqlite,
    /// In-memory cache, lost on restart.
    Memory,
}

impl std::str::FromStr for CacheProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(CacheProvider::Sqlite),
            "memory" => Ok(CacheProvider::Memory),
            _ => Err(format!("Unknown cache provider: {}", s)),
        }
    }
}

/// Artifact cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache provider (sqlite, memory).
    pub provider: CacheProvider,
    /// Path to the SQLite cache database.
    pub sqlite_path: String,
    /// Entry time-to-live in hours.
    pub ttl_hours: u64,
    /// Prompt version; bumping it changes every fingerprint.
    pub prompt_version: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            provider: CacheProvider::Sqlite,
            sqlite_path: "~/.oppsum/cache.db".to_string(),
            ttl_hours: 24 * 7,
            prompt_version: "v1".to_string(),
        }
    }
}

/// LLM client and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
    /// Maximum attempts per LLM call (first try plus retries).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds, doubled per attempt.
    pub backoff_base_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::OppsumError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oppsum")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite cache path.
    pub fn cache_path(&self) -> PathBuf {
        Self::expand_path(&self.cache.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.pipeline.max_concurrent_jobs, 3);
        assert!(s.pipeline.map_parallelism >= 1);
        assert!(s.chunking.token_budget > 0);
        assert!(s.validation.coverage_min > 0.0 && s.validation.coverage_min < 1.0);
        assert_eq!(s.cache.provider, CacheProvider::Sqlite);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            [pipeline]
            max_concurrent_jobs = 5

            [reduce]
            model = "gpt-5"
        "#;
        let s: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(s.pipeline.max_concurrent_jobs, 5);
        assert_eq!(s.reduce.model, "gpt-5");
        // Untouched sections come from defaults.
        assert_eq!(s.map.model, "gpt-4o-mini");
        assert_eq!(s.cache.prompt_version, "v1");
    }

    #[test]
    fn test_roundtrip() {
        let s = Settings::default();
        let serialized = toml::to_string_pretty(&s).unwrap();
        let back: Settings = toml::from_str(&serialized).unwrap();
        assert_eq!(back.reduce.model, s.reduce.model);
        assert_eq!(back.cache.ttl_hours, s.cache.ttl_hours);
    }

    #[test]
    fn test_cache_provider_parse() {
        assert_eq!("sqlite".parse::<CacheProvider>(), Ok(CacheProvider::Sqlite));
        assert_eq!("MEMORY".parse::<CacheProvider>(), Ok(CacheProvider::Memory));
        assert!("redis".parse::<CacheProvider>().is_err());
    }
}
