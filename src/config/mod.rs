//! Configuration management for Oppsum.

mod prompts;
mod settings;

pub use prompts::{MapPrompts, Prompts, ReducePrompts};
pub use settings::{
    CacheProvider, CacheSettings, ChunkingSettings, GeneralSettings, LlmSettings, MapSettings,
    PipelineSettings, ReduceSettings, Settings, ValidationSettings,
};
