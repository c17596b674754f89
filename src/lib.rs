//! Oppsum - Transcript Summarization
//!
//! A job-based map-reduce summarizer that turns long timestamped transcripts
//! into structured, timestamp-anchored summaries.
//!
//! The name "Oppsum" comes from the Norwegian word "oppsummere," to summarize.
//!
//! # Overview
//!
//! Oppsum allows you to:
//! - Submit transcripts as jobs under a fixed concurrency ceiling
//! - Split a transcript into token-bounded, timestamp-preserving chunks
//! - Summarize chunk-by-chunk, then merge into one structured summary
//! - Validate the output against the source and reuse cached results
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration and prompt templates
//! - `transcript` - Transcript model and acquisition seam
//! - `chunking` - Token-budget chunking
//! - `llm` - LLM capability abstraction and retry policy
//! - `pipeline` - Map, reduce, and validation stage executors
//! - `artifact` - Content-hashed stage outputs
//! - `cache` - Content-addressed artifact cache
//! - `scheduler` - Job state machine, admission, events
//!
//! # Example
//!
//! ```rust,no_run
//! use oppsum::cache::MemoryCache;
//! use oppsum::config::{Prompts, Settings};
//! use oppsum::llm::OpenAiClient;
//! use oppsum::pipeline::JobParams;
//! use oppsum::scheduler::Scheduler;
//! use oppsum::transcript::{Transcript, TranscriptSegment};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let params = JobParams::from_settings(&settings);
//!     let scheduler = Scheduler::new(
//!         settings,
//!         Prompts::default(),
//!         Arc::new(OpenAiClient::new()),
//!         Arc::new(MemoryCache::new()),
//!     );
//!
//!     let transcript = Transcript::new(
//!         "talk",
//!         vec![TranscriptSegment::new(0, 60_000, "hello world")],
//!     );
//!     let job_id = scheduler.submit(transcript, params).await?;
//!     let result = scheduler.wait(&job_id).await;
//!     println!("{:?}", result);
//!
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod cache;
pub mod chunking;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod scheduler;
pub mod transcript;

pub use error::{ErrorKind, OppsumError, Result};
