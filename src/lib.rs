//! Voice Orchestrator - intent resolution for a voice-controlled smart home
//!
//! This library turns transcribed voice commands into device actions:
//! - Event correlation of wake, transcript and speaker messages per room
//! - Transcript sanitization against the home's vocabulary
//! - Tiered resolution: semantic cache, fast path, language-model fallback
//! - Learning of fallback tool calls into the semantic cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Satellites (MQTT)                    │
//! │   wake  │  transcript  │  speaker  │  session end   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                        │
//! │  Correlator │ Sanitizer │ Cache │ Router │ Fallback │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Home Assistant  │  LLM  │  Embeddings  │  S3      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod broker;
pub mod config;
pub mod correlator;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod home;
pub mod llm;
pub mod pipeline;
pub mod sanitizer;
pub mod semantic;
pub mod session;
pub mod storage;
pub mod tools;

pub use config::Config;
pub use correlator::{EventCorrelator, ReadyIntent, Transition};
pub use daemon::{Daemon, IntentDispatcher};
pub use error::{Error, Result};
pub use pipeline::{Resolution, ResolutionPipeline, Tier};
pub use sanitizer::Sanitizer;
pub use semantic::{SemanticCache, SemanticRouter, TeachOutcome};
