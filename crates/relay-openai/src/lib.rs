//! # Relay OpenAI
//!
//! `ModelProvider` implementation for the OpenAI chat completions API and
//! wire-compatible services. Configured entirely from the environment:
//! `OPENAI_API_KEY`, plus optional `OPENAI_BASE_URL` and `OPENAI_MODEL`
//! overrides for compatible endpoints.

pub mod openai;

pub use openai::{OpenAiConfig, OpenAiProvider};
