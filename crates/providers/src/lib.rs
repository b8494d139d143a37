//! LLM Provider implementations for Handoff.
//!
//! All providers implement the `handoff_core::Provider` trait.
//! [`build_provider`] picks the endpoint named in the configuration.

pub mod endpoint;
pub mod openai_compat;

pub use endpoint::{build_provider, requires_api_key};
pub use openai_compat::OpenAiCompatProvider;
