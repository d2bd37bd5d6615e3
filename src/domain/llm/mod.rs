//! LLM collaborator

mod client;

pub use client::LlmClient;

#[cfg(test)]
pub use client::mock::ScriptedLlmClient;
