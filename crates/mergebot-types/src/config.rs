//! Engine configuration for mergebot.
//!
//! `CoordinatorConfig` collects every tunable of the routing engine. The
//! original system fixed no numeric policy, so everything here is a
//! configuration point with a serde default, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the coordination engine.
///
/// All fields have defaults; a partial TOML document overrides only the
/// fields it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How many times a retryable invocation failure is retried before it
    /// is surfaced into the conversation.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Grace period a cancelled handler gets to finish cooperatively
    /// before the invocation is force-marked failed.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Confidence distance within which two classifier candidates count as
    /// an equal-confidence tie.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,

    /// Maximum bot-to-bot delegation depth per request chain.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,

    /// Buffer size of the outbound user-facing broadcast feed.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Buffer size of each invocation's response stream.
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
}

fn default_max_retry_attempts() -> u32 {
    2
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

fn default_tie_epsilon() -> f64 {
    1e-6
}

fn default_max_delegation_depth() -> u32 {
    8
}

fn default_outbound_buffer() -> usize {
    1024
}

fn default_response_buffer() -> usize {
    64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            cancel_grace_ms: default_cancel_grace_ms(),
            tie_epsilon: default_tie_epsilon(),
            max_delegation_depth: default_max_delegation_depth(),
            outbound_buffer: default_outbound_buffer(),
            response_buffer: default_response_buffer(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// The cancellation grace period as a `Duration`.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}
