//! Shared domain types for mergebot.
//!
//! This crate contains the core domain types used across the mergebot engine:
//! Message, Participant, BotDescriptor, Invocation, and their associated
//! error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! schemars, toml.

pub mod bot;
pub mod config;
pub mod error;
pub mod invocation;
pub mod message;
pub mod participant;
