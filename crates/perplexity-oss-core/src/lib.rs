//! Core types, wire protocol, config, errors, and conversation state for Perplexity OSS.

pub mod citation;
pub mod config;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod types;
