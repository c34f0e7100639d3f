//! # pairgate-core
//!
//! Core types, traits, config, and error handling for pairgate.

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod traits;

pub use config::shellexpand;
