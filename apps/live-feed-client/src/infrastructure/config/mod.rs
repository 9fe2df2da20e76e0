//! Configuration Module
//!
//! Configuration loading for the feed client.

mod settings;

pub use settings::{ClientConfig, ConfigError, HttpSettings};
