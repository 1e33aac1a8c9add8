//! # Messaging Configuration
//!
//! Centralized timings and limits for the actor messaging layer.
//!
//! ## Features
//!
//! - **Defaults**: call deadline, sweep cadence, relocation backoff and retry
//!   ceiling as named constants
//! - **Loading**: TOML file, optional per-environment overlay, then
//!   `MESSAGING_*` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use messaging_config::{defaults, MessagingConfig};
//! use std::path::Path;
//!
//! let config = MessagingConfig::load(Some(Path::new("config/messaging.toml")), Some("staging"))
//!     .unwrap_or_default();
//! assert!(config.retry_backoff() >= std::time::Duration::from_millis(1));
//! assert_eq!(defaults::RETRY_BACKOFF_MS, 1_000);
//! ```

pub mod defaults;
pub mod messaging_config;

pub use messaging_config::{load_config, MessagingConfig};
