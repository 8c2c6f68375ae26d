//! Plugin registry and memoizing suppliers.
//!
//! The [`plugins`] module resolves declared plugins into a type-indexed
//! [`plugins::PluginRegistry`], downloading and verifying plugin path entries
//! on demand. The [`memoize`] module provides the lazily computed, safely
//! shared values the registry (and any other caller) builds on.

pub mod config;
pub mod error;
pub mod memoize;
pub mod plugins;

pub use config::{DownloadSettings, PluginSettings};
pub use error::{ErrorKind, FatalError, LinkageError, PluginError};
