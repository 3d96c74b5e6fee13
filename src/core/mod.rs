//! Core configuration shared by the runtime and the command line tool.

mod config;

pub use config::{LoggingConfig, RuntimeConfig, StyleConfig, ThemeConfig, DEFAULT_SCOPE_ATTRIBUTE};
