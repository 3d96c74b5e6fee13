//! # Lumina Plugins
//!
//! The plugin extensibility runtime behind Lumina Note.
//!
//! Plugins contribute styles, theme tokens, editor extensions, markdown
//! renderers, UI items and hotkeys through a capability object. Each
//! contribution can be withdrawn individually through its disposer, or in
//! bulk when the plugin is unloaded.
//!
//! ## Features
//!
//! - **Layered CSS**: base, theme, component and override layers with
//!   per-element scoping and cross-plugin selector conflict reports
//! - **Theme tokens**: light/dark aware overrides that restore the
//!   document's original values when withdrawn
//! - **Resilient rendering**: a failing renderer or post-processor never
//!   breaks the rendered document
//! - **Headless**: the live document sits behind a narrow trait, so the
//!   whole runtime runs and tests without a browser
//!
//! ## Quick Start
//!
//! ```bash
//! # Normalize hotkey patterns
//! lumina-plugins hotkey "Shift+Ctrl+K" "mod+option+h"
//!
//! # Inspect the cascade and conflicts of plugin stylesheets
//! lumina-plugins styles theme-a=a.css theme-b:override=b.css
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::type_complexity)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]

pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use crate::core::RuntimeConfig;
pub use plugin::{
    normalize_hotkey_pattern, Disposer, Document, MemoryDocument, PluginApi, PluginError,
    PluginResult, PluginRuntime,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "lumina-plugins";
