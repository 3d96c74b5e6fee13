//! Plugin extensibility runtime for Lumina Note.
//!
//! Plugins extend the app through a set of registries, each owning one kind
//! of contribution:
//!
//! - **Style**: layered, optionally scoped CSS with conflict detection
//! - **Theme**: CSS custom property overrides and presets per color scheme
//! - **Editor**: opaque editor extensions pushed to a reconfigure callback
//! - **Render**: markdown post-processors, code block renderers and
//!   reading view hooks
//! - **Surfaces**: status bar items, context menu items and shell slots
//! - **Hotkeys**: normalized key patterns bound to plugin commands
//!
//! Every registration returns a [`Disposer`]. Calling it twice is a no-op,
//! and `clear_plugin` on any registry reverses everything a plugin left
//! behind whether or not its disposers were called.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lumina_plugins::plugin::{MemoryDocument, PluginRuntime};
//!
//! let document = Arc::new(MemoryDocument::new());
//! let runtime: PluginRuntime<String> = PluginRuntime::new(document.clone());
//!
//! let api = runtime.api("word-count");
//! api.inject_style(".count { color: gray; }", None).unwrap();
//! api.set_theme_variables([("accent", "#ff8800")]).unwrap();
//!
//! runtime.unload_plugin("word-count");
//! assert!(runtime.style().is_empty());
//! ```

mod disposer;
mod document;
mod editor;
mod error;
mod host;
mod hotkey;
mod render;
mod style;
mod surface;
mod theme;

pub use disposer::Disposer;
pub use document::{Document, MemoryDocument};
pub use editor::{EditorRuntime, EditorSelection, ReconfigureFn};
pub use error::{PluginError, PluginResult};
pub use host::{LogLevel, PluginApi, PluginRuntime};
pub use hotkey::{
    normalize_hotkey_pattern, HotkeyBinding, HotkeyConflict, HotkeyRegistry, MODIFIER_ORDER,
};
pub use render::{
    Cleanup, CodeBlock, CodeBlockRenderFn, PostProcessorFn, ReadingView, ReadingViewHook,
    RenderRuntime,
};
pub use style::{
    extract_selectors, scope_css, StyleConflict, StyleEntry, StyleInput, StyleLayer, StyleRuntime,
    StyleUpdate,
};
pub use surface::{
    ActionFn, ContextMenuItem, MenuActionFn, MenuContext, ShellSlot, StatusBarAlign, StatusBarItem,
    UiSurfaceStore,
};
pub use theme::{
    normalize_token_name, ColorScheme, PresetRecord, ThemeMode, ThemePreset, ThemeRuntime, TokenMap,
};
