//! Host side of the plugin runtime.
//!
//! [`PluginRuntime`] owns one instance of every registry and hands each
//! plugin a [`PluginApi`] capability object with its id bound. Unloading a
//! plugin clears it from every registry.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{
    Cleanup, CodeBlock, ContextMenuItem, Disposer, Document, EditorRuntime, EditorSelection,
    HotkeyRegistry, PluginResult, ReadingView, RenderRuntime, ShellSlot, StatusBarItem, StyleInput,
    StyleRuntime, ThemeMode, ThemePreset, ThemeRuntime, UiSurfaceStore,
};
use crate::core::RuntimeConfig;

/// Log level for plugin logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

/// Every plugin registry, wired to one document.
pub struct PluginRuntime<E> {
    config: RuntimeConfig,
    document: Arc<dyn Document>,
    style: StyleRuntime,
    theme: ThemeRuntime,
    editor: EditorRuntime<E>,
    render: RenderRuntime,
    surfaces: UiSurfaceStore,
    hotkeys: HotkeyRegistry,
    loaded: Arc<Mutex<BTreeSet<String>>>,
}

impl<E> Clone for PluginRuntime<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            document: Arc::clone(&self.document),
            style: self.style.clone(),
            theme: self.theme.clone(),
            editor: self.editor.clone(),
            render: self.render.clone(),
            surfaces: self.surfaces.clone(),
            hotkeys: self.hotkeys.clone(),
            loaded: Arc::clone(&self.loaded),
        }
    }
}

impl<E> fmt::Debug for PluginRuntime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("loaded", &*self.loaded.lock())
            .field("style", &self.style)
            .field("editor", &self.editor)
            .field("render", &self.render)
            .field("surfaces", &self.surfaces)
            .finish()
    }
}

impl<E> PluginRuntime<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create a runtime with default settings.
    pub fn new(document: Arc<dyn Document>) -> Self {
        Self::with_config(RuntimeConfig::default(), document)
    }

    /// Create a runtime from loaded configuration.
    pub fn with_config(config: RuntimeConfig, document: Arc<dyn Document>) -> Self {
        Self {
            style: StyleRuntime::with_config(Arc::clone(&document), config.style.clone()),
            theme: ThemeRuntime::with_scheme(Arc::clone(&document), config.theme.mode),
            editor: EditorRuntime::new(),
            render: RenderRuntime::new(),
            surfaces: UiSurfaceStore::new(),
            hotkeys: HotkeyRegistry::new(),
            loaded: Arc::new(Mutex::new(BTreeSet::new())),
            document,
            config,
        }
    }

    /// Capability object for one plugin.
    pub fn api(&self, plugin_id: &str) -> PluginApi<E> {
        if self.loaded.lock().insert(plugin_id.to_string()) {
            info!(plugin_id, "plugin loaded");
        }
        PluginApi { plugin_id: plugin_id.to_string(), runtime: self.clone() }
    }

    /// Reverse every side effect a plugin produced.
    pub fn unload_plugin(&self, plugin_id: &str) {
        self.style.clear_plugin(plugin_id);
        self.theme.clear_plugin(plugin_id);
        self.editor.clear_plugin(plugin_id);
        self.render.clear_plugin(plugin_id);
        self.surfaces.clear_plugin(plugin_id);
        self.hotkeys.clear_plugin(plugin_id);
        self.loaded.lock().remove(plugin_id);
        info!(plugin_id, "plugin unloaded");
    }

    /// Ids of plugins that received an API and were not unloaded.
    pub fn loaded_plugins(&self) -> Vec<String> {
        self.loaded.lock().iter().cloned().collect()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn document(&self) -> &Arc<dyn Document> {
        &self.document
    }

    pub fn style(&self) -> &StyleRuntime {
        &self.style
    }

    pub fn theme(&self) -> &ThemeRuntime {
        &self.theme
    }

    pub fn editor(&self) -> &EditorRuntime<E> {
        &self.editor
    }

    pub fn render(&self) -> &RenderRuntime {
        &self.render
    }

    pub fn surfaces(&self) -> &UiSurfaceStore {
        &self.surfaces
    }

    pub fn hotkeys(&self) -> &HotkeyRegistry {
        &self.hotkeys
    }
}

/// The capability object a plugin receives.
///
/// Every method forwards to the owning registry with this plugin's id.
pub struct PluginApi<E> {
    plugin_id: String,
    runtime: PluginRuntime<E>,
}

impl<E> Clone for PluginApi<E> {
    fn clone(&self) -> Self {
        Self { plugin_id: self.plugin_id.clone(), runtime: self.runtime.clone() }
    }
}

impl<E> fmt::Debug for PluginApi<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi").field("plugin_id", &self.plugin_id).finish()
    }
}

impl<E> PluginApi<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Inject CSS, optionally scoped to a host element.
    pub fn inject_style(&self, css: &str, scope_id: Option<&str>) -> PluginResult<Disposer> {
        let mut input = StyleInput::new(css);
        if let Some(scope_id) = scope_id {
            input = input.scoped(scope_id);
        }
        self.inject_style_with(input)
    }

    pub fn inject_style_with(&self, input: StyleInput) -> PluginResult<Disposer> {
        self.runtime.style.register_style(&self.plugin_id, input)
    }

    /// Override several tokens for every color scheme at once.
    ///
    /// Either all tokens are applied or none are.
    pub fn set_theme_variables<K, V>(
        &self,
        tokens: impl IntoIterator<Item = (K, V)>,
    ) -> PluginResult<Disposer>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.runtime.theme.set_tokens(&self.plugin_id, tokens, ThemeMode::All)
    }

    pub fn set_theme_token(&self, token: &str, value: &str, mode: ThemeMode) -> PluginResult<Disposer> {
        self.runtime.theme.set_token(&self.plugin_id, token, value, mode)
    }

    pub fn register_theme_preset(&self, preset: ThemePreset) -> PluginResult<Disposer> {
        self.runtime.theme.register_preset(&self.plugin_id, preset)
    }

    /// Apply one of this plugin's presets. Unknown ids are ignored.
    pub fn apply_theme_preset(&self, preset_id: &str) -> bool {
        self.runtime.theme.apply_preset(&self.plugin_id, preset_id)
    }

    pub fn register_editor_extension(&self, extension: E) -> Disposer {
        self.runtime.editor.register_extension(&self.plugin_id, extension)
    }

    pub fn register_markdown_post_processor(
        &self,
        id: &str,
        run: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Disposer {
        self.runtime.render.register_markdown_post_processor(&self.plugin_id, id, run)
    }

    pub fn register_code_block_renderer(
        &self,
        id: &str,
        language: &str,
        render: impl Fn(&CodeBlock<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Disposer {
        self.runtime.render.register_code_block_renderer(&self.plugin_id, id, language, render)
    }

    pub fn register_reading_view_post_processor(
        &self,
        id: &str,
        hook: impl Fn(&ReadingView) -> Option<Cleanup> + Send + Sync + 'static,
    ) -> Disposer {
        self.runtime.render.register_reading_view_post_processor(&self.plugin_id, id, hook)
    }

    pub fn register_status_bar_item(&self, item: StatusBarItem) -> PluginResult<Disposer> {
        self.runtime.surfaces.register_status_bar_item(&self.plugin_id, item)
    }

    pub fn register_context_menu_item(&self, item: ContextMenuItem) -> PluginResult<Disposer> {
        self.runtime.surfaces.register_context_menu_item(&self.plugin_id, item)
    }

    pub fn register_shell_slot(&self, slot: ShellSlot) -> PluginResult<Disposer> {
        self.runtime.surfaces.register_shell_slot(&self.plugin_id, slot)
    }

    pub fn register_hotkey(&self, pattern: &str, command_id: &str) -> PluginResult<Disposer> {
        self.runtime.hotkeys.register(&self.plugin_id, pattern, command_id)
    }

    /// The host editor's current selection.
    pub fn selection(&self) -> Option<EditorSelection> {
        self.runtime.editor.selection()
    }

    /// Log a message on behalf of the plugin.
    pub fn log(&self, level: LogLevel, message: &str) {
        let plugin = self.plugin_id.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(plugin, "{}", message),
            LogLevel::Debug => tracing::debug!(plugin, "{}", message),
            LogLevel::Info => tracing::info!(plugin, "{}", message),
            LogLevel::Warn => tracing::warn!(plugin, "{}", message),
            LogLevel::Error => tracing::error!(plugin, "{}", message),
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }
}
