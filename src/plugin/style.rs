//! Plugin-injected CSS, ordered by cascade layer.
//!
//! Entries are materialized in ascending layer order
//! (`base < theme < component < override`) with registration order as the
//! tie-break. Selector conflicts between plugins are reported for
//! diagnostics but never block registration.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Disposer, Document, PluginError, PluginResult};
use crate::core::StyleConfig;

static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Coarse cascade bucket for plugin CSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleLayer {
    /// Resets and foundations.
    Base,
    /// Theme-level styling.
    Theme,
    /// Component styling (default).
    Component,
    /// Last-resort overrides.
    Override,
}

impl StyleLayer {
    /// All layers in cascade order.
    pub const ALL: [Self; 4] = [Self::Base, Self::Theme, Self::Component, Self::Override];

    /// Position in the cascade (lower applies first).
    pub fn rank(self) -> usize {
        self as usize
    }

    /// Layer name as used in configuration and CSS attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Theme => "theme",
            Self::Component => "component",
            Self::Override => "override",
        }
    }
}

impl Default for StyleLayer {
    fn default() -> Self {
        Self::Component
    }
}

impl fmt::Display for StyleLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StyleLayer {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PluginError::validation(format!("Unknown style layer: {s}")))
    }
}

/// CSS a plugin asks to inject.
#[derive(Debug, Clone, Default)]
pub struct StyleInput {
    /// Stylesheet text. Syntax is not validated.
    pub css: String,
    /// Host element scope the selectors are confined to.
    pub scope_id: Option<String>,
    /// Skip scoping even when a scope is given.
    pub global: bool,
    /// Cascade layer; the configured default when `None`.
    pub layer: Option<StyleLayer>,
}

impl StyleInput {
    /// Unscoped CSS in the default layer.
    pub fn new(css: impl Into<String>) -> Self {
        Self { css: css.into(), ..Self::default() }
    }

    /// Confine selectors to the given scope.
    pub fn scoped(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    /// Mark the CSS as global.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Place the CSS in a specific layer.
    pub fn layer(mut self, layer: StyleLayer) -> Self {
        self.layer = Some(layer);
        self
    }
}

/// A registered stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleEntry {
    /// Unique entry id (`<plugin>:<millis>:<seq>`).
    pub id: String,
    /// Owning plugin.
    pub plugin_id: String,
    /// Scope the CSS was confined to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    /// Whether scoping was skipped.
    pub global: bool,
    /// Cascade layer.
    pub layer: StyleLayer,
    /// Stylesheet text, after scoping.
    pub css: String,
    /// Registration sequence, used as the tie-break within a layer.
    pub order: u64,
}

/// Two or more plugins targeting the same selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleConflict {
    /// Normalized selector text.
    pub selector: String,
    /// Distinct plugins whose CSS uses the selector, first seen first.
    pub plugin_ids: Vec<String>,
    /// Every entry using the selector.
    pub entry_ids: Vec<String>,
}

/// Snapshot delivered to update listeners.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StyleUpdate {
    /// Entries in cascade order.
    pub entries: Vec<StyleEntry>,
    /// Current conflicts.
    pub conflicts: Vec<StyleConflict>,
}

type Listener = Arc<dyn Fn(&StyleUpdate) + Send + Sync>;

#[derive(Default)]
struct StyleState {
    seq: u64,
    entries: Vec<StyleEntry>,
    listener_seq: u64,
    listeners: Vec<(u64, Listener)>,
}

struct StyleShared {
    state: Mutex<StyleState>,
    document: Arc<dyn Document>,
    config: StyleConfig,
}

/// Registry of plugin stylesheets.
#[derive(Clone)]
pub struct StyleRuntime {
    shared: Arc<StyleShared>,
}

impl fmt::Debug for StyleRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleRuntime").field("entries", &self.shared.state.lock().entries.len()).finish()
    }
}

impl StyleRuntime {
    /// Create a runtime with default settings.
    pub fn new(document: Arc<dyn Document>) -> Self {
        Self::with_config(document, StyleConfig::default())
    }

    /// Create a runtime with explicit settings.
    pub fn with_config(document: Arc<dyn Document>, config: StyleConfig) -> Self {
        Self {
            shared: Arc::new(StyleShared { state: Mutex::new(StyleState::default()), document, config }),
        }
    }

    /// Register a stylesheet for a plugin.
    pub fn register_style(&self, plugin_id: &str, input: StyleInput) -> PluginResult<Disposer> {
        let css = input.css.trim();
        if css.is_empty() {
            return Err(PluginError::validation("Style css cannot be empty"));
        }

        let layer = input.layer.unwrap_or(self.shared.config.default_layer);
        let scope_id =
            input.scope_id.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let css = match (&scope_id, input.global) {
            (Some(scope), false) => scope_css(css, &self.shared.config.scope_attribute, scope),
            _ => css.to_string(),
        };

        let id = {
            let mut state = self.shared.state.lock();
            state.seq += 1;
            let order = state.seq;
            let id = format!("{plugin_id}:{}:{order}", Utc::now().timestamp_millis());
            state.entries.push(StyleEntry {
                id: id.clone(),
                plugin_id: plugin_id.to_string(),
                scope_id,
                global: input.global,
                layer,
                css,
                order,
            });
            id
        };
        debug!(plugin_id, id = %id, layer = %layer, "registered plugin style");
        self.publish();

        let weak: Weak<StyleShared> = Arc::downgrade(&self.shared);
        Ok(Disposer::new(move || {
            if let Some(shared) = weak.upgrade() {
                StyleRuntime { shared }.remove_entry(&id);
            }
        }))
    }

    /// Remove every stylesheet a plugin registered.
    pub fn clear_plugin(&self, plugin_id: &str) {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.entries.len();
            state.entries.retain(|entry| entry.plugin_id != plugin_id);
            before - state.entries.len()
        };
        debug!(plugin_id, removed, "cleared plugin styles");
        self.publish();
    }

    /// Remove every stylesheet.
    pub fn clear_all(&self) {
        self.shared.state.lock().entries.clear();
        self.publish();
    }

    /// Entries sorted by layer, then registration order.
    pub fn list_entries(&self) -> Vec<StyleEntry> {
        sorted_entries(&self.shared.state.lock().entries)
    }

    /// Selectors used by more than one plugin.
    pub fn list_conflicts(&self) -> Vec<StyleConflict> {
        if !self.shared.config.detect_conflicts {
            return Vec::new();
        }
        detect_conflicts(&self.shared.state.lock().entries)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Be notified with the new entries and conflicts after every change.
    pub fn subscribe(&self, listener: impl Fn(&StyleUpdate) + Send + Sync + 'static) -> Disposer {
        let id = {
            let mut state = self.shared.state.lock();
            state.listener_seq += 1;
            let id = state.listener_seq;
            state.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.shared);
        Disposer::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.state.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    fn remove_entry(&self, id: &str) {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.entries.len();
            state.entries.retain(|entry| entry.id != id);
            before != state.entries.len()
        };
        if removed {
            debug!(id, "disposed plugin style");
            self.publish();
        }
    }

    /// Push the current entry set to the document and listeners.
    fn publish(&self) {
        let (update, listeners) = {
            let state = self.shared.state.lock();
            let conflicts = if self.shared.config.detect_conflicts {
                detect_conflicts(&state.entries)
            } else {
                Vec::new()
            };
            let update = StyleUpdate { entries: sorted_entries(&state.entries), conflicts };
            let listeners: Vec<Listener> =
                state.listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect();
            (update, listeners)
        };

        self.shared.document.apply_stylesheets(&update.entries);
        for listener in listeners {
            listener(&update);
        }
    }
}

fn sorted_entries(entries: &[StyleEntry]) -> Vec<StyleEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|entry| (entry.layer.rank(), entry.order));
    sorted
}

fn detect_conflicts(entries: &[StyleEntry]) -> Vec<StyleConflict> {
    let mut by_selector: BTreeMap<String, StyleConflict> = BTreeMap::new();

    for entry in entries {
        for selector in extract_selectors(&entry.css) {
            let row = by_selector.entry(selector.clone()).or_insert_with(|| StyleConflict {
                selector,
                plugin_ids: Vec::new(),
                entry_ids: Vec::new(),
            });
            if !row.plugin_ids.contains(&entry.plugin_id) {
                row.plugin_ids.push(entry.plugin_id.clone());
            }
            if !row.entry_ids.contains(&entry.id) {
                row.entry_ids.push(entry.id.clone());
            }
        }
    }

    // A plugin overriding its own selector is intentional.
    let mut conflicts: Vec<StyleConflict> =
        by_selector.into_values().filter(|row| row.plugin_ids.len() > 1).collect();
    conflicts.sort_by(|a, b| b.plugin_ids.len().cmp(&a.plugin_ids.len()));
    conflicts
}

/// Normalized top-level selectors of a stylesheet.
///
/// Rules nested inside at-rules (`@media`, `@supports`, ...) are opaque and
/// contribute nothing.
pub fn extract_selectors(css: &str) -> Vec<String> {
    let css = COMMENT_RE.replace_all(css, "");
    let mut selectors = Vec::new();
    for range in rule_preludes(&css) {
        for part in split_selector_list(&css[range]) {
            let selector = WHITESPACE_RE.replace_all(part.trim(), " ").into_owned();
            if !selector.is_empty() && !selectors.contains(&selector) {
                selectors.push(selector);
            }
        }
    }
    selectors
}

/// Prefix every top-level selector with a scope attribute selector.
pub fn scope_css(css: &str, attribute: &str, scope_id: &str) -> String {
    let css = COMMENT_RE.replace_all(css, "");
    let anchor = format!("[{attribute}=\"{scope_id}\"]");
    let mut out = String::with_capacity(css.len() + 64);
    let mut cursor = 0;

    for range in rule_preludes(&css) {
        out.push_str(&css[cursor..range.start]);
        let scoped = split_selector_list(&css[range.clone()])
            .into_iter()
            .map(|selector| format!("{anchor} {}", selector.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&scoped);
        out.push(' ');
        cursor = range.end;
    }
    out.push_str(&css[cursor..]);
    out
}

/// Split a selector list on commas outside parentheses, brackets and strings.
fn split_selector_list(prelude: &str) -> Vec<&str> {
    let bytes = prelude.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'\\' => i += 1,
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&prelude[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&prelude[start..]);
    parts
}

/// Byte ranges of top-level qualified rule preludes (the text before `{`).
fn rule_preludes(css: &str) -> Vec<Range<usize>> {
    let bytes = css.as_bytes();
    let mut preludes = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'{' => {
                if depth == 0 {
                    let prelude = css[start..i].trim();
                    if !prelude.is_empty() && !prelude.starts_with('@') {
                        // Keep leading whitespace outside the range.
                        let offset = css[start..i].len() - css[start..i].trim_start().len();
                        let end = start + offset + prelude.len();
                        preludes.push(start + offset..end);
                    }
                }
                depth += 1;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    start = i + 1;
                }
            }
            b';' if depth == 0 => start = i + 1,
            _ => {}
        }
        i += 1;
    }

    preludes
}
