//! Hotkey pattern normalization and plugin hotkey bindings.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::{Disposer, PluginError, PluginResult};

/// Modifiers in the order they appear in a normalized pattern.
pub const MODIFIER_ORDER: [&str; 5] = ["mod", "ctrl", "meta", "shift", "alt"];

fn canonical_modifier(token: &str) -> Option<usize> {
    let name = match token {
        "option" => "alt",
        "control" => "ctrl",
        "cmd" | "command" | "super" => "meta",
        other => other,
    };
    MODIFIER_ORDER.iter().position(|m| *m == name)
}

/// Normalize a hotkey pattern such as `Shift+Ctrl+K` to `ctrl+shift+k`.
///
/// Returns an empty string for invalid patterns: empty input, empty
/// segments, or anything other than exactly one non-modifier key.
pub fn normalize_hotkey_pattern(input: &str) -> String {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return String::new();
    }

    let mut modifiers = [false; MODIFIER_ORDER.len()];
    let mut key: Option<&str> = None;
    for segment in input.split('+').map(str::trim) {
        if segment.is_empty() {
            return String::new();
        }
        match canonical_modifier(segment) {
            Some(index) => modifiers[index] = true,
            None if key.is_none() => key = Some(segment),
            None => return String::new(),
        }
    }

    let Some(key) = key else {
        return String::new();
    };

    let mut parts: Vec<&str> = MODIFIER_ORDER
        .iter()
        .zip(modifiers)
        .filter_map(|(name, present)| present.then_some(*name))
        .collect();
    parts.push(key);
    parts.join("+")
}

/// A hotkey bound to a plugin command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotkeyBinding {
    pub plugin_id: String,
    /// Normalized pattern.
    pub pattern: String,
    pub command_id: String,
}

/// A pattern bound by more than one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotkeyConflict {
    pub pattern: String,
    pub plugin_ids: Vec<String>,
}

#[derive(Default)]
struct HotkeyState {
    seq: u64,
    bindings: Vec<(u64, HotkeyBinding)>,
}

/// Registry of plugin hotkey bindings.
#[derive(Clone, Default)]
pub struct HotkeyRegistry {
    state: Arc<Mutex<HotkeyState>>,
}

impl fmt::Debug for HotkeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotkeyRegistry").field("bindings", &self.state.lock().bindings.len()).finish()
    }
}

impl HotkeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `pattern` to a plugin command.
    pub fn register(&self, plugin_id: &str, pattern: &str, command_id: &str) -> PluginResult<Disposer> {
        let normalized = normalize_hotkey_pattern(pattern);
        if normalized.is_empty() {
            return Err(PluginError::validation(format!("invalid hotkey pattern '{pattern}'")));
        }
        if command_id.trim().is_empty() {
            return Err(PluginError::validation("hotkey requires a command id"));
        }

        let seq = {
            let mut state = self.state.lock();
            state.seq += 1;
            let seq = state.seq;
            state.bindings.push((
                seq,
                HotkeyBinding {
                    plugin_id: plugin_id.to_string(),
                    pattern: normalized.clone(),
                    command_id: command_id.to_string(),
                },
            ));
            seq
        };
        debug!(plugin_id, pattern = %normalized, command_id, "registered hotkey");

        let weak = Arc::downgrade(&self.state);
        Ok(Disposer::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().bindings.retain(|(id, _)| *id != seq);
            }
        }))
    }

    /// The most recent binding for a pattern, in any spelling.
    pub fn resolve(&self, pattern: &str) -> Option<HotkeyBinding> {
        let normalized = normalize_hotkey_pattern(pattern);
        if normalized.is_empty() {
            return None;
        }
        self.state
            .lock()
            .bindings
            .iter()
            .rev()
            .find(|(_, binding)| binding.pattern == normalized)
            .map(|(_, binding)| binding.clone())
    }

    /// All bindings in registration order.
    pub fn bindings(&self) -> Vec<HotkeyBinding> {
        self.state.lock().bindings.iter().map(|(_, b)| b.clone()).collect()
    }

    /// Patterns bound by more than one plugin, sorted by pattern.
    pub fn conflicts(&self) -> Vec<HotkeyConflict> {
        let mut by_pattern: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (_, binding) in self.state.lock().bindings.iter() {
            let owners = by_pattern.entry(binding.pattern.clone()).or_default();
            if !owners.contains(&binding.plugin_id) {
                owners.push(binding.plugin_id.clone());
            }
        }
        by_pattern
            .into_iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(pattern, plugin_ids)| HotkeyConflict { pattern, plugin_ids })
            .collect()
    }

    /// Remove every binding a plugin registered.
    pub fn clear_plugin(&self, plugin_id: &str) {
        self.state.lock().bindings.retain(|(_, b)| b.plugin_id != plugin_id);
    }

    /// Whether a plugin still owns any binding.
    pub fn has_plugin(&self, plugin_id: &str) -> bool {
        self.state.lock().bindings.iter().any(|(_, b)| b.plugin_id == plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_orders_modifiers() {
        assert_eq!(normalize_hotkey_pattern("Ctrl+Shift+K"), "ctrl+shift+k");
        assert_eq!(normalize_hotkey_pattern("shift+ctrl+k"), "ctrl+shift+k");
        assert_eq!(normalize_hotkey_pattern("SHIFT+CTRL+K"), "ctrl+shift+k");
    }

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(normalize_hotkey_pattern("mod+option+h"), "mod+alt+h");
        assert_eq!(normalize_hotkey_pattern("Control+P"), "ctrl+p");
        assert_eq!(normalize_hotkey_pattern("cmd+shift+p"), "meta+shift+p");
        assert_eq!(normalize_hotkey_pattern("alt+Command+Ctrl+Mod+x"), "mod+ctrl+meta+alt+x");
    }

    #[test]
    fn test_normalize_invalid_patterns() {
        assert_eq!(normalize_hotkey_pattern(""), "");
        assert_eq!(normalize_hotkey_pattern("   "), "");
        assert_eq!(normalize_hotkey_pattern("ctrl+shift"), "");
        assert_eq!(normalize_hotkey_pattern("ctrl+a+b"), "");
        assert_eq!(normalize_hotkey_pattern("ctrl++k"), "");
    }

    #[test]
    fn test_normalize_trims_and_collapses_duplicates() {
        assert_eq!(normalize_hotkey_pattern(" ctrl + k "), "ctrl+k");
        assert_eq!(normalize_hotkey_pattern("ctrl+control+k"), "ctrl+k");
        assert_eq!(normalize_hotkey_pattern("F5"), "f5");
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HotkeyRegistry::new();
        registry.register("a", "Shift+Ctrl+K", "a.open").unwrap();

        let binding = registry.resolve("ctrl+shift+k").unwrap();
        assert_eq!(binding.command_id, "a.open");
        assert_eq!(binding.pattern, "ctrl+shift+k");
        assert!(registry.resolve("ctrl+k").is_none());
    }

    #[test]
    fn test_register_rejects_invalid_pattern() {
        let registry = HotkeyRegistry::new();
        let err = registry.register("a", "ctrl+shift", "a.cmd").unwrap_err();
        assert!(err.is_validation());
        assert!(registry.bindings().is_empty());
    }

    #[test]
    fn test_most_recent_binding_wins_and_conflicts_reported() {
        let registry = HotkeyRegistry::new();
        let first = registry.register("a", "mod+p", "a.palette").unwrap();
        registry.register("b", "Mod+P", "b.palette").unwrap();

        assert_eq!(registry.resolve("mod+p").unwrap().plugin_id, "b");
        assert_eq!(
            registry.conflicts(),
            vec![HotkeyConflict {
                pattern: "mod+p".to_string(),
                plugin_ids: vec!["a".to_string(), "b".to_string()],
            }]
        );

        first.dispose();
        assert!(registry.conflicts().is_empty());
    }

    #[test]
    fn test_clear_plugin() {
        let registry = HotkeyRegistry::new();
        registry.register("a", "ctrl+1", "a.one").unwrap();
        registry.register("b", "ctrl+2", "b.two").unwrap();

        registry.clear_plugin("a");
        assert!(!registry.has_plugin("a"));
        assert_eq!(registry.bindings().len(), 1);
    }
}
