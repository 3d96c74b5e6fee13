//! The live document surface the style and theme runtimes write to.
//!
//! Registries never touch global document state directly; they go through
//! [`Document`]. The host implements it over its real style surface, while
//! tests and headless tools use [`MemoryDocument`].

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::style::StyleEntry;

/// Narrow interface over the document root style and plugin stylesheets.
pub trait Document: Send + Sync {
    /// Current value of a CSS custom property on the root (empty if unset).
    fn property(&self, token: &str) -> String;

    /// Set a CSS custom property on the root.
    fn set_property(&self, token: &str, value: &str);

    /// Remove a CSS custom property from the root.
    fn remove_property(&self, token: &str);

    /// Replace the full set of plugin stylesheets.
    ///
    /// `entries` are already in cascade order; later entries win.
    fn apply_stylesheets(&self, entries: &[StyleEntry]);
}

/// In-process [`Document`] implementation.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    properties: Mutex<HashMap<String, String>>,
    stylesheets: Mutex<Vec<StyleEntry>>,
}

impl MemoryDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every root property.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.properties.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Ids of the mounted stylesheets, in cascade order.
    pub fn stylesheet_ids(&self) -> Vec<String> {
        self.stylesheets.lock().iter().map(|entry| entry.id.clone()).collect()
    }

    /// Concatenated text of the mounted stylesheets, in cascade order.
    pub fn stylesheet_text(&self) -> String {
        self.stylesheets.lock().iter().map(|entry| entry.css.as_str()).collect::<Vec<_>>().join("\n")
    }
}

impl Document for MemoryDocument {
    fn property(&self, token: &str) -> String {
        self.properties.lock().get(token).cloned().unwrap_or_default()
    }

    fn set_property(&self, token: &str, value: &str) {
        self.properties.lock().insert(token.to_string(), value.to_string());
    }

    fn remove_property(&self, token: &str) {
        self.properties.lock().remove(token);
    }

    fn apply_stylesheets(&self, entries: &[StyleEntry]) {
        *self.stylesheets.lock() = entries.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_roundtrip() {
        let doc = MemoryDocument::new();
        assert_eq!(doc.property("--accent"), "");

        doc.set_property("--accent", "210 40% 50%");
        assert_eq!(doc.property("--accent"), "210 40% 50%");

        doc.remove_property("--accent");
        assert_eq!(doc.property("--accent"), "");
        assert!(doc.properties().is_empty());
    }
}
