//! Plugin-driven theme token overrides and named presets.
//!
//! Overrides are CSS custom properties written to the document root. For
//! each token the most recent override that applies to the active color
//! scheme wins; when none applies, the value the root had before the runtime
//! first touched the token is restored (or the property removed).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Disposer, Document, PluginError, PluginResult};

/// Token name to value.
pub type TokenMap = BTreeMap<String, String>;

/// Which color scheme an override targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    /// Applies regardless of scheme.
    #[default]
    All,
    /// Applies only while the light scheme is active.
    Light,
    /// Applies only while the dark scheme is active.
    Dark,
}

impl ThemeMode {
    /// Whether an override in this mode is visible under `scheme`.
    pub fn applies_to(self, scheme: ColorScheme) -> bool {
        match self {
            Self::All => true,
            Self::Light => scheme == ColorScheme::Light,
            Self::Dark => scheme == ColorScheme::Dark,
        }
    }
}

impl FromStr for ThemeMode {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(PluginError::validation(format!("Unknown theme mode: {other}"))),
        }
    }
}

/// The color scheme the host is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    /// Light scheme.
    #[default]
    Light,
    /// Dark scheme.
    Dark,
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
        }
    }
}

/// A named bundle of token values, as submitted by a plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThemePreset {
    /// Preset id, unique per plugin.
    pub id: String,
    /// Display name (defaults to the id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tokens for both schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenMap>,
    /// Light-only tokens; override `tokens`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<TokenMap>,
    /// Dark-only tokens; override `tokens`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark: Option<TokenMap>,
}

impl ThemePreset {
    /// Empty preset with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a token for both schemes.
    pub fn with_token(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.get_or_insert_with(TokenMap::new).insert(token.into(), value.into());
        self
    }

    /// Add a light-only token.
    pub fn with_light(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.light.get_or_insert_with(TokenMap::new).insert(token.into(), value.into());
        self
    }

    /// Add a dark-only token.
    pub fn with_dark(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.dark.get_or_insert_with(TokenMap::new).insert(token.into(), value.into());
        self
    }
}

/// A validated, stored preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresetRecord {
    /// Owning plugin.
    pub plugin_id: String,
    /// Preset id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Resolved light scheme tokens.
    pub light: TokenMap,
    /// Resolved dark scheme tokens.
    pub dark: TokenMap,
    #[serde(skip)]
    registration: u64,
}

#[derive(Debug, Clone)]
struct TokenOverride {
    seq: u64,
    plugin_id: String,
    token: String,
    mode: ThemeMode,
    value: String,
}

#[derive(Debug, Default)]
struct ThemeState {
    seq: u64,
    scheme: ColorScheme,
    presets: Vec<PresetRecord>,
    overrides: Vec<TokenOverride>,
    baseline: HashMap<String, String>,
}

struct ThemeShared {
    state: Mutex<ThemeState>,
    document: Arc<dyn Document>,
}

/// Registry of theme token overrides and presets.
#[derive(Clone)]
pub struct ThemeRuntime {
    shared: Arc<ThemeShared>,
}

impl fmt::Debug for ThemeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ThemeRuntime")
            .field("scheme", &state.scheme)
            .field("overrides", &state.overrides.len())
            .field("presets", &state.presets.len())
            .finish()
    }
}

impl ThemeRuntime {
    /// Create a runtime starting in the light scheme.
    pub fn new(document: Arc<dyn Document>) -> Self {
        Self::with_scheme(document, ColorScheme::default())
    }

    /// Create a runtime starting in the given scheme.
    pub fn with_scheme(document: Arc<dyn Document>, scheme: ColorScheme) -> Self {
        let state = ThemeState { scheme, ..ThemeState::default() };
        Self { shared: Arc::new(ThemeShared { state: Mutex::new(state), document }) }
    }

    /// Currently active color scheme.
    pub fn mode(&self) -> ColorScheme {
        self.shared.state.lock().scheme
    }

    /// Switch the active color scheme and re-resolve every token.
    pub fn set_mode(&self, scheme: ColorScheme) {
        self.update(|state| {
            state.scheme = scheme;
            Some(())
        });
    }

    /// Override a token for a plugin.
    ///
    /// The returned disposer removes exactly this override, restoring
    /// whatever value would otherwise be visible.
    pub fn set_token(
        &self,
        plugin_id: &str,
        token: &str,
        value: &str,
        mode: ThemeMode,
    ) -> PluginResult<Disposer> {
        self.set_tokens(plugin_id, [(token, value)], mode)
    }

    /// Override several tokens for a plugin in one step.
    ///
    /// Every pair is validated before anything changes, so a rejected batch
    /// leaves the plugin's earlier overrides and the document untouched.
    /// The returned disposer removes the whole batch.
    pub fn set_tokens<K, V>(
        &self,
        plugin_id: &str,
        tokens: impl IntoIterator<Item = (K, V)>,
        mode: ThemeMode,
    ) -> PluginResult<Disposer>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut batch = Vec::new();
        for (token, value) in tokens {
            let token = normalize_token_name(token.as_ref());
            let value = value.as_ref().trim();
            if token.is_empty() || value.is_empty() {
                return Err(PluginError::validation("Theme token and value cannot be empty"));
            }
            batch.push((token, value.to_string()));
        }
        if batch.is_empty() {
            return Ok(Disposer::noop());
        }

        let seqs = self
            .update(|state| {
                let seqs: Vec<u64> = batch
                    .iter()
                    .map(|(token, value)| push_override(state, plugin_id, token, value, mode))
                    .collect();
                Some(seqs)
            })
            .unwrap_or_default();
        for (token, _) in &batch {
            debug!(plugin_id, token = %token, ?mode, "set theme token");
        }

        let weak = Arc::downgrade(&self.shared);
        Ok(Disposer::new(move || {
            if let Some(shared) = weak.upgrade() {
                ThemeRuntime { shared }.update(|state| {
                    let before = state.overrides.len();
                    state.overrides.retain(|item| !seqs.contains(&item.seq));
                    (state.overrides.len() != before).then_some(())
                });
            }
        }))
    }

    /// Drop a plugin's override for a token without holding its disposer.
    pub fn reset_token(&self, plugin_id: &str, token: &str, mode: ThemeMode) {
        let token = normalize_token_name(token);
        self.update(|state| {
            state.overrides.retain(|item| {
                !(item.plugin_id == plugin_id && item.token == token && item.mode == mode)
            });
            Some(())
        });
    }

    /// Validate and store a preset for a plugin.
    pub fn register_preset(&self, plugin_id: &str, preset: ThemePreset) -> PluginResult<Disposer> {
        let id = preset.id.trim().to_string();
        if id.is_empty() {
            return Err(PluginError::validation("Theme preset id cannot be empty"));
        }

        let mut light = TokenMap::new();
        let mut dark = TokenMap::new();
        append_token_map(preset.tokens.as_ref(), &mut light);
        append_token_map(preset.tokens.as_ref(), &mut dark);
        append_token_map(preset.light.as_ref(), &mut light);
        append_token_map(preset.dark.as_ref(), &mut dark);

        let name = preset
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&id)
            .to_string();

        let registration = {
            let mut state = self.shared.state.lock();
            state.seq += 1;
            let registration = state.seq;
            let record = PresetRecord {
                plugin_id: plugin_id.to_string(),
                id: id.clone(),
                name,
                light,
                dark,
                registration,
            };
            match state.presets.iter_mut().find(|p| p.plugin_id == plugin_id && p.id == id) {
                Some(existing) => *existing = record,
                None => state.presets.push(record),
            }
            registration
        };
        debug!(plugin_id, preset = %id, "registered theme preset");

        let weak = Arc::downgrade(&self.shared);
        Ok(Disposer::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.state.lock().presets.retain(|p| p.registration != registration);
            }
        }))
    }

    /// Apply every token of a plugin's preset.
    ///
    /// Applied tokens are owned by the plugin and reverted by
    /// [`ThemeRuntime::clear_plugin`]. Returns `false` when the preset is
    /// unknown, which is not an error.
    pub fn apply_preset(&self, plugin_id: &str, preset_id: &str) -> bool {
        let preset_id = preset_id.trim();
        let applied = self.update(|state| {
            let preset = state
                .presets
                .iter()
                .find(|p| p.plugin_id == plugin_id && p.id == preset_id)
                .cloned()?;
            for (token, value) in &preset.light {
                push_override(state, plugin_id, token, value, ThemeMode::Light);
            }
            for (token, value) in &preset.dark {
                push_override(state, plugin_id, token, value, ThemeMode::Dark);
            }
            Some(())
        });

        if applied.is_some() {
            debug!(plugin_id, preset = preset_id, "applied theme preset");
        } else {
            debug!(plugin_id, preset = preset_id, "theme preset not found");
        }
        applied.is_some()
    }

    /// Presets registered by a plugin.
    pub fn presets(&self, plugin_id: &str) -> Vec<PresetRecord> {
        self.shared.state.lock().presets.iter().filter(|p| p.plugin_id == plugin_id).cloned().collect()
    }

    /// Effective override values under the active scheme.
    pub fn active_tokens(&self) -> TokenMap {
        let state = self.shared.state.lock();
        effective_tokens(&state)
    }

    /// Re-write every active override to the document.
    ///
    /// Used after the host rewrote root variables (e.g. on theme switch).
    pub fn reapply(&self) {
        self.update(|_| Some(()));
    }

    /// Revert every override and forget every preset owned by a plugin.
    pub fn clear_plugin(&self, plugin_id: &str) {
        self.update(|state| {
            state.overrides.retain(|item| item.plugin_id != plugin_id);
            state.presets.retain(|p| p.plugin_id != plugin_id);
            Some(())
        });
        debug!(plugin_id, "cleared plugin theme");
    }

    /// Mutate the state, then bring the document in line with it.
    ///
    /// `mutate` returns `None` when nothing changed, which skips the sync.
    /// The document is only read and written with the state lock released.
    fn update<R>(&self, mutate: impl FnOnce(&mut ThemeState) -> Option<R>) -> Option<R> {
        let document = &self.shared.document;

        let (result, missing) = {
            let mut state = self.shared.state.lock();
            let result = mutate(&mut *state)?;
            let missing: Vec<String> = state
                .overrides
                .iter()
                .map(|item| item.token.clone())
                .filter(|token| !state.baseline.contains_key(token))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            (result, missing)
        };

        let captured: Vec<(String, String)> = missing
            .into_iter()
            .map(|token| {
                let value = document.property(&token);
                (token, value)
            })
            .collect();

        let writes = {
            let mut state = self.shared.state.lock();
            for (token, value) in captured {
                state.baseline.entry(token).or_insert(value);
            }
            plan_writes(&mut *state)
        };

        for write in writes {
            match write {
                TokenWrite::Set(token, value) => document.set_property(&token, &value),
                TokenWrite::Remove(token) => document.remove_property(&token),
            }
        }
        Some(result)
    }
}

enum TokenWrite {
    Set(String, String),
    Remove(String),
}

/// Resolve every touched token to a document write and forget baselines
/// no override refers to anymore.
fn plan_writes(state: &mut ThemeState) -> Vec<TokenWrite> {
    let effective = effective_tokens(state);
    let referenced: BTreeSet<String> =
        state.overrides.iter().map(|item| item.token.clone()).collect();
    let touched: BTreeSet<String> =
        referenced.iter().cloned().chain(state.baseline.keys().cloned()).collect();

    let mut writes = Vec::new();
    for token in touched {
        // Registered after this sync captured baselines; its own sync writes it.
        let Some(previous) = state.baseline.get(&token) else {
            continue;
        };

        if let Some(value) = effective.get(&token) {
            writes.push(TokenWrite::Set(token.clone(), value.clone()));
        } else if previous.is_empty() {
            writes.push(TokenWrite::Remove(token.clone()));
        } else {
            writes.push(TokenWrite::Set(token.clone(), previous.clone()));
        }

        if !referenced.contains(&token) {
            state.baseline.remove(&token);
        }
    }
    writes
}

fn push_override(
    state: &mut ThemeState,
    plugin_id: &str,
    token: &str,
    value: &str,
    mode: ThemeMode,
) -> u64 {
    state
        .overrides
        .retain(|item| !(item.plugin_id == plugin_id && item.token == token && item.mode == mode));
    state.seq += 1;
    state.overrides.push(TokenOverride {
        seq: state.seq,
        plugin_id: plugin_id.to_string(),
        token: token.to_string(),
        mode,
        value: value.to_string(),
    });
    state.seq
}

fn effective_tokens(state: &ThemeState) -> TokenMap {
    let mut effective = TokenMap::new();
    for item in state.overrides.iter().filter(|item| item.mode.applies_to(state.scheme)) {
        effective.insert(item.token.clone(), item.value.clone());
    }
    effective
}

/// Trim a token name and prefix it with `--` when missing.
pub fn normalize_token_name(token: &str) -> String {
    let token = token.trim();
    if token.is_empty() || token.starts_with("--") {
        token.to_string()
    } else {
        format!("--{token}")
    }
}

fn append_token_map(source: Option<&TokenMap>, target: &mut TokenMap) {
    let Some(source) = source else {
        return;
    };
    for (raw_token, raw_value) in source {
        let token = normalize_token_name(raw_token);
        let value = raw_value.trim();
        if token.is_empty() || value.is_empty() {
            continue;
        }
        target.insert(token, value.to_string());
    }
}
